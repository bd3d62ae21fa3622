//! HTTP surface: trigger a scrape and list the supported portal families.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::browser::ChromeLauncher;
use crate::config::{PortalFamily, ScrapeConfig};
use crate::engine::PermitScraper;
use crate::error::ScraperError;
use crate::record::PermitRecord;

pub struct AppState {
    pub launcher: ChromeLauncher,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScrapeResponse {
    pub source: String,
    pub count: usize,
    pub records: Vec<PermitRecord>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FamilyInfo {
    pub family: PortalFamily,
    /// Substrings that identify this family's detail pages.
    pub detail_patterns: Vec<String>,
}

fn status_for(err: &ScraperError) -> StatusCode {
    match err {
        ScraperError::Config(_) => StatusCode::BAD_REQUEST,
        ScraperError::Launch(_) | ScraperError::Aborted(_) => StatusCode::SERVICE_UNAVAILABLE,
        ScraperError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
    }
}

#[utoipa::path(
    post,
    path = "/scrape",
    request_body = ScrapeConfig,
    responses(
        (status = 200, description = "Scrape finished", body = ScrapeResponse),
        (status = 400, description = "Invalid configuration", body = ErrorResponse),
        (status = 502, description = "Portal kept failing", body = ErrorResponse),
        (status = 503, description = "Browser unavailable", body = ErrorResponse)
    ),
    tag = "scraper"
)]
pub async fn trigger_scrape(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ScrapeConfig>,
) -> Result<Json<ScrapeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let source = config.source();
    tracing::info!("📥 Scrape requested for {}", source);

    let scraper = PermitScraper::new(state.launcher.clone(), config);
    match scraper.scrape().await {
        Ok(records) => Ok(Json(ScrapeResponse { source, count: records.len(), records })),
        Err(e) => Err((status_for(&e), Json(ErrorResponse { error: e.to_string() }))),
    }
}

#[utoipa::path(
    get,
    path = "/families",
    responses((status = 200, description = "Supported portal families", body = [FamilyInfo])),
    tag = "scraper"
)]
pub async fn list_families() -> Json<Vec<FamilyInfo>> {
    let families = PortalFamily::ALL
        .iter()
        .map(|family| FamilyInfo {
            family: *family,
            detail_patterns: crate::adapters::profile_for(*family)
                .detail_patterns
                .iter()
                .map(|p| p.to_string())
                .collect(),
        })
        .collect();
    Json(families)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&ScraperError::Config("x".into())), StatusCode::BAD_REQUEST);
        let exhausted = ScraperError::RetriesExhausted { attempts: 3, source: EngineError::ResultsTimeout(30) };
        assert_eq!(status_for(&exhausted), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_list_families_covers_all() {
        let Json(families) = list_families().await;
        assert_eq!(families.len(), PortalFamily::ALL.len());
        assert!(families.iter().any(|f| f.detail_patterns.iter().any(|p| p == "PosseObjectId=")));
    }
}
