//! Extraction orchestrator: one session, retried search + paging, a second
//! pass over detail pages, then dedup.

use chrono::Utc;
use std::collections::HashMap;
use tokio::time::sleep;

use crate::adapters::{adapter_for, PortalAdapter, ResultsState, SearchDriver};
use crate::browser::{PortalPage, SessionLauncher};
use crate::config::ScrapeConfig;
use crate::error::{EngineResult, PageError, ScraperError};
use crate::extract::{extract_detail_fields, DetailFields};
use crate::record::{dedup_records, PermitRecord};
use crate::resolver::{DetailPageResolver, ResolveTarget};
use crate::validators::{collapse_whitespace, contains_phrase};

/// Detail pass counters, logged once per scrape.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichStats {
    pub attempted: usize,
    pub enriched: usize,
    pub failed: usize,
}

pub struct PermitScraper<L: SessionLauncher> {
    launcher: L,
    config: ScrapeConfig,
}

impl<L: SessionLauncher> PermitScraper<L> {
    pub fn new(launcher: L, config: ScrapeConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Scrapes the configured portal. The session is closed on every path,
    /// including when this future is dropped.
    pub async fn scrape(&self) -> Result<Vec<PermitRecord>, ScraperError> {
        self.config.validate()?;
        let source = self.config.source();
        tracing::info!("🚀 Starting scrape for {} ({})", source, self.config.base_url);

        let session = self.launcher.launch().map_err(ScraperError::Launch)?;
        let adapter = adapter_for(&self.config);
        let result = self.with_retries(session.page(), adapter.as_ref()).await;
        session.close();

        match &result {
            Ok(records) => tracing::info!("✅ {}: {} unique records", source, records.len()),
            Err(e) => tracing::error!("❌ {}: {}", source, e),
        }
        result
    }

    async fn with_retries(
        &self,
        page: &dyn PortalPage,
        adapter: &dyn PortalAdapter,
    ) -> Result<Vec<PermitRecord>, ScraperError> {
        let attempts = self.config.max_retries;
        let mut delay = self.config.base_delay();
        let mut attempt = 1;
        loop {
            match self.run_once(page, adapter).await {
                Ok(records) => return Ok(records),
                Err(e) if attempt >= attempts => {
                    return Err(ScraperError::RetriesExhausted { attempts, source: e });
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Attempt {}/{} failed: {}. Retrying in {}ms",
                        attempt,
                        attempts,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    async fn run_once(&self, page: &dyn PortalPage, adapter: &dyn PortalAdapter) -> EngineResult<Vec<PermitRecord>> {
        let mut driver = SearchDriver::new(adapter);
        if driver.search(page).await? == ResultsState::NoRecords {
            return Ok(Vec::new());
        }

        let seen_at = Utc::now();
        let mut records = Vec::new();
        // permit id -> results page it was read from; postback refs resolve there.
        let mut origins: HashMap<String, String> = HashMap::new();

        loop {
            let extracted = driver.extract(page)?;
            let count = extracted.rows.len();
            for row in extracted.rows {
                origins.insert(row.permit_id.clone(), extracted.url.clone());
                records.push(PermitRecord::from_raw(row, seen_at));
            }
            if count == 0 || extracted.page_no >= self.config.max_pages {
                driver.finish();
                break;
            }
            if !driver.advance(page, count).await? {
                break;
            }
        }

        let stats = self.enrich(page, adapter, &mut records, &origins).await;
        if stats.attempted > 0 {
            tracing::info!(
                "🔎 Detail pass: {} attempted, {} enriched, {} failed",
                stats.attempted,
                stats.enriched,
                stats.failed
            );
        }

        Ok(dedup_records(records))
    }

    /// Visits detail pages for records that are still missing something.
    /// Failures leave the record as it was.
    async fn enrich(
        &self,
        page: &dyn PortalPage,
        adapter: &dyn PortalAdapter,
        records: &mut [PermitRecord],
        origins: &HashMap<String, String>,
    ) -> EnrichStats {
        let want_applicant = self.config.extract_applicant;
        let profile = adapter.profile();
        let resolver = DetailPageResolver::new(self.config.navigation_timeout(), self.config.postback_timeout());
        let fallback_url = page.current_url();
        let mut stats = EnrichStats::default();

        for record in records.iter_mut().filter(|r| r.needs_enrichment(want_applicant)) {
            let Some(detail) = record.detail_ref.clone() else { continue };
            let permit_id = record.permit_id.clone();
            let results_url = origins.get(&permit_id).cloned().unwrap_or_else(|| fallback_url.clone());
            let target = ResolveTarget {
                permit_id: &permit_id,
                results_url: &results_url,
                row_selector: profile.selectors.row,
                permit_id_selectors: profile.selectors.permit_id,
                detail_patterns: profile.detail_patterns,
            };

            stats.attempted += 1;
            match resolver.resolve(page, &detail, &target).await {
                Ok(()) => match read_detail(page, &permit_id) {
                    Ok(Some(fields)) => {
                        if apply_detail(record, fields, want_applicant) {
                            stats.enriched += 1;
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("Detail page at {} is not about {}; ignoring it", page.current_url(), permit_id);
                        stats.failed += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Detail page for {} unreadable: {}", permit_id, e);
                        stats.failed += 1;
                    }
                },
                Err(reason) => {
                    tracing::warn!("Could not open detail page for {}: {}", permit_id, reason);
                    stats.failed += 1;
                }
            }
            resolver.return_to_results(page, &results_url);
        }
        stats
    }
}

/// `None` when the loaded page never mentions `permit_id`.
fn read_detail(page: &dyn PortalPage, permit_id: &str) -> Result<Option<DetailFields>, PageError> {
    let text = page.body_text()?;
    if !mentions_permit(&text, permit_id) {
        return Ok(None);
    }
    let html = page.content()?;
    Ok(Some(extract_detail_fields(&html, &text)))
}

fn mentions_permit(body_text: &str, permit_id: &str) -> bool {
    contains_phrase(&collapse_whitespace(body_text).to_lowercase(), &collapse_whitespace(permit_id).to_lowercase())
}

/// Overwrites only fields the detail page produced. Returns whether anything changed.
fn apply_detail(record: &mut PermitRecord, fields: DetailFields, want_applicant: bool) -> bool {
    let mut changed = false;
    if let Some(address) = fields.address {
        changed |= record.address.as_deref() != Some(address.as_str());
        record.address = Some(address);
    }
    if want_applicant {
        if let Some(applicant) = fields.applicant {
            changed |= record.applicant_name.as_deref() != Some(applicant.as_str());
            record.applicant_name = Some(applicant);
        }
    }
    changed
}

/// Runs independent scrapes concurrently, one task and one session each.
/// Results come back in input order, keyed by source.
pub async fn scrape_many<L>(
    launcher: L,
    configs: Vec<ScrapeConfig>,
) -> Vec<(String, Result<Vec<PermitRecord>, ScraperError>)>
where
    L: SessionLauncher + Clone + 'static,
{
    let handles: Vec<_> = configs
        .into_iter()
        .map(|config| {
            let source = config.source();
            let scraper = PermitScraper::new(launcher.clone(), config);
            (source, tokio::spawn(async move { scraper.scrape().await }))
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (source, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ScraperError::Aborted(e.to_string())),
        };
        results.push((source, result));
    }
    results
}
