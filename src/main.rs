use axum::{
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use permit_crawler::api;
use permit_crawler::browser::ChromeLauncher;
use permit_crawler::config::BrowserSettings;

#[derive(OpenApi)]
#[openapi(
    paths(api::trigger_scrape, api::list_families),
    components(
        schemas(
            api::ScrapeResponse,
            api::ErrorResponse,
            api::FamilyInfo,
            permit_crawler::config::ScrapeConfig,
            permit_crawler::config::PortalFamily,
            permit_crawler::record::PermitRecord,
            permit_crawler::record::DetailRef,
            permit_crawler::status::PermitStatus
        )
    ),
    tags(
        (name = "scraper", description = "Permit portal scraping API")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = BrowserSettings::from_env();
    tracing::info!(
        "🌐 Chrome: headless={}, window={}x{}, path={:?}",
        settings.headless,
        settings.window_size.0,
        settings.window_size.1,
        settings.chrome_path
    );

    let state = Arc::new(api::AppState { launcher: ChromeLauncher::new(settings) });

    let app = Router::new()
        .merge(SwaggerUi::new("/permit-crawler-swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/scrape", post(api::trigger_scrape))
        .route("/families", get(api::list_families))
        .with_state(state);

    let addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Permit crawler listening on {}", addr);
    tracing::info!("📚 Swagger UI at http://{}/permit-crawler-swagger", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
