//! Scrape one portal from the command line and print its records as JSON.
//!
//! ```text
//! scrape_once --family accela --jurisdiction COSA --module Fire \
//!     --base-url https://aca-prod.accela.com/COSA
//! scrape_once --config configs/edmonton.json --pretty
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use permit_crawler::browser::ChromeLauncher;
use permit_crawler::config::{BrowserSettings, PortalFamily, ScrapeConfig};
use permit_crawler::engine::PermitScraper;

#[derive(Parser)]
#[command(name = "scrape_once")]
#[command(about = "Scrape a single municipal permit portal")]
struct Cli {
    /// JSON file holding a full scrape config; overrides the portal flags.
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[arg(long)]
    family: Option<PortalFamily>,

    #[arg(long)]
    jurisdiction: Option<String>,

    #[arg(long)]
    module: Option<String>,

    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    record_type: Option<String>,

    #[arg(long, default_value_t = 30)]
    lookback_days: u32,

    #[arg(long, default_value_t = 10)]
    max_pages: u32,

    /// Skip applicant lookups on detail pages.
    #[arg(long)]
    no_applicant: bool,

    /// Run Chrome with a visible window.
    #[arg(long, env = "CHROME_SHOW")]
    show: bool,

    #[arg(long)]
    pretty: bool,
}

fn build_config(cli: &Cli) -> Result<ScrapeConfig> {
    if let Some(path) = &cli.config {
        let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        return serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()));
    }

    let (Some(family), Some(jurisdiction), Some(module), Some(base_url)) =
        (cli.family, cli.jurisdiction.as_deref(), cli.module.as_deref(), cli.base_url.as_deref())
    else {
        bail!("either --config or all of --family, --jurisdiction, --module and --base-url are required");
    };

    let mut config = ScrapeConfig::new(family, jurisdiction, module, base_url);
    config.record_type = cli.record_type.clone();
    config.lookback_days = cli.lookback_days;
    config.max_pages = cli.max_pages;
    config.extract_applicant = !cli.no_applicant;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let mut settings = BrowserSettings::from_env();
    if cli.show {
        settings.headless = false;
    }

    let scraper = PermitScraper::new(ChromeLauncher::new(settings), config);
    let records = scraper.scrape().await?;

    let out = if cli.pretty {
        serde_json::to_string_pretty(&records)?
    } else {
        serde_json::to_string(&records)?
    };
    println!("{}", out);
    Ok(())
}
