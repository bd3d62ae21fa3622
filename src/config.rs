//! Scrape configuration and process-level browser settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use utoipa::ToSchema;

use crate::error::ScraperError;

/// Known portal markup families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PortalFamily {
    Accela,
    Energov,
    Viewpoint,
    Posse,
}

impl PortalFamily {
    pub const ALL: [PortalFamily; 4] = [
        PortalFamily::Accela,
        PortalFamily::Energov,
        PortalFamily::Viewpoint,
        PortalFamily::Posse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PortalFamily::Accela => "accela",
            PortalFamily::Energov => "energov",
            PortalFamily::Viewpoint => "viewpoint",
            PortalFamily::Posse => "posse",
        }
    }
}

impl fmt::Display for PortalFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PortalFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accela" => Ok(PortalFamily::Accela),
            "energov" => Ok(PortalFamily::Energov),
            "viewpoint" | "viewpointcloud" => Ok(PortalFamily::Viewpoint),
            "posse" => Ok(PortalFamily::Posse),
            other => Err(format!("unsupported portal family '{}'", other)),
        }
    }
}

/// Per-scrape configuration. Immutable once a scrape starts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScrapeConfig {
    pub family: PortalFamily,
    /// Agency / jurisdiction code, e.g. `COSA`.
    pub jurisdiction: String,
    /// Portal module or permit category, e.g. `Fire`.
    pub module: String,
    /// Portal root, e.g. `https://aca-prod.accela.com/COSA`.
    pub base_url: String,
    /// Optional record-type filter value as shown in the portal's dropdown.
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_true")]
    pub extract_applicant: bool,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_postback_timeout_secs")]
    pub postback_timeout_secs: u64,
    #[serde(default = "default_min_rows_per_page")]
    pub min_rows_per_page: usize,
    /// Fixed sleep after DOM-mutating actions, before the page is read.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

/// Ten years; portals reject wider date windows anyway.
pub const MAX_LOOKBACK_DAYS: u32 = 3650;

fn default_lookback_days() -> u32 {
    30
}
fn default_max_pages() -> u32 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_true() -> bool {
    true
}
fn default_navigation_timeout_secs() -> u64 {
    30
}
fn default_postback_timeout_secs() -> u64 {
    12
}
fn default_min_rows_per_page() -> usize {
    5
}
fn default_settle_ms() -> u64 {
    750
}

impl ScrapeConfig {
    pub fn new(family: PortalFamily, jurisdiction: &str, module: &str, base_url: &str) -> Self {
        Self {
            family,
            jurisdiction: jurisdiction.to_string(),
            module: module.to_string(),
            base_url: base_url.to_string(),
            record_type: None,
            lookback_days: default_lookback_days(),
            max_pages: default_max_pages(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            extract_applicant: true,
            navigation_timeout_secs: default_navigation_timeout_secs(),
            postback_timeout_secs: default_postback_timeout_secs(),
            min_rows_per_page: default_min_rows_per_page(),
            settle_ms: default_settle_ms(),
        }
    }

    /// `"{family}_{jurisdiction}_{module}"`, e.g. `accela_COSA_fire`.
    pub fn source(&self) -> String {
        format!(
            "{}_{}_{}",
            self.family,
            self.jurisdiction,
            self.module.trim().to_lowercase().replace(' ', "_")
        )
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn postback_timeout(&self) -> Duration {
        Duration::from_secs(self.postback_timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn validate(&self) -> Result<(), ScraperError> {
        if self.jurisdiction.trim().is_empty() {
            return Err(ScraperError::Config("jurisdiction must not be empty".into()));
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ScraperError::Config(format!("base_url '{}' is not a valid URL", self.base_url)));
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.lookback_days) {
            return Err(ScraperError::Config(format!(
                "lookback_days must be between 1 and {}, got {}",
                MAX_LOOKBACK_DAYS, self.lookback_days
            )));
        }
        if self.max_pages == 0 {
            return Err(ScraperError::Config("max_pages must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(ScraperError::Config("max_retries must be at least 1".into()));
        }
        Ok(())
    }
}

/// Chrome launch settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub window_size: (u32, u32),
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            window_size: (1920, 1080),
        }
    }
}

impl BrowserSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let chrome_path = std::env::var("CHROME_PATH").ok().filter(|s| !s.is_empty()).map(PathBuf::from);
        let headless = std::env::var("CHROME_HEADLESS")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(defaults.headless);
        let window_size = std::env::var("CHROME_WINDOW")
            .ok()
            .and_then(|s| parse_window(&s))
            .unwrap_or(defaults.window_size);

        Self { chrome_path, headless, window_size }
    }
}

fn parse_window(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.trim().split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}
