//! Extraction engine for municipal permit portals.
//!
//! Drives a headless browser through a portal's search form, reads the
//! results tables, follows detail links (including ASP.NET postbacks) for
//! missing applicant/address data, and returns deduplicated
//! [`record::PermitRecord`]s.

pub mod adapters;
pub mod api;
pub mod browser;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod record;
pub mod resolver;
pub mod status;
pub mod validators;

pub use config::{BrowserSettings, PortalFamily, ScrapeConfig};
pub use engine::{scrape_many, PermitScraper};
pub use error::{EngineError, PageError, ScraperError};
pub use record::{DetailRef, PermitRecord};
pub use status::PermitStatus;
