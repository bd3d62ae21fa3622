//! Error taxonomy.
//!
//! Row-level and detail-resolution failures are not errors at all: they are
//! dropped rows and `ResolveFailure` values. Only page/session failures
//! travel as `EngineError`, and only the retry boundary in `engine` turns them
//! into a `ScraperError`.

use thiserror::Error;

/// Failures of the browser capability itself.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("page session already closed")]
    Closed,

    #[error(transparent)]
    Browser(#[from] anyhow::Error),
}

/// Page-level failures. Recoverable by retrying the whole scrape.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Page(#[from] PageError),

    #[error("portal returned an error page: {0}")]
    PortalError(String),

    #[error("results did not load within {0}s")]
    ResultsTimeout(u64),

    #[error("required control not found: {0}")]
    MissingControl(String),

    #[error("invalid search transition from {from} to {to}")]
    InvalidState { from: &'static str, to: &'static str },
}

/// Errors surfaced to callers of `PermitScraper::scrape`.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("could not start scrape session: {0}")]
    Launch(#[source] PageError),

    #[error("scrape failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: EngineError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("scrape task aborted: {0}")]
    Aborted(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_error_keeps_last_cause() {
        let err = ScraperError::RetriesExhausted {
            attempts: 3,
            source: EngineError::PortalError("Server Error in '/' Application".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("Server Error"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_page_error_converts_into_engine_error() {
        let err: EngineError = PageError::Script("boom".into()).into();
        assert!(matches!(err, EngineError::Page(PageError::Script(_))));
    }
}
