//! Browser capability seam.
//!
//! The engine only ever talks to a [`PortalPage`]: navigate, read the DOM,
//! evaluate script, force-click, and sample a navigation id. `chrome` drives a
//! real headless Chrome tab; `snapshot` replays recorded HTML so adapters and
//! the orchestrator can run offline.

pub mod chrome;
pub mod snapshot;

pub use chrome::{ChromeLauncher, ChromePage};
pub use snapshot::SnapshotPage;

use std::time::Duration;
use uuid::Uuid;

use crate::error::PageError;

/// What to click. Every variant is resolved in-page and clicked through
/// `element.click()`, which skips visibility/actionability checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    /// First element matching a CSS selector.
    Css(String),
    /// An anchor inside the `row_index`-th match of `row_selector`. When
    /// `raw_token` is set, only the anchor whose `href` (or `onclick`) equals
    /// it is clicked; otherwise the first anchor.
    RowAnchor {
        row_selector: String,
        row_index: usize,
        anchor_selector: String,
        raw_token: Option<String>,
    },
    /// First element under `scope` whose trimmed text equals `text`.
    LinkText { scope: String, text: String },
}

impl ClickTarget {
    /// In-page script returning `true` when something was clicked.
    pub fn to_script(&self) -> String {
        match self {
            ClickTarget::Css(selector) => format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    if (!el) return false;
                    el.click();
                    return true;
                }})()"#,
                sel = js_str(selector)
            ),
            ClickTarget::RowAnchor { row_selector, row_index, anchor_selector, raw_token } => format!(
                r#"(() => {{
                    const row = document.querySelectorAll({rows})[{idx}];
                    if (!row) return false;
                    const anchors = Array.from(row.querySelectorAll({anchors}));
                    const token = {token};
                    const el = token
                        ? anchors.find(a => a.getAttribute('href') === token
                            || (a.getAttribute('onclick') || '').trim() === token)
                        : anchors[0];
                    if (!el) return false;
                    el.click();
                    return true;
                }})()"#,
                rows = js_str(row_selector),
                idx = row_index,
                anchors = js_str(anchor_selector),
                token = raw_token.as_deref().map(js_str).unwrap_or_else(|| "null".to_string()),
            ),
            ClickTarget::LinkText { scope, text } => format!(
                r#"(() => {{
                    const el = Array.from(document.querySelectorAll({scope}))
                        .find(a => a.textContent.trim() === {text});
                    if (!el) return false;
                    el.click();
                    return true;
                }})()"#,
                scope = js_str(scope),
                text = js_str(text)
            ),
        }
    }
}

/// Result of a forced click, decided structurally rather than from error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Script ran to completion; navigation may or may not follow.
    Clicked,
    /// Target element was not present.
    NotFound,
    /// Script context was torn down and the navigation id changed: the click
    /// started a navigation.
    NavigationStarted,
}

/// Headless-browser capability the engine depends on.
pub trait PortalPage: Send + Sync {
    fn navigate(&self, url: &str, timeout: Duration) -> Result<(), PageError>;

    fn current_url(&self) -> String;

    /// Serialized DOM of the current document.
    fn content(&self) -> Result<String, PageError>;

    /// Rendered body text (`innerText`), newline separated.
    fn body_text(&self) -> Result<String, PageError>;

    /// Opaque token that changes whenever a new document is committed.
    fn navigation_id(&self) -> Result<String, PageError>;

    fn evaluate(&self, script: &str) -> Result<serde_json::Value, PageError>;

    fn force_click(&self, target: &ClickTarget) -> Result<ClickOutcome, PageError>;

    /// Sets an input/select value and fires `input`/`change`. Returns false
    /// when the selector matched nothing.
    fn set_value(&self, selector: &str, value: &str) -> Result<bool, PageError>;

    /// Trimmed texts of the direct `<td>` children of the `index`-th row
    /// matched by `row_selector`, computed in-page.
    fn row_cells(&self, row_selector: &str, index: usize) -> Result<Vec<String>, PageError>;

    fn close(&self);
}

/// One browser page owned by a single `scrape()` call. Closed on `close()`
/// or when dropped, whichever comes first.
pub struct ScrapeSession {
    pub id: Uuid,
    page: Box<dyn PortalPage>,
    closed: bool,
}

impl ScrapeSession {
    pub fn new(page: Box<dyn PortalPage>) -> Self {
        Self { id: Uuid::new_v4(), page, closed: false }
    }

    pub fn page(&self) -> &dyn PortalPage {
        self.page.as_ref()
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.page.close();
            tracing::debug!("🧹 Session {} closed", self.id);
        }
    }
}

impl Drop for ScrapeSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Produces a fresh session per `scrape()` call.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self) -> Result<ScrapeSession, PageError>;
}

/// JSON string literal, which is also a valid JS string literal.
pub(crate) fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
