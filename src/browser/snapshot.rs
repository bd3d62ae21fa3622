//! Recorded-HTML replay of a portal.
//!
//! Pages are registered by URL and clicks are wired to destination URLs, so a
//! whole search → results → postback → detail flow can be replayed without a
//! browser. Clicking an anchor whose `href` is a `javascript:` token reports
//! [`ClickOutcome::NavigationStarted`], matching what a torn-down script
//! context looks like in Chrome.

use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{ClickOutcome, ClickTarget, PortalPage, ScrapeSession, SessionLauncher};
use crate::error::PageError;

#[derive(Default)]
struct State {
    pages: HashMap<String, String>,
    transitions: HashMap<String, String>,
    script_transitions: Vec<(String, String)>,
    broken: HashSet<String>,
    current_url: String,
    current_html: String,
    nav_seq: u64,
    closed: bool,
    values: Vec<(String, String)>,
    scripts: Vec<String>,
    visited: Vec<String>,
}

#[derive(Clone, Default)]
pub struct SnapshotPage {
    state: Arc<Mutex<State>>,
}

impl SnapshotPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `html` as the document served at `url`.
    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.lock().pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Clicking an element keyed by `key` (its `href`, the CSS selector used,
    /// or the link text) loads `url`.
    pub fn on_click(self, key: &str, url: &str) -> Self {
        self.lock().transitions.insert(key.to_string(), url.to_string());
        self
    }

    /// Running a script containing `fragment` loads `url`, and the script
    /// itself fails the way a torn-down context does.
    pub fn on_script(self, fragment: &str, url: &str) -> Self {
        self.lock().script_transitions.push((fragment.to_string(), url.to_string()));
        self
    }

    /// Navigating to `url` fails as a network error would.
    pub fn with_broken(self, url: &str) -> Self {
        self.lock().broken.insert(url.to_string());
        self
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn values_set(&self) -> Vec<(String, String)> {
        self.lock().values.clone()
    }

    pub fn scripts_run(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    pub fn visited(&self) -> Vec<String> {
        self.lock().visited.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the state is still usable.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn open(&self) -> Result<MutexGuard<'_, State>, PageError> {
        let guard = self.lock();
        if guard.closed {
            return Err(PageError::Closed);
        }
        Ok(guard)
    }
}

fn load(state: &mut State, url: &str) -> Result<(), PageError> {
    if state.broken.contains(url) {
        return Err(PageError::Navigation { url: url.to_string(), reason: "net::ERR_CONNECTION_RESET".into() });
    }
    let html = state
        .pages
        .get(url)
        .cloned()
        .ok_or_else(|| PageError::Navigation { url: url.to_string(), reason: "404 Not Found".into() })?;
    state.current_url = url.to_string();
    state.current_html = html;
    state.nav_seq += 1;
    state.visited.push(url.to_string());
    Ok(())
}

fn parse_selector(selector: &str) -> Result<Selector, PageError> {
    Selector::parse(selector).map_err(|e| PageError::Script(format!("bad selector '{}': {:?}", selector, e)))
}

fn text_of(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Locates the click target in `html`; returns the keys it can be wired by
/// (href first), or `None` if absent.
fn locate(html: &str, target: &ClickTarget) -> Result<Option<Vec<String>>, PageError> {
    let doc = Html::parse_document(html);
    let keys_for = |el: ElementRef<'_>, fallback: &str| {
        let mut keys = Vec::new();
        if let Some(href) = el.value().attr("href") {
            keys.push(href.to_string());
        }
        if let Some(js) = el.value().attr("onclick") {
            keys.push(js.trim().to_string());
        }
        if let Some(id) = el.value().attr("id") {
            keys.push(format!("#{}", id));
        }
        keys.push(fallback.to_string());
        keys
    };

    let found = match target {
        ClickTarget::Css(selector) => {
            let sel = parse_selector(selector)?;
            doc.select(&sel).next().map(|el| keys_for(el, selector))
        }
        ClickTarget::RowAnchor { row_selector, row_index, anchor_selector, raw_token } => {
            let rows = parse_selector(row_selector)?;
            let anchors = parse_selector(anchor_selector)?;
            doc.select(&rows).nth(*row_index).and_then(|row| {
                let candidates: Vec<ElementRef<'_>> = row.select(&anchors).collect();
                let chosen = match raw_token.as_deref() {
                    Some(t) => candidates.iter().copied().find(|a| {
                        a.value().attr("href") == Some(t)
                            || a.value().attr("onclick").map(str::trim) == Some(t)
                    }),
                    None => candidates.first().copied(),
                };
                chosen.map(|el| keys_for(el, anchor_selector))
            })
        }
        ClickTarget::LinkText { scope, text } => {
            let sel = parse_selector(scope)?;
            doc.select(&sel).find(|el| text_of(el) == *text).map(|el| keys_for(el, text))
        }
    };
    Ok(found)
}

impl PortalPage for SnapshotPage {
    fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), PageError> {
        let mut state = self.open()?;
        load(&mut state, url)
    }

    fn current_url(&self) -> String {
        self.lock().current_url.clone()
    }

    fn content(&self) -> Result<String, PageError> {
        Ok(self.open()?.current_html.clone())
    }

    fn body_text(&self) -> Result<String, PageError> {
        let html = self.open()?.current_html.clone();
        let doc = Html::parse_document(&html);
        let body = parse_selector("body")?;
        let lines: Vec<String> = doc
            .select(&body)
            .flat_map(|b| b.text().map(str::trim).filter(|t| !t.is_empty()).map(String::from).collect::<Vec<_>>())
            .collect();
        Ok(lines.join("\n"))
    }

    fn navigation_id(&self) -> Result<String, PageError> {
        Ok(self.open()?.nav_seq.to_string())
    }

    fn evaluate(&self, script: &str) -> Result<serde_json::Value, PageError> {
        let mut state = self.open()?;
        state.scripts.push(script.to_string());
        let destination = state
            .script_transitions
            .iter()
            .find(|(fragment, _)| script.contains(fragment.as_str()))
            .map(|(_, url)| url.clone());
        match destination {
            Some(url) => {
                load(&mut state, &url)?;
                Err(PageError::Script("Execution context was destroyed".into()))
            }
            None => Ok(serde_json::Value::Null),
        }
    }

    fn force_click(&self, target: &ClickTarget) -> Result<ClickOutcome, PageError> {
        let mut state = self.open()?;
        let keys = match locate(&state.current_html, target)? {
            Some(keys) => keys,
            None => return Ok(ClickOutcome::NotFound),
        };
        let destination = keys.iter().find_map(|k| state.transitions.get(k).cloned());
        match destination {
            Some(url) => {
                load(&mut state, &url)?;
                if keys.first().map(|k| k.starts_with("javascript:")).unwrap_or(false) {
                    Ok(ClickOutcome::NavigationStarted)
                } else {
                    Ok(ClickOutcome::Clicked)
                }
            }
            None => Ok(ClickOutcome::Clicked),
        }
    }

    fn set_value(&self, selector: &str, value: &str) -> Result<bool, PageError> {
        let mut state = self.open()?;
        let sel = parse_selector(selector)?;
        let exists = Html::parse_document(&state.current_html).select(&sel).next().is_some();
        if exists {
            state.values.push((selector.to_string(), value.to_string()));
        }
        Ok(exists)
    }

    fn row_cells(&self, row_selector: &str, index: usize) -> Result<Vec<String>, PageError> {
        let html = self.open()?.current_html.clone();
        let doc = Html::parse_document(&html);
        let rows = parse_selector(row_selector)?;
        let cells = doc
            .select(&rows)
            .nth(index)
            .map(|row| {
                row.children()
                    .filter_map(ElementRef::wrap)
                    .filter(|c| c.value().name() == "td")
                    .map(|c| text_of(&c))
                    .collect()
            })
            .unwrap_or_default();
        Ok(cells)
    }

    fn close(&self) {
        self.lock().closed = true;
    }
}

impl SessionLauncher for SnapshotPage {
    fn launch(&self) -> Result<ScrapeSession, PageError> {
        self.lock().closed = false;
        Ok(ScrapeSession::new(Box::new(self.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS: &str = r#"<html><body><table id="grid">
        <tr><th>Permit #</th><th>Type</th></tr>
        <tr><td> B-1 </td><td>Building</td><td><a href="javascript:__doPostBack('g$l0','')">view</a></td></tr>
        <tr><td>B-2</td><td>Fence</td><td><a href="/detail/2">view</a></td></tr>
    </table><a id="next" href="?page=2">Next</a></body></html>"#;

    fn page() -> SnapshotPage {
        SnapshotPage::new()
            .with_page("https://p.gov/results", RESULTS)
            .with_page("https://p.gov/detail/1", "<html><body>Detail one</body></html>")
            .with_page("https://p.gov/detail/2", "<html><body>Detail two</body></html>")
            .on_click("javascript:__doPostBack('g$l0','')", "https://p.gov/detail/1")
            .on_click("/detail/2", "https://p.gov/detail/2")
    }

    #[test]
    fn test_postback_click_reports_navigation_started() {
        let p = page();
        p.navigate("https://p.gov/results", Duration::from_secs(1)).unwrap();
        let before = p.navigation_id().unwrap();
        let target = ClickTarget::RowAnchor {
            row_selector: "#grid tr".into(),
            row_index: 1,
            anchor_selector: "a".into(),
            raw_token: None,
        };
        assert_eq!(p.force_click(&target).unwrap(), ClickOutcome::NavigationStarted);
        assert_eq!(p.current_url(), "https://p.gov/detail/1");
        assert_ne!(p.navigation_id().unwrap(), before);
    }

    #[test]
    fn test_plain_link_click_and_missing_target() {
        let p = page();
        p.navigate("https://p.gov/results", Duration::from_secs(1)).unwrap();
        let target = ClickTarget::RowAnchor {
            row_selector: "#grid tr".into(),
            row_index: 2,
            anchor_selector: "a".into(),
            raw_token: None,
        };
        assert_eq!(p.force_click(&target).unwrap(), ClickOutcome::Clicked);
        assert_eq!(p.current_url(), "https://p.gov/detail/2");
        assert_eq!(p.force_click(&ClickTarget::Css("#nope".into())).unwrap(), ClickOutcome::NotFound);
    }

    #[test]
    fn test_row_anchor_with_unmatched_token_clicks_nothing() {
        let p = page();
        p.navigate("https://p.gov/results", Duration::from_secs(1)).unwrap();
        let target = ClickTarget::RowAnchor {
            row_selector: "#grid tr".into(),
            row_index: 1,
            anchor_selector: "a".into(),
            raw_token: Some("javascript:__doPostBack('g$l9','')".into()),
        };
        assert_eq!(p.force_click(&target).unwrap(), ClickOutcome::NotFound);
        assert_eq!(p.current_url(), "https://p.gov/results");
    }

    #[test]
    fn test_row_cells_reads_td_children_only() {
        let p = page();
        p.navigate("https://p.gov/results", Duration::from_secs(1)).unwrap();
        assert!(p.row_cells("#grid tr", 0).unwrap().is_empty());
        assert_eq!(p.row_cells("#grid tr", 1).unwrap(), vec!["B-1", "Building", "view"]);
        assert!(p.row_cells("#grid tr", 9).unwrap().is_empty());
    }

    #[test]
    fn test_closed_page_refuses_work() {
        let p = page();
        p.close();
        assert!(matches!(p.navigate("https://p.gov/results", Duration::from_secs(1)), Err(PageError::Closed)));
    }

    #[test]
    fn test_unknown_url_is_navigation_error() {
        let p = page();
        assert!(matches!(
            p.navigate("https://p.gov/missing", Duration::from_secs(1)),
            Err(PageError::Navigation { .. })
        ));
    }
}
