//! Turns a [`DetailRef`] into "the detail page is loaded".
//!
//! URL refs are a plain navigation. Postback refs only mean something on the
//! results page they came from, so the row is re-located by permit id on a
//! fresh copy of that page and its postback anchor is force-clicked. Whether
//! the click "worked" is never inferred from the click itself: the poll for a
//! new document at a detail-page URL is the only authority.

use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

use crate::browser::{ClickOutcome, ClickTarget, PortalPage};
use crate::extract::element_text;
use crate::record::DetailRef;
use crate::validators::{collapse_whitespace, contains_phrase};

/// Anchors that can carry a postback.
pub const POSTBACK_ANCHORS: &str =
    "a[href^='javascript'], a[href*='__doPostBack'], a[href*='WebForm_DoPostBack'], a[onclick*='__doPostBack']";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveFailure {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("row for permit not found on results page")]
    RowNotFound,
    #[error("no postback anchor in row")]
    AnchorNotFound,
    #[error("detail page never loaded")]
    NeverArrived,
    #[error("page error: {0}")]
    Page(String),
}

/// Verdict of the postback click itself. Neither `Success` nor
/// `NavigationStarted` is final; the arrival poll decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Dispatched with the document still alive.
    Success,
    Failed(ResolveFailure),
    /// The click tore down the script context.
    NavigationStarted,
}

/// Where the record came from and how to recognise the page it leads to.
#[derive(Debug, Clone, Copy)]
pub struct ResolveTarget<'a> {
    pub permit_id: &'a str,
    pub results_url: &'a str,
    pub row_selector: &'a str,
    pub permit_id_selectors: &'a [&'a str],
    pub detail_patterns: &'a [&'a str],
}

#[derive(Debug, Clone)]
pub struct DetailPageResolver {
    pub navigation_timeout: Duration,
    pub postback_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DetailPageResolver {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            postback_timeout: Duration::from_secs(12),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl DetailPageResolver {
    pub fn new(navigation_timeout: Duration, postback_timeout: Duration) -> Self {
        Self { navigation_timeout, postback_timeout, ..Self::default() }
    }

    /// `Ok` once the detail page is loaded.
    pub async fn resolve(
        &self,
        page: &dyn PortalPage,
        detail: &DetailRef,
        target: &ResolveTarget<'_>,
    ) -> Result<(), ResolveFailure> {
        match detail {
            DetailRef::Url { href } => self.goto(page, href),
            DetailRef::Postback { raw_token } => {
                let (step, before) = self.click_postback(page, raw_token, target)?;
                tracing::debug!("Postback click for {}: {:?}", target.permit_id, step);
                match step {
                    Resolution::Failed(failure) => Err(failure),
                    Resolution::Success | Resolution::NavigationStarted => {
                        self.await_detail(page, &before, target.detail_patterns).await
                    }
                }
            }
        }
    }

    /// Steps 1-4: get onto the results page, find the row, click. Returns the
    /// click's own verdict and the navigation id sampled before it.
    fn click_postback(
        &self,
        page: &dyn PortalPage,
        raw_token: &str,
        target: &ResolveTarget<'_>,
    ) -> Result<(Resolution, String), ResolveFailure> {
        let mut navigated = false;
        if page.current_url() != target.results_url {
            self.goto(page, target.results_url)?;
            navigated = true;
        }

        let mut index = self.locate_row(page, target)?;
        if index.is_none() && !navigated {
            // Same URL but a different document (postback pages keep their URL).
            self.goto(page, target.results_url)?;
            index = self.locate_row(page, target)?;
        }
        let index = index.ok_or(ResolveFailure::RowNotFound)?;

        let before = page.navigation_id().map_err(|e| ResolveFailure::Page(e.to_string()))?;
        let click = ClickTarget::RowAnchor {
            row_selector: target.row_selector.to_string(),
            row_index: index,
            anchor_selector: POSTBACK_ANCHORS.to_string(),
            raw_token: Some(raw_token.to_string()),
        };
        let step = match page.force_click(&click) {
            Ok(ClickOutcome::NotFound) => Resolution::Failed(ResolveFailure::AnchorNotFound),
            Ok(ClickOutcome::NavigationStarted) => Resolution::NavigationStarted,
            Ok(ClickOutcome::Clicked) => Resolution::Success,
            Err(e) => Resolution::Failed(ResolveFailure::Page(e.to_string())),
        };
        Ok((step, before))
    }

    fn goto(&self, page: &dyn PortalPage, url: &str) -> Result<(), ResolveFailure> {
        page.navigate(url, self.navigation_timeout)
            .map_err(|e| ResolveFailure::Navigation(e.to_string()))
    }

    fn locate_row(&self, page: &dyn PortalPage, target: &ResolveTarget<'_>) -> Result<Option<usize>, ResolveFailure> {
        let html = page.content().map_err(|e| ResolveFailure::Page(e.to_string()))?;
        Ok(find_row_index(&html, target))
    }

    /// Step 5.
    async fn await_detail(&self, page: &dyn PortalPage, before: &str, patterns: &[&str]) -> Result<(), ResolveFailure> {
        let deadline = Instant::now() + self.postback_timeout;
        loop {
            if let Ok(now_id) = page.navigation_id() {
                if now_id != before && matches_detail(&page.current_url(), patterns) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(ResolveFailure::NeverArrived);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Best effort; the next candidate re-checks where it is anyway.
    pub fn return_to_results(&self, page: &dyn PortalPage, results_url: &str) -> bool {
        match page.navigate(results_url, self.navigation_timeout) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("↩️ Could not return to results page: {}", e);
                false
            }
        }
    }
}

fn matches_detail(url: &str, patterns: &[&str]) -> bool {
    let lowered = url.to_lowercase();
    patterns.is_empty() || patterns.iter().any(|p| lowered.contains(&p.to_lowercase()))
}

fn normalize_key(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}

/// Index (among `row_selector` matches) of the row whose permit-id text
/// matches: exact first, then whole-word containment either way. A loose
/// match only counts when it is the only one and the two ids are of
/// comparable length; a wrong row is worse than no row.
pub fn find_row_index(html: &str, target: &ResolveTarget<'_>) -> Option<usize> {
    let rows = Selector::parse(target.row_selector).ok()?;
    let id_sels: Vec<Selector> = target.permit_id_selectors.iter().filter_map(|s| Selector::parse(s).ok()).collect();
    let td = Selector::parse("td").ok()?;
    let doc = Html::parse_document(html);

    let ids: Vec<(usize, String)> = doc
        .select(&rows)
        .enumerate()
        .filter_map(|(i, row)| {
            let text = id_sels
                .iter()
                .find_map(|s| row.select(s).map(|e| element_text(&e)).find(|t| !t.is_empty()))
                .or_else(|| row.select(&td).map(|e| element_text(&e)).find(|t| !t.is_empty()))?;
            Some((i, normalize_key(&text)))
        })
        .collect();

    let needle = normalize_key(target.permit_id);
    if needle.is_empty() {
        return None;
    }
    if let Some((i, _)) = ids.iter().find(|(_, id)| *id == needle) {
        return Some(*i);
    }
    let loose: Vec<usize> = ids
        .iter()
        .filter(|(_, id)| loosely_same(id, &needle))
        .map(|(i, _)| *i)
        .collect();
    match loose.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

fn loosely_same(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.chars().any(char::is_alphanumeric) && short.len() * 2 >= long.len() && contains_phrase(long, short)
}
