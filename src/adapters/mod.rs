//! Per-family portal adapters and the search state machine that drives them.
//!
//! A family is a [`FamilyProfile`] (selectors, markers, pager, date format)
//! plus the handful of interactions that genuinely differ between portals.
//! Everything that reads the DOM runs in synchronous helpers: `scraper::Html`
//! is not `Send`, and adapter futures have to be.

pub mod accela;
pub mod energov;
pub mod posse;
pub mod viewpoint;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use scraper::{ElementRef, Html, Selector};
use tokio::time::{sleep, Instant};

use crate::browser::{ClickOutcome, ClickTarget, PortalPage};
use crate::config::{PortalFamily, ScrapeConfig};
use crate::error::{EngineError, EngineResult};
use crate::extract::{element_text, RowExtractor, SelectorSet};
use crate::record::RawRow;
use crate::validators::contains_phrase;

pub use accela::AccelaAdapter;
pub use energov::EnergovAdapter;
pub use posse::PosseAdapter;
pub use viewpoint::ViewpointAdapter;

/// How a family exposes "go to the next page".
#[derive(Debug, Clone, Copy)]
pub struct Pager {
    /// Dedicated Next controls, tried in order.
    pub next_selectors: &'static [&'static str],
    /// Container of page links; searched for `next_texts` and for `current+1`.
    pub link_scope: &'static str,
    pub next_texts: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct FamilyProfile {
    pub family: PortalFamily,
    pub selectors: SelectorSet,
    /// Present once the results view has rendered, with or without rows.
    pub results_container: &'static [&'static str],
    /// Lowercase body-text markers of an empty result set.
    pub no_records_markers: &'static [&'static str],
    /// Lowercase markers of a portal error page.
    pub error_markers: &'static [&'static str],
    pub pager: Pager,
    /// Substrings identifying a detail-page URL.
    pub detail_patterns: &'static [&'static str],
    /// chrono format for date filter inputs.
    pub date_format: &'static str,
}

const COMMON_ERRORS: &[&str] = &[
    "server error in '/' application",
    "an unexpected error has occurred",
    "runtime error",
    "service unavailable",
    "the page cannot be displayed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsState {
    Loaded,
    NoRecords,
}

#[async_trait]
pub trait PortalAdapter: Send + Sync {
    fn profile(&self) -> &FamilyProfile;

    fn config(&self) -> &ScrapeConfig;

    fn search_url(&self) -> String;

    fn source(&self) -> String {
        self.config().source()
    }

    /// Init → SearchFormReady.
    async fn open_search(&self, page: &dyn PortalPage) -> EngineResult<()> {
        let url = self.search_url();
        tracing::info!("🏛️ Opening search form: {}", url);
        page.navigate(&url, self.config().navigation_timeout())?;
        sleep(self.config().settle()).await;
        Ok(())
    }

    async fn fill_filters(&self, page: &dyn PortalPage) -> EngineResult<()>;

    /// SearchFormReady → Searching. The one family-specific submission step.
    async fn submit_search(&self, page: &dyn PortalPage) -> EngineResult<()>;

    /// Searching → ResultsLoaded (or an empty, valid result).
    async fn await_results(&self, page: &dyn PortalPage) -> EngineResult<ResultsState> {
        wait_for_results(page, self.profile(), self.config().navigation_timeout()).await
    }

    fn extract_page(&self, page: &dyn PortalPage) -> EngineResult<Vec<RawRow>> {
        let html = page.content()?;
        let extractor = RowExtractor::new(&self.source(), &self.profile().selectors);
        Ok(extractor.extract_all(page, &html, &page.current_url()))
    }

    /// Clicks the next-page control. `false` when there is none or it is disabled.
    async fn next_page(&self, page: &dyn PortalPage, current: u32) -> EngineResult<bool> {
        let html = page.content()?;
        let Some(target) = find_next_control(&html, &self.profile().pager, current) else {
            return Ok(false);
        };
        let before_rows = row_fingerprint(&html, self.profile().selectors.row);
        let before_nav = page.navigation_id()?;

        match page.force_click(&target)? {
            ClickOutcome::NotFound => return Ok(false),
            ClickOutcome::Clicked | ClickOutcome::NavigationStarted => {}
        }

        let deadline = Instant::now() + self.config().navigation_timeout();
        loop {
            sleep(self.config().settle().max(std::time::Duration::from_millis(100))).await;
            let nav_changed = page.navigation_id().map(|id| id != before_nav).unwrap_or(false);
            let rows_changed = page
                .content()
                .map(|h| row_fingerprint(&h, self.profile().selectors.row) != before_rows)
                .unwrap_or(false);
            if nav_changed || rows_changed {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                tracing::warn!("⏭️ Clicked next page {} but results never changed", current + 1);
                return Ok(false);
            }
        }
    }
}

/// Adapter for a configuration.
pub fn adapter_for(config: &ScrapeConfig) -> Box<dyn PortalAdapter> {
    match config.family {
        PortalFamily::Accela => Box::new(AccelaAdapter::new(config.clone())),
        PortalFamily::Energov => Box::new(EnergovAdapter::new(config.clone())),
        PortalFamily::Viewpoint => Box::new(ViewpointAdapter::new(config.clone())),
        PortalFamily::Posse => Box::new(PosseAdapter::new(config.clone())),
    }
}

pub fn profile_for(family: PortalFamily) -> &'static FamilyProfile {
    match family {
        PortalFamily::Accela => &accela::PROFILE,
        PortalFamily::Energov => &energov::PROFILE,
        PortalFamily::Viewpoint => &viewpoint::PROFILE,
        PortalFamily::Posse => &posse::PROFILE,
    }
}

/// `(from, to)` for a lookback window ending today. Clamped to the earliest
/// representable date.
pub fn date_range(lookback_days: u32, format: &str) -> (String, String) {
    let today = Local::now().date_naive();
    let from = today
        .checked_sub_signed(ChronoDuration::days(i64::from(lookback_days)))
        .unwrap_or(NaiveDate::MIN);
    (from.format(format).to_string(), today.format(format).to_string())
}

/// Sets the date (and optional record-type) filters. Missing date inputs mean
/// the form did not render, which is a page-level failure.
pub(crate) fn apply_filters(
    page: &dyn PortalPage,
    config: &ScrapeConfig,
    profile: &FamilyProfile,
    from_selector: &str,
    to_selector: &str,
    type_selector: &str,
) -> EngineResult<()> {
    let (from, to) = date_range(config.lookback_days, profile.date_format);
    if !page.set_value(from_selector, &from)? {
        return Err(EngineError::MissingControl(from_selector.to_string()));
    }
    if !page.set_value(to_selector, &to)? {
        return Err(EngineError::MissingControl(to_selector.to_string()));
    }
    if let Some(record_type) = config.record_type.as_deref() {
        if !page.set_value(type_selector, record_type)? {
            tracing::warn!("Record type filter '{}' has no control on this portal; searching all types", record_type);
        }
    }
    tracing::info!("📅 Filters set: {} → {}", from, to);
    Ok(())
}

/// First selector that matches something on the current page.
pub(crate) fn first_present(page: &dyn PortalPage, selectors: &[&'static str]) -> EngineResult<Option<&'static str>> {
    let html = page.content()?;
    Ok(first_present_in(&html, selectors))
}

fn first_present_in(html: &str, selectors: &[&'static str]) -> Option<&'static str> {
    let doc = Html::parse_document(html);
    selectors.iter().copied().find(|s| {
        Selector::parse(s).map(|sel| doc.select(&sel).next().is_some()).unwrap_or(false)
    })
}

/// Classifies the current document; `None` while it is still loading.
pub fn classify_results(html: &str, profile: &FamilyProfile) -> Result<Option<ResultsState>, String> {
    let doc = Html::parse_document(html);
    let text = Selector::parse("body")
        .ok()
        .and_then(|b| doc.select(&b).next().map(|el| element_text(&el).to_lowercase()))
        .unwrap_or_default();

    if let Some(marker) = COMMON_ERRORS.iter().chain(profile.error_markers).find(|m| text.contains(**m)) {
        return Err((*marker).to_string());
    }
    let has = |selectors: &[&str]| {
        selectors
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .any(|sel| doc.select(&sel).next().is_some())
    };
    // Empty grids often still render their header row, so the marker wins,
    // except that a count such as "0 results" loses to a rendered data row.
    if let Some(marker) = profile.no_records_markers.iter().find(|m| contains_phrase(&text, m)) {
        let count_style = marker.starts_with(|c: char| c.is_ascii_digit());
        if !(count_style && has_data_row(&doc, &profile.selectors)) {
            return Ok(Some(ResultsState::NoRecords));
        }
    }
    if has(profile.results_container) || has(&[profile.selectors.row][..]) {
        return Ok(Some(ResultsState::Loaded));
    }
    Ok(None)
}

/// A row carrying a non-empty permit id.
fn has_data_row(doc: &Html, selectors: &SelectorSet) -> bool {
    let Ok(row_sel) = Selector::parse(selectors.row) else {
        return false;
    };
    let id_sels: Vec<Selector> = selectors.permit_id.iter().filter_map(|s| Selector::parse(s).ok()).collect();
    doc.select(&row_sel).any(|row| {
        id_sels
            .iter()
            .any(|sel| row.select(sel).next().is_some_and(|el| !element_text(&el).is_empty()))
    })
}

pub async fn wait_for_results(
    page: &dyn PortalPage,
    profile: &FamilyProfile,
    timeout: std::time::Duration,
) -> EngineResult<ResultsState> {
    let deadline = Instant::now() + timeout;
    loop {
        let html = page.content()?;
        match classify_results(&html, profile) {
            Err(marker) => return Err(EngineError::PortalError(marker)),
            Ok(Some(state)) => {
                tracing::info!("📋 Results view ready ({:?}) at {}", state, page.current_url());
                return Ok(state);
            }
            Ok(None) => {}
        }
        if Instant::now() >= deadline {
            return Err(EngineError::ResultsTimeout(timeout.as_secs()));
        }
        sleep(std::time::Duration::from_millis(250)).await;
    }
}

fn is_enabled(el: &ElementRef<'_>) -> bool {
    let disabled_class = |e: &ElementRef<'_>| {
        e.value()
            .attr("class")
            .map(|c| c.split_whitespace().any(|k| k.eq_ignore_ascii_case("disabled") || k == "aspNetDisabled"))
            .unwrap_or(false)
    };
    let v = el.value();
    if v.attr("disabled").is_some() || v.attr("aria-disabled") == Some("true") || disabled_class(el) {
        return false;
    }
    // Pagers often mark the wrapping <li>/<span> instead of the anchor.
    !el.parent().and_then(ElementRef::wrap).map(|p| disabled_class(&p)).unwrap_or(false)
}

/// Next control: dedicated selectors, then a "Next" link in the pager, then
/// the `current+1` page number.
pub fn find_next_control(html: &str, pager: &Pager, current: u32) -> Option<ClickTarget> {
    let doc = Html::parse_document(html);

    for raw in pager.next_selectors {
        let Ok(sel) = Selector::parse(raw) else { continue };
        if let Some(el) = doc.select(&sel).next() {
            return is_enabled(&el).then(|| ClickTarget::Css(raw.to_string()));
        }
    }

    let scope = Selector::parse(pager.link_scope).ok()?;
    let links: Vec<ElementRef<'_>> = doc.select(&scope).collect();
    let wanted = (current + 1).to_string();

    pager
        .next_texts
        .iter()
        .find_map(|t| link_with_text(&links, t))
        .or_else(|| link_with_text(&links, &wanted))
        .filter(is_enabled)
        .map(|el| ClickTarget::LinkText { scope: pager.link_scope.to_string(), text: element_text(&el) })
}

fn link_with_text<'a>(links: &[ElementRef<'a>], text: &str) -> Option<ElementRef<'a>> {
    links.iter().copied().find(|el| element_text(el).eq_ignore_ascii_case(text))
}

/// Joined row texts, used to notice in-place result refreshes.
pub fn row_fingerprint(html: &str, row_selector: &str) -> String {
    let Ok(sel) = Selector::parse(row_selector) else {
        return String::new();
    };
    let doc = Html::parse_document(html);
    doc.select(&sel).map(|r| element_text(&r)).collect::<Vec<_>>().join("|")
}

/// Drives one adapter through
/// `Init → SearchFormReady → Searching → ResultsLoaded → {PageExtracted →
/// NextPageRequested → ResultsLoaded}* → Done`.
pub struct SearchDriver<'a> {
    adapter: &'a dyn PortalAdapter,
    state: SearchState,
    page_no: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Init,
    SearchFormReady,
    Searching,
    ResultsLoaded,
    PageExtracted,
    NextPageRequested,
    Done,
}

impl SearchState {
    fn name(&self) -> &'static str {
        match self {
            SearchState::Init => "Init",
            SearchState::SearchFormReady => "SearchFormReady",
            SearchState::Searching => "Searching",
            SearchState::ResultsLoaded => "ResultsLoaded",
            SearchState::PageExtracted => "PageExtracted",
            SearchState::NextPageRequested => "NextPageRequested",
            SearchState::Done => "Done",
        }
    }

    fn can_move_to(&self, to: SearchState) -> bool {
        use SearchState::*;
        matches!(
            (self, to),
            (Init, SearchFormReady)
                | (SearchFormReady, Searching)
                | (Searching, ResultsLoaded)
                | (Searching, Done)
                | (ResultsLoaded, PageExtracted)
                | (PageExtracted, NextPageRequested)
                | (PageExtracted, Done)
                | (NextPageRequested, ResultsLoaded)
                | (NextPageRequested, Done)
        )
    }
}

/// Rows of one results page and the URL they were read from.
#[derive(Debug)]
pub struct ExtractedPage {
    pub page_no: u32,
    pub url: String,
    pub rows: Vec<RawRow>,
}

impl<'a> SearchDriver<'a> {
    pub fn new(adapter: &'a dyn PortalAdapter) -> Self {
        Self { adapter, state: SearchState::Init, page_no: 0 }
    }

    fn move_to(&mut self, to: SearchState) -> EngineResult<()> {
        if !self.state.can_move_to(to) {
            return Err(EngineError::InvalidState { from: self.state.name(), to: to.name() });
        }
        tracing::debug!("Search state {} → {}", self.state.name(), to.name());
        self.state = to;
        Ok(())
    }

    /// Runs the search once. `NoRecords` leaves the driver in `Done`.
    pub async fn search(&mut self, page: &dyn PortalPage) -> EngineResult<ResultsState> {
        self.adapter.open_search(page).await?;
        self.move_to(SearchState::SearchFormReady)?;

        self.adapter.fill_filters(page).await?;
        self.adapter.submit_search(page).await?;
        self.move_to(SearchState::Searching)?;

        let state = self.adapter.await_results(page).await?;
        match state {
            ResultsState::Loaded => {
                self.move_to(SearchState::ResultsLoaded)?;
                self.page_no = 1;
            }
            ResultsState::NoRecords => {
                tracing::info!("📭 Portal reported no records for this search");
                self.move_to(SearchState::Done)?;
            }
        }
        Ok(state)
    }

    pub fn extract(&mut self, page: &dyn PortalPage) -> EngineResult<ExtractedPage> {
        let url = page.current_url();
        let rows = self.adapter.extract_page(page)?;
        self.move_to(SearchState::PageExtracted)?;
        tracing::info!("📄 Page {}: {} rows", self.page_no, rows.len());
        Ok(ExtractedPage { page_no: self.page_no, url, rows })
    }

    /// Moves to the next page. `false` means the driver is now `Done`.
    pub async fn advance(&mut self, page: &dyn PortalPage, rows_on_page: usize) -> EngineResult<bool> {
        if rows_on_page < self.adapter.config().min_rows_per_page {
            tracing::debug!("Only {} rows on page {}, treating it as the last", rows_on_page, self.page_no);
            self.move_to(SearchState::Done)?;
            return Ok(false);
        }
        self.move_to(SearchState::NextPageRequested)?;
        if !self.adapter.next_page(page, self.page_no).await? {
            self.move_to(SearchState::Done)?;
            return Ok(false);
        }
        // A postback pager commits a new document; let it finish rendering.
        if self.adapter.await_results(page).await? == ResultsState::NoRecords {
            self.move_to(SearchState::Done)?;
            return Ok(false);
        }
        self.move_to(SearchState::ResultsLoaded)?;
        self.page_no += 1;
        Ok(true)
    }

    /// Stops paging early (page budget reached).
    pub fn finish(&mut self) {
        self.state = SearchState::Done;
    }
}
