//! Results-table row extraction.
//!
//! Each field is an ordered chain of [`FieldStrategy`] objects tried until one
//! yields a non-empty value. When the configured selectors miss the permit id
//! or type, the row's `<td>` texts are read in-page and taken by column index.
//! A row that still lacks either is dropped; that is the normal fate of header,
//! spacer and pager rows.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

use super::{company_name_value, element_text};
use crate::browser::PortalPage;
use crate::record::{DetailRef, ExtractionMethod, RawRow};
use crate::validators::collapse_whitespace;

/// Per-family CSS selectors for the results table.
#[derive(Debug, Clone, Copy)]
pub struct SelectorSet {
    /// Matches every candidate row, header and pager rows included.
    pub row: &'static str,
    pub permit_id: &'static [&'static str],
    pub permit_type: &'static [&'static str],
    pub address: &'static [&'static str],
    pub status: &'static [&'static str],
    pub applicant: &'static [&'static str],
    pub detail_link: &'static [&'static str],
    pub columns: ColumnMap,
}

/// Column positions used by the DOM-script fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub permit_id: usize,
    pub permit_type: usize,
    pub address: Option<usize>,
    pub status: Option<usize>,
}

static HEADER_MARKERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "record number", "record #", "record", "record type", "permit number", "permit #",
        "permit no", "permit no.", "permit", "permit type", "type", "case number", "case #",
        "application number", "project number", "number", "status", "address",
    ]
    .into_iter()
    .collect()
});

pub(crate) const POSTBACK_MARKERS: &[&str] = &["__dopostback", "webform_dopostbackwithoptions"];

fn is_header_marker(text: &str) -> bool {
    HEADER_MARKERS.contains(text.trim().trim_end_matches(':').trim().to_lowercase().as_str())
}

/// One `<tr>` (or row-like element) from a parsed results page.
pub struct RowHandle<'a> {
    pub element: ElementRef<'a>,
    /// Position among the adapter's row-selector matches; the same index
    /// addresses the row in the live DOM.
    pub index: usize,
    pub base_url: Option<&'a Url>,
}

impl<'a> RowHandle<'a> {
    /// Cell texts joined by newlines, so label/value regexes stop at cell edges.
    pub fn text(&self) -> String {
        let td = Selector::parse("td").ok();
        let cells: Vec<String> = td
            .as_ref()
            .map(|sel| self.element.select(sel).map(|c| element_text(&c)).filter(|t| !t.is_empty()).collect())
            .unwrap_or_default();
        if cells.is_empty() {
            element_text(&self.element)
        } else {
            cells.join("\n")
        }
    }
}

pub trait FieldStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn try_extract(&self, row: &RowHandle<'_>) -> Option<String>;
}

/// Text of the first element matching a CSS selector.
pub struct CssText {
    selector: Selector,
}

impl CssText {
    pub fn parse(selector: &str) -> Option<Self> {
        match Selector::parse(selector) {
            Ok(selector) => Some(Self { selector }),
            Err(e) => {
                tracing::warn!("Skipping unparsable selector '{}': {:?}", selector, e);
                None
            }
        }
    }
}

impl FieldStrategy for CssText {
    fn name(&self) -> &'static str {
        "css"
    }

    fn try_extract(&self, row: &RowHandle<'_>) -> Option<String> {
        row.element
            .select(&self.selector)
            .map(|el| element_text(&el))
            .find(|t| !t.is_empty())
    }
}

/// `Company Name:` value out of the row's mixed text. Ranked last.
pub struct CompanyNameInText;

impl FieldStrategy for CompanyNameInText {
    fn name(&self) -> &'static str {
        "company-name-text"
    }

    fn try_extract(&self, row: &RowHandle<'_>) -> Option<String> {
        company_name_value(&row.text())
    }
}

#[derive(Default)]
pub struct FieldChain {
    strategies: Vec<Box<dyn FieldStrategy>>,
}

impl FieldChain {
    pub fn from_selectors(selectors: &[&str]) -> Self {
        let strategies = selectors
            .iter()
            .filter_map(|s| CssText::parse(s))
            .map(|s| Box::new(s) as Box<dyn FieldStrategy>)
            .collect();
        Self { strategies }
    }

    pub fn then(mut self, strategy: impl FieldStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn first(&self, row: &RowHandle<'_>) -> Option<String> {
        self.strategies.iter().find_map(|s| {
            let value = s.try_extract(row).map(|v| collapse_whitespace(&v)).filter(|v| !v.is_empty())?;
            tracing::trace!("row {} matched via {}", row.index, s.name());
            Some(value)
        })
    }
}

pub struct RowExtractor {
    source: String,
    row_selector: &'static str,
    permit_id: FieldChain,
    permit_type: FieldChain,
    address: FieldChain,
    status: FieldChain,
    applicant: FieldChain,
    detail_link: Vec<Selector>,
    columns: ColumnMap,
}

impl RowExtractor {
    pub fn new(source: &str, set: &SelectorSet) -> Self {
        Self {
            source: source.to_string(),
            row_selector: set.row,
            permit_id: FieldChain::from_selectors(set.permit_id),
            permit_type: FieldChain::from_selectors(set.permit_type),
            address: FieldChain::from_selectors(set.address),
            status: FieldChain::from_selectors(set.status),
            applicant: FieldChain::from_selectors(set.applicant).then(CompanyNameInText),
            detail_link: set.detail_link.iter().filter_map(|s| Selector::parse(s).ok()).collect(),
            columns: set.columns,
        }
    }

    /// Extracts every data row of `html`. Rows that cannot be read are skipped.
    pub fn extract_all(&self, page: &dyn PortalPage, html: &str, page_url: &str) -> Vec<RawRow> {
        let Ok(row_sel) = Selector::parse(self.row_selector) else {
            tracing::warn!("Row selector '{}' does not parse", self.row_selector);
            return Vec::new();
        };
        let base = Url::parse(page_url).ok();
        let doc = Html::parse_document(html);

        doc.select(&row_sel)
            .enumerate()
            .filter_map(|(index, element)| {
                let handle = RowHandle { element, index, base_url: base.as_ref() };
                self.extract(page, &handle)
            })
            .collect()
    }

    pub fn extract(&self, page: &dyn PortalPage, row: &RowHandle<'_>) -> Option<RawRow> {
        let mut permit_id = self.permit_id.first(row);
        let mut permit_type = self.permit_type.first(row);
        let mut address = self.address.first(row);
        let mut status = self.status.first(row);
        let mut method = ExtractionMethod::Selector;

        if permit_id.is_none() || permit_type.is_none() {
            let cells = match page.row_cells(self.row_selector, row.index) {
                Ok(cells) => cells,
                Err(e) => {
                    tracing::debug!("Cell script failed for row {}: {}", row.index, e);
                    Vec::new()
                }
            };
            let cell = |i: usize| cells.get(i).map(|c| collapse_whitespace(c)).filter(|c| !c.is_empty());
            if !cells.is_empty() {
                method = ExtractionMethod::DomScript;
                permit_id = permit_id.or_else(|| cell(self.columns.permit_id));
                permit_type = permit_type.or_else(|| cell(self.columns.permit_type));
                address = address.or_else(|| self.columns.address.and_then(cell));
                status = status.or_else(|| self.columns.status.and_then(cell));
            }
        }

        let (permit_id, permit_type) = match (permit_id, permit_type) {
            (Some(id), Some(ty)) if !is_header_marker(&id) && !is_header_marker(&ty) => (id, ty),
            _ => {
                tracing::debug!("Dropping row {} (no permit id/type)", row.index);
                return None;
            }
        };

        Some(RawRow {
            source: self.source.clone(),
            permit_id,
            permit_type,
            address,
            status: status.unwrap_or_default(),
            applicant_name: self.applicant.first(row),
            detail_ref: self.detail_ref(row),
            extraction_method: method,
        })
    }

    fn detail_ref(&self, row: &RowHandle<'_>) -> Option<DetailRef> {
        self.detail_link.iter().find_map(|sel| {
            row.element.select(sel).find_map(|a| {
                let href = a.value().attr("href").unwrap_or_default();
                classify_link(href, row.base_url).or_else(|| {
                    // Some grids leave href="#" and carry the postback in onclick.
                    a.value()
                        .attr("onclick")
                        .filter(|js| is_postback(js))
                        .map(|js| DetailRef::Postback { raw_token: js.trim().to_string() })
                })
            })
        })
    }
}

pub(crate) fn is_postback(href: &str) -> bool {
    let lowered = href.trim().to_lowercase();
    lowered.starts_with("javascript:") || POSTBACK_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Postback tokens are stored verbatim; anything else is made absolute.
pub fn classify_link(href: &str, base: Option<&Url>) -> Option<DetailRef> {
    let href = href.trim();
    if href.is_empty() || href == "#" {
        return None;
    }
    if is_postback(href) {
        return Some(DetailRef::Postback { raw_token: href.to_string() });
    }
    let absolute = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    Some(DetailRef::Url { href: absolute.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::SnapshotPage;
    use std::time::Duration;

    const SET: SelectorSet = SelectorSet {
        row: "table#results tr",
        permit_id: &["td.id a", "td.id"],
        permit_type: &["td.type"],
        address: &["td.addr"],
        status: &["td.status"],
        applicant: &[],
        detail_link: &["td.id a"],
        columns: ColumnMap { permit_id: 0, permit_type: 1, address: Some(2), status: Some(3) },
    };

    const URL: &str = "https://permits.example.gov/search/results";

    fn run(html: &str) -> Vec<RawRow> {
        let page = SnapshotPage::new().with_page(URL, html);
        page.navigate(URL, Duration::from_secs(1)).unwrap();
        RowExtractor::new("test_X_building", &SET).extract_all(&page, html, URL)
    }

    #[test]
    fn test_header_row_excluded_and_all_data_rows_kept() {
        let html = r#"<table id="results">
            <tr><th>Record Number</th><th>Type</th><th>Address</th><th>Status</th></tr>
            <tr><td class="id"><a href="/detail/1">B-1</a></td><td class="type">Building</td><td class="addr">1 Main St</td><td class="status">Issued</td></tr>
            <tr><td class="id"><a href="/detail/2">B-2</a></td><td class="type">Fence</td><td class="addr">2 Oak Ave</td><td class="status">Pending</td></tr>
            <tr><td class="id"><a href="/detail/3">B-3</a></td><td class="type">Roof</td><td class="addr">3 Elm Dr</td><td class="status">Finaled</td></tr>
        </table>"#;
        let rows = run(html);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.extraction_method == ExtractionMethod::Selector));
        assert_eq!(
            rows[0].detail_ref,
            Some(DetailRef::Url { href: "https://permits.example.gov/detail/1".into() })
        );
    }

    #[test]
    fn test_header_made_of_td_is_rejected_by_marker() {
        let html = r#"<table id="results">
            <tr><td>Permit #</td><td>Type</td><td>Address</td><td>Status</td></tr>
            <tr><td>B-9</td><td>Pool</td><td>9 Bay Ct</td><td>Issued</td></tr>
        </table>"#;
        let rows = run(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].permit_id, "B-9");
        assert_eq!(rows[0].extraction_method, ExtractionMethod::DomScript);
        assert_eq!(rows[0].address.as_deref(), Some("9 Bay Ct"));
        assert_eq!(rows[0].status, "Issued");
    }

    #[test]
    fn test_short_and_spacer_rows_dropped() {
        let html = r#"<table id="results">
            <tr><td colspan="4">&nbsp;</td></tr>
            <tr><td>B-4</td></tr>
            <tr><td class="id">B-5</td><td class="type">Sign</td></tr>
        </table>"#;
        let rows = run(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].permit_id, "B-5");
        assert_eq!(rows[0].address, None);
    }

    #[test]
    fn test_postback_link_kept_as_token() {
        let html = r#"<table id="results">
            <tr><td class="id"><a href="javascript:__doPostBack('ctl00$grid$ctl02$lnk','')">FA-2025-001</a></td>
                <td class="type">Fire Alarm</td>
                <td class="addr">Company Name:Acme Fire LLCLicense Type:Installer</td></tr>
        </table>"#;
        let rows = run(html);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(
            row.detail_ref,
            Some(DetailRef::Postback { raw_token: "javascript:__doPostBack('ctl00$grid$ctl02$lnk','')".into() })
        );
        assert_eq!(row.applicant_name.as_deref(), Some("Acme Fire LLC"));
    }

    #[test]
    fn test_onclick_postback_when_href_is_hash() {
        let html = r##"<table id="results">
            <tr><td class="id"><a href="#" onclick="__doPostBack('grid','Select$0')">B-7</a></td><td class="type">Demo</td></tr>
        </table>"##;
        let rows = run(html);
        assert!(matches!(rows[0].detail_ref, Some(DetailRef::Postback { .. })));
    }

    #[test]
    fn test_classify_link() {
        let base = Url::parse("https://aca-prod.accela.com/COSA/Cap/CapHome.aspx").unwrap();
        assert_eq!(
            classify_link("CapDetail.aspx?Module=Fire&capID1=25FIR", Some(&base)),
            Some(DetailRef::Url { href: "https://aca-prod.accela.com/COSA/Cap/CapDetail.aspx?Module=Fire&capID1=25FIR".into() })
        );
        assert!(matches!(
            classify_link("JavaScript:void(0)", Some(&base)),
            Some(DetailRef::Postback { .. })
        ));
        assert_eq!(classify_link("#", Some(&base)), None);
        assert_eq!(classify_link("relative/only", None), None);
    }
}
