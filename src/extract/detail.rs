//! Applicant/address extraction from a loaded detail page.
//!
//! Read-only: works on a DOM snapshot plus the rendered body text. Strategies
//! are ranked structural-first; the body-text regexes only run when nothing in
//! the markup produced a value that passes the validators.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{company_name_value, element_text};
use crate::validators::{clean_address, clean_applicant};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub applicant: Option<String>,
    pub address: Option<String>,
}

/// Longer text under a matching id is a whole section, not a value.
const MAX_VALUE_LEN: usize = 160;

static APPLICANT_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)applicant|contractor").unwrap());
static ADDRESS_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)address|location").unwrap());

static APPLICANT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(applicant|contractor)(\s+name)?\s*:?\s*$").unwrap());
static ADDRESS_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*((site|work|property|project|permit)\s+)?(address|location)\s*:?\s*$").unwrap()
});

static ADDRESS_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:(?:site|work|property|project)\s+)?(?:address|location)\s*:\s*([^\n]+)").unwrap()
});

trait DetailStrategy {
    fn candidates(&self, doc: &Html, body_text: &str) -> Vec<String>;
}

/// Elements whose `id` or `name` matches a pattern.
struct AttrMatch(&'static Lazy<Regex>);

impl DetailStrategy for AttrMatch {
    fn candidates(&self, doc: &Html, _body_text: &str) -> Vec<String> {
        let Ok(sel) = Selector::parse("[id], [name]") else {
            return Vec::new();
        };
        doc.select(&sel)
            .filter(|el| !matches!(el.value().name(), "label" | "script" | "style" | "form" | "table" | "tbody"))
            .filter(|el| {
                let v = el.value();
                v.attr("id").map(|s| self.0.is_match(s)).unwrap_or(false)
                    || v.attr("name").map(|s| self.0.is_match(s)).unwrap_or(false)
            })
            .filter_map(|el| value_of(&el))
            .collect()
    }
}

/// `<label>` (via `for`) and label-like cells (`th`, `dt`, `td`, `span`, ...)
/// whose own text is the field label; the value is the associated control or
/// the next sibling element.
struct LabelProximity(&'static Lazy<Regex>);

impl DetailStrategy for LabelProximity {
    fn candidates(&self, doc: &Html, _body_text: &str) -> Vec<String> {
        let Ok(sel) = Selector::parse("label, th, dt, td, span, strong, b, div") else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for el in doc.select(&sel) {
            if !self.0.is_match(&element_text(&el)) {
                continue;
            }
            if el.value().name() == "label" {
                if let Some(target) = el.value().attr("for").and_then(|id| by_id(doc, id)) {
                    if let Some(v) = value_of(&target) {
                        out.push(v);
                        continue;
                    }
                }
            }
            if let Some(v) = el.next_siblings().filter_map(ElementRef::wrap).find_map(|s| value_of(&s)) {
                out.push(v);
            }
        }
        out
    }
}

struct BodyPattern(fn(&str) -> Vec<String>);

impl DetailStrategy for BodyPattern {
    fn candidates(&self, _doc: &Html, body_text: &str) -> Vec<String> {
        (self.0)(body_text)
    }
}

fn company_name_lines(text: &str) -> Vec<String> {
    company_name_value(text).into_iter().collect()
}

fn address_lines(text: &str) -> Vec<String> {
    ADDRESS_TEXT
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .collect()
}

fn by_id<'a>(doc: &'a Html, id: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(&format!("[id=\"{}\"]", id.replace('"', ""))).ok()?;
    doc.select(&sel).next()
}

/// Input value, selected option, or short text content.
fn value_of(el: &ElementRef<'_>) -> Option<String> {
    let v = el.value();
    let raw = match v.name() {
        "input" | "textarea" => v.attr("value").map(str::to_string).unwrap_or_else(|| element_text(el)),
        "select" => {
            let opt = Selector::parse("option[selected]").ok()?;
            el.select(&opt).next().map(|o| element_text(&o))?
        }
        _ => element_text(el),
    };
    let raw = raw.trim().to_string();
    if raw.is_empty() || raw.chars().count() > MAX_VALUE_LEN {
        None
    } else {
        Some(raw)
    }
}

fn first_accepted(
    strategies: &[&dyn DetailStrategy],
    doc: &Html,
    body_text: &str,
    gate: fn(&str) -> Option<String>,
) -> Option<String> {
    strategies
        .iter()
        .find_map(|s| s.candidates(doc, body_text).iter().find_map(|c| gate(c)))
}

/// Never fails: a page with no recognisable fields yields `DetailFields::default()`.
pub fn extract_detail_fields(html: &str, body_text: &str) -> DetailFields {
    let doc = Html::parse_document(html);

    let applicant = first_accepted(
        &[
            &AttrMatch(&APPLICANT_ATTR),
            &LabelProximity(&APPLICANT_LABEL),
            &BodyPattern(company_name_lines),
        ],
        &doc,
        body_text,
        clean_applicant,
    );
    let address = first_accepted(
        &[
            &AttrMatch(&ADDRESS_ATTR),
            &LabelProximity(&ADDRESS_LABEL),
            &BodyPattern(address_lines),
        ],
        &doc,
        body_text,
        clean_address,
    );

    DetailFields { applicant, address }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applicant_from_id_match() {
        let html = r#"<div><span id="ctl00_PlaceHolderMain_lblApplicant">Alamo Fire Protection LLC</span></div>"#;
        let fields = extract_detail_fields(html, "");
        assert_eq!(fields.applicant.as_deref(), Some("Alamo Fire Protection LLC"));
    }

    #[test]
    fn test_label_for_association() {
        let html = r#"<form>
            <label for="f1">Contractor</label><input id="f1" value="Company Name: Lone Star Sprinkler Inc">
            <label for="f2">Site Address</label><input id="f2" value="Location: 4501 Broadway St">
        </form>"#;
        let fields = extract_detail_fields(html, "");
        assert_eq!(fields.applicant.as_deref(), Some("Lone Star Sprinkler Inc"));
        assert_eq!(fields.address.as_deref(), Some("4501 Broadway St"));
    }

    #[test]
    fn test_label_cell_sibling() {
        let html = r#"<table><tr><th>Applicant:</th><td>Bexar Builders</td></tr>
            <tr><th>Address</th><td>12 Pecan Ln</td></tr></table>"#;
        let fields = extract_detail_fields(html, "");
        assert_eq!(fields.applicant.as_deref(), Some("Bexar Builders"));
        assert_eq!(fields.address.as_deref(), Some("12 Pecan Ln"));
    }

    #[test]
    fn test_rejected_candidates_fall_through_to_text() {
        // The id match only yields the label text; its sibling carries the value.
        let html = r#"<div id="applicantHeader">Applicant:</div><p>Company Name: TX Septic Systems LLC</p>"#;
        let body = "Applicant:\nCompany Name: TX Septic Systems LLC\nLicense Type: Plumber";
        let fields = extract_detail_fields(html, body);
        assert_eq!(fields.applicant.as_deref(), Some("TX Septic Systems LLC"));
    }

    #[test]
    fn test_section_header_never_becomes_address() {
        let html = r#"<div id="locationHeader">Location Information</div><div>Work Location</div><div>PERMIT INFORMATION</div>"#;
        let fields = extract_detail_fields(html, "Location Information\nWork Location\nPERMIT INFORMATION");
        assert_eq!(fields.address, None);
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        assert_eq!(extract_detail_fields("", ""), DetailFields::default());
    }

    #[test]
    fn test_address_from_body_text() {
        let body = "Record FA-1\nWork Location: 100 Military Dr, San Antonio TX\nStatus: Issued";
        let fields = extract_detail_fields("<p></p>", body);
        assert_eq!(fields.address.as_deref(), Some("100 Military Dr, San Antonio TX"));
    }
}
