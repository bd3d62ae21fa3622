//! Field extraction from results rows and detail pages.

pub mod detail;
pub mod row;

pub use detail::{extract_detail_fields, DetailFields};
pub use row::{ColumnMap, FieldStrategy, RowExtractor, RowHandle, SelectorSet};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::ElementRef;

/// `Company Name:` value, up to the next known label, newline or end of text.
static COMPANY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)company\s+name\s*:\s*([^\n]*?)\s*(?:license\s+type|type\s+of\s+work|license\s+number|\n|$)")
        .unwrap()
});

/// Last-resort splitter for text blobs that mix several labelled fields,
/// e.g. `Company Name:Acme Fire LLCLicense Type:Installer`.
pub fn company_name_value(text: &str) -> Option<String> {
    COMPANY_NAME
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .find(|v| !v.is_empty())
}

/// Whitespace-collapsed text content of an element.
pub(crate) fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_name_from_glued_blob() {
        assert_eq!(
            company_name_value("Company Name:Acme Fire LLCLicense Type:Installer").as_deref(),
            Some("Acme Fire LLC")
        );
    }

    #[test]
    fn test_company_name_across_lines() {
        let text = "Contractor\nCompany Name:\nTX Septic Systems LLC\nLicense Type: Plumber";
        assert_eq!(company_name_value(text).as_deref(), Some("TX Septic Systems LLC"));
    }

    #[test]
    fn test_company_name_until_end_of_text() {
        assert_eq!(company_name_value("company name: Alamo Sprinkler Co").as_deref(), Some("Alamo Sprinkler Co"));
        assert_eq!(company_name_value("Applicant: Jane Doe"), None);
    }
}
