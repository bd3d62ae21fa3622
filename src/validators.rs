//! Field quality gates.
//!
//! Every value that ends up on a `PermitRecord` goes through one of these.
//! They are total and fail closed: a missing field is preferred over a
//! polluted one.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static STREET_TOKENS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "st", "street", "ave", "av", "avenue", "rd", "road", "dr", "drive", "blvd",
        "boulevard", "ln", "lane", "way", "ct", "court", "pl", "place", "pkwy",
        "parkway", "hwy", "highway", "cir", "circle", "trl", "trail", "loop", "ter",
        "terrace", "fwy", "freeway", "expy", "sq", "square", "pike", "row", "plz",
        "plaza", "run", "pass", "xing", "crossing", "cv", "cove", "aly", "alley",
    ]
    .into_iter()
    .collect()
});

static PLACEHOLDERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "n/a", "na", "n.a.", "none", "tbd", "unknown", "null", "-", "--", "---",
        "not available", "not applicable", "see attached", "pending", "various",
        "no address", "address",
    ]
    .into_iter()
    .collect()
});

static SECTION_HEADERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "company information",
        "permit information",
        "type of work",
        "applicant information",
        "contractor information",
        "owner information",
        "project information",
        "project description",
        "location information",
        "work location",
        "license type",
        "licensed professional",
        "record details",
        "more details",
        "property information",
        "parcel information",
        "additional information",
        "application information",
        "related contacts",
        "inspections",
        "fees",
        "location",
    ]
    .into_iter()
    .collect()
});

static INVALID_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "applicant", "individual", "n/a", "na", "none", "null", "unknown", "tbd",
        "contractor", "owner", "company", "company name", "organization", "org",
        "name", "not applicable", "see below", "see above", "self", "-", "--",
    ]
    .into_iter()
    .collect()
});

/// Labels that only appear inside company-info blobs, never in a real address.
const BLOB_LABELS: &[&str] = &["company name:", "license type:", "license number:", "type of work:"];

static NAME_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(organization|org|company name|applicant|contractor|owner)\s*(?::\s*|\s+)")
        .unwrap()
});

static LOCATION_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*location\b[\s:\-]*").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// `phrase` occurs in `text` bounded by non-alphanumerics on both sides, so
/// "0 results" is not in "120 results".
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    !phrase.is_empty()
        && text.match_indices(phrase).any(|(at, _)| {
            let before = text[..at].chars().next_back();
            let after = text[at + phrase.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
}

/// Lowercased, whitespace-collapsed, trailing colon removed. Used for set lookups.
fn lookup_key(text: &str) -> String {
    collapse_whitespace(text)
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
}

fn has_street_token(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|w| STREET_TOKENS.contains(w.to_lowercase().as_str()))
}

fn is_shouting(text: &str) -> bool {
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(|c| c.is_uppercase())
}

pub fn is_section_header(text: &str) -> bool {
    SECTION_HEADERS.contains(lookup_key(text).as_str())
}

pub fn is_poor_quality_address(text: &str) -> bool {
    let collapsed = collapse_whitespace(text);
    if collapsed.chars().count() < 5 {
        return true;
    }
    let key = lookup_key(&collapsed);
    if PLACEHOLDERS.contains(key.as_str()) || SECTION_HEADERS.contains(key.as_str()) {
        return true;
    }
    if BLOB_LABELS.iter().any(|label| key.contains(label)) {
        return true;
    }

    let has_digit = collapsed.chars().any(|c| c.is_ascii_digit());
    let has_street = has_street_token(&collapsed);
    if !has_digit && !has_street {
        return true;
    }
    // Long capitalised text with neither marker is a section banner.
    if collapsed.chars().count() > 20 && is_shouting(&collapsed) && !has_digit && !has_street {
        return true;
    }
    false
}

/// Strips the "Location" artifact some portals prepend, then gates on quality.
pub fn clean_address(text: &str) -> Option<String> {
    let stripped = LOCATION_PREFIX.replace(text.trim(), "");
    let cleaned = collapse_whitespace(stripped.trim_matches(|c: char| c == ':' || c == '-' || c.is_whitespace()));
    if is_poor_quality_address(&cleaned) {
        None
    } else {
        Some(cleaned)
    }
}

pub fn normalize_applicant_name(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    NAME_PREFIX.replace(&collapsed, "").trim().to_string()
}

pub fn is_valid_applicant_name(text: &str) -> bool {
    let name = normalize_applicant_name(text);
    let len = name.chars().count();
    if !(2..=100).contains(&len) {
        return false;
    }
    if name.ends_with(':') || !name.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    let key = lookup_key(&name);
    !INVALID_NAMES.contains(key.as_str()) && !SECTION_HEADERS.contains(key.as_str())
}

pub fn clean_applicant(text: &str) -> Option<String> {
    if is_valid_applicant_name(text) {
        Some(normalize_applicant_name(text))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_phrase_needs_word_edges() {
        assert!(contains_phrase("found 0 results.", "0 results"));
        assert!(!contains_phrase("found 120 results", "0 results"));
        assert!(!contains_phrase("10 recordsets", "0 records"));
        assert!(contains_phrase("no records match your search", "no records match"));
        assert!(!contains_phrase("bp-2025-0117", "bp-2025-01"));
    }

    #[test]
    fn test_headers_and_placeholders_are_poor() {
        let junk = [
            "", "  ", "n/a", "N/A", "None", "TBD", "Company Information", "PERMIT INFORMATION",
            "Type of Work:", "  type   of work ", "Location", "123",
        ];
        for s in junk {
            assert!(is_poor_quality_address(s), "{:?} should be poor quality", s);
        }
    }

    #[test]
    fn test_real_addresses_pass() {
        for s in ["123 Main St", "4501 N Loop 1604 W", "700 Broadway, San Antonio TX 78209", "Elm Street"] {
            assert!(!is_poor_quality_address(s), "{:?} should pass", s);
        }
    }

    #[test]
    fn test_street_token_requires_whole_word() {
        // "st" inside "Installer" is not a street token
        assert!(is_poor_quality_address("Fire Installer Services"));
    }

    #[test]
    fn test_company_blob_is_poor_address() {
        assert!(is_poor_quality_address("Company Name:Acme Fire LLCLicense Type:Installer"));
        assert!(is_poor_quality_address("Company Name: 12 Main St Holdings"));
    }

    #[test]
    fn test_shouting_banner_is_poor() {
        assert!(is_poor_quality_address("CONTRACTOR AND LICENSE DETAILS"));
    }

    #[test]
    fn test_clean_address_strips_location_prefix() {
        assert_eq!(clean_address("Location: 123 Main St").as_deref(), Some("123 Main St"));
        assert_eq!(clean_address("Location - 9 Oak Ave ").as_deref(), Some("9 Oak Ave"));
        assert_eq!(clean_address("Location:"), None);
    }

    #[test]
    fn test_normalize_strips_label_prefix() {
        assert_eq!(
            normalize_applicant_name("Company Name: TX Septic Systems LLC"),
            "TX Septic Systems LLC"
        );
        assert_eq!(normalize_applicant_name("Company Name:Acme Fire LLC"), "Acme Fire LLC");
        assert_eq!(normalize_applicant_name("  Applicant:   Jane   Doe "), "Jane Doe");
        assert_eq!(normalize_applicant_name("Organization Alamo Builders"), "Alamo Builders");
    }

    #[test]
    fn test_valid_names_with_digits_and_street_tokens() {
        assert!(is_valid_applicant_name("Company Name: TX Septic Systems LLC"));
        assert!(is_valid_applicant_name("1st Street Electric"));
        assert!(is_valid_applicant_name("24/7 Plumbing Co"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        for s in ["Applicant", "applicant:", "Individual", "N/A", "x", "Contractor:", "12345", "Company Information"] {
            assert!(!is_valid_applicant_name(s), "{:?} should be invalid", s);
        }
        let long = "A".repeat(101);
        assert!(!is_valid_applicant_name(&long));
    }

    #[test]
    fn test_clean_applicant() {
        assert_eq!(clean_applicant("Applicant: Acme Fire LLC").as_deref(), Some("Acme Fire LLC"));
        assert_eq!(clean_applicant("Owner:"), None);
    }
}
