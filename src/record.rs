//! Permit records and the intermediate row shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::status::{normalize_status, PermitStatus};
use crate::validators::{clean_address, clean_applicant};

/// Deferred pointer to a permit's detail page. Never resolved at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DetailRef {
    Url { href: String },
    Postback {
        #[serde(rename = "rawToken")]
        raw_token: String,
    },
}

/// How a row's permit id / type were obtained. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionMethod {
    Selector,
    DomScript,
}

/// One best-effort extracted results-table row. Engine internal.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub source: String,
    pub permit_id: String,
    pub permit_type: String,
    pub address: Option<String>,
    pub status: String,
    pub applicant_name: Option<String>,
    pub detail_ref: Option<DetailRef>,
    pub extraction_method: ExtractionMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermitRecord {
    pub source: String,
    pub permit_id: String,
    pub permit_type: String,
    pub address: Option<String>,
    pub status: PermitStatus,
    pub applicant_name: Option<String>,
    pub detail_ref: Option<DetailRef>,
    pub last_seen_at: DateTime<Utc>,
}

impl PermitRecord {
    /// Provisional record from a table row: status canonicalised, address and
    /// applicant gated by the validators.
    pub fn from_raw(row: RawRow, seen_at: DateTime<Utc>) -> Self {
        Self {
            source: row.source,
            permit_id: row.permit_id,
            permit_type: row.permit_type,
            address: row.address.as_deref().and_then(clean_address),
            status: normalize_status(&row.status),
            applicant_name: row.applicant_name.as_deref().and_then(clean_applicant),
            detail_ref: row.detail_ref,
            last_seen_at: seen_at,
        }
    }

    /// Whether a detail-page visit could still improve this record.
    pub fn needs_enrichment(&self, want_applicant: bool) -> bool {
        if self.detail_ref.is_none() {
            return false;
        }
        self.address.is_none() || (want_applicant && self.applicant_name.is_none())
    }
}

/// Collapses records sharing `(source, permit_id)`. The last record wins but
/// keeps the slot of the first occurrence.
pub fn dedup_records(records: Vec<PermitRecord>) -> Vec<PermitRecord> {
    let mut slots: HashMap<(String, String), usize> = HashMap::new();
    let mut out: Vec<PermitRecord> = Vec::with_capacity(records.len());

    for record in records {
        let key = (record.source.clone(), record.permit_id.clone());
        match slots.get(&key) {
            Some(&idx) => out[idx] = record,
            None => {
                slots.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}
