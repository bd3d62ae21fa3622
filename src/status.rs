//! Canonical permit status vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PermitStatus {
    Issued,
    Pending,
    Closed,
    Expired,
    Unknown,
}

impl PermitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermitStatus::Issued => "issued",
            PermitStatus::Pending => "pending",
            PermitStatus::Closed => "closed",
            PermitStatus::Expired => "expired",
            PermitStatus::Unknown => "unknown",
        }
    }
}

impl Default for PermitStatus {
    fn default() -> Self {
        PermitStatus::Unknown
    }
}

impl fmt::Display for PermitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "issued" => Ok(PermitStatus::Issued),
            "pending" => Ok(PermitStatus::Pending),
            "closed" => Ok(PermitStatus::Closed),
            "expired" => Ok(PermitStatus::Expired),
            "unknown" => Ok(PermitStatus::Unknown),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Ordered rules. First rule with a matching needle wins, so negations and
/// words containing another status word ("inactive", "incomplete") come
/// before the rule they would otherwise fall into.
const RULES: &[(PermitStatus, &[&str])] = &[
    (PermitStatus::Pending, &["not issued", "awaiting", "pending issuance", "ready to issue"]),
    (PermitStatus::Expired, &["expired", "expire", "lapsed"]),
    (PermitStatus::Pending, &["incomplete"]),
    (PermitStatus::Closed, &["inactive", "disapproved", "not approved", "unapproved"]),
    (
        PermitStatus::Closed,
        &["finaled", "closed", "complete", "withdrawn", "void", "cancel", "revoked", "denied"],
    ),
    (PermitStatus::Issued, &["issued", "active", "approved", "permitted"]),
    (
        PermitStatus::Pending,
        &[
            "pending", "review", "submitted", "received", "in process", "intake",
            "applied", "application", "on hold", "hold", "plan check",
            "under", "waiting", "open", "new",
        ],
    ),
];

/// Maps arbitrary portal phrasing ("Permit Issued", "Issued - Active",
/// "CO Issued", "Plan Review") onto [`PermitStatus`]. Total.
pub fn normalize_status(raw: &str) -> PermitStatus {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return PermitStatus::Unknown;
    }
    for (status, needles) in RULES {
        if needles.iter().any(|n| lowered.contains(n)) {
            return *status;
        }
    }
    PermitStatus::Unknown
}
