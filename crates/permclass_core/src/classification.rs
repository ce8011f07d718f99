//! Account classification taxonomy — named risk buckets.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Closed risk range: 1 = highest risk, 6 = lowest.
pub const RISK_LEVEL_MIN: i16 = 1;
pub const RISK_LEVEL_MAX: i16 = 6;

/// Taxonomy entry an account can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClassification {
    pub id: Uuid,
    /// Immutable lowercase identifier — the stable anchor across renames.
    pub code: String,
    pub display_name: String,
    pub risk_level: i16,
    /// Seeded, non-deletable classification.
    pub is_system: bool,
}

/// Input for a user-added classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClassification {
    pub code: String,
    pub display_name: String,
    pub risk_level: i16,
}

/// Validate a classification code + risk level against the closed constraints.
pub fn validate_classification(code: &str, risk_level: i16) -> Result<(), Error> {
    if code.is_empty() || code.chars().any(|c| !c.is_ascii_lowercase() && c != '_') {
        return Err(Error::InvalidInput(format!(
            "classification code must be lowercase ascii, got {code:?}"
        )));
    }
    if !(RISK_LEVEL_MIN..=RISK_LEVEL_MAX).contains(&risk_level) {
        return Err(Error::InvalidInput(format!(
            "risk level {risk_level} outside {RISK_LEVEL_MIN}..={RISK_LEVEL_MAX}"
        )));
    }
    Ok(())
}

/// The six seeded system classifications at fixed risk levels. Re-asserted
/// idempotently on startup (upsert on code) without touching user-added rows.
pub const SYSTEM_CLASSIFICATIONS: &[(&str, &str, i16)] = &[
    ("super", "Superuser", 1),
    ("dba", "DBA", 2),
    ("ddl", "DDL", 3),
    ("dml", "DML", 4),
    ("read_only", "Read-only", 5),
    ("public", "Public", 6),
];
