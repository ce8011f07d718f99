//! Canonical permission snapshot — the versioned record one collection run
//! produces for one account. Immutable once stored; the next collection
//! supersedes it wholesale.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::Error;

/// Snapshot schema version this build reads and writes. Anything else is
/// rejected at the boundary, never coerced.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 4;

/// Supported `type_specific.version`. Injected on write when absent.
pub const TYPE_SPECIFIC_VERSION: i64 = 1;

// Warning codes appended to `PermissionSnapshot::errors` for recognized but
// degraded input. These never block storage or classification.
pub const WARN_ROLE_CLOSURE_DISABLED: &str = "ROLE_CLOSURE_DISABLED";
pub const WARN_MEMBERSHIP_TRUNCATED: &str = "MEMBERSHIP_TRUNCATED";
pub const WARN_PARTIAL_GRANT_PARSE: &str = "PARTIAL_GRANT_PARSE";

/// Database engine an account lives on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DbType {
    MySql,
    Postgres,
    SqlServer,
    Oracle,
}

/// One privilege entry inside a category.
///
/// Adapters across versions emit either a bare privilege name or a structured
/// grant object; both are first-class here and collapse to the same set
/// membership at facts-building time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrivilegeEntry {
    Name(String),
    Grant {
        privilege: String,
        #[serde(default)]
        granted: bool,
        #[serde(default)]
        grantable: bool,
    },
}

impl PrivilegeEntry {
    /// The privilege name this entry contributes to a granted set, if any.
    /// Bare names always contribute; grant objects only when `granted`.
    pub fn granted_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Grant {
                privilege,
                granted: true,
                ..
            } => Some(privilege),
            Self::Grant { .. } => None,
        }
    }
}

/// Category payload: a flat privilege list, or a per-database map of lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryData {
    Privileges(Vec<PrivilegeEntry>),
    PerDatabase(BTreeMap<String, Vec<PrivilegeEntry>>),
}

/// Collection provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub adapter: String,
    pub adapter_version: String,
    pub collected_at: DateTime<Utc>,
}

/// Canonical, versioned permission record for one account at one collection
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    pub version: u32,
    pub db_type: DbType,
    pub categories: BTreeMap<String, CategoryData>,
    /// Engine-only attributes, independently versioned (`version` key).
    #[serde(default)]
    pub type_specific: Option<serde_json::Map<String, serde_json::Value>>,
    /// Free-form engine diagnostics (raw grant statements etc.). Never
    /// interpreted by the rule engine.
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
    /// Ordered machine-readable warning codes from collection/normalization.
    #[serde(default)]
    pub errors: Vec<String>,
    pub meta: SnapshotMeta,
}

impl PermissionSnapshot {
    /// Reject a snapshot whose schema version this build does not speak.
    pub fn ensure_supported_version(&self) -> Result<(), Error> {
        if self.version != SNAPSHOT_SCHEMA_VERSION {
            return Err(Error::UnsupportedVersion {
                what: "snapshot",
                found: self.version as i64,
                supported: SNAPSHOT_SCHEMA_VERSION as i64,
            });
        }
        Ok(())
    }
}
