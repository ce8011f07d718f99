//! Facts builder — the compact, query-optimized projection of a snapshot the
//! rule evaluator runs against.
//!
//! Facts are a pure function of the snapshot: BTree containers and
//! case-sensitive exact string comparison make recomputation bit-for-bit
//! reproducible. No privilege name folding happens here; engines are
//! case-sensitive in practice.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::snapshot::{CategoryData, DbType, PermissionSnapshot, PrivilegeEntry};

/// Scope name for engine-wide privileges; every other scope is a database name.
pub const GLOBAL_SCOPE: &str = "global";

// Normalized capability tokens.
pub const CAP_CAN_GRANT: &str = "can_grant";
pub const CAP_IS_SUPERUSER: &str = "is_superuser";
pub const CAP_CAN_LOGIN: &str = "can_login";
pub const CAP_BYPASS_RLS: &str = "bypass_rls";
pub const CAP_REPLICATION: &str = "replication";
pub const CAP_ACCOUNT_LOCKED: &str = "account_locked";
pub const CAP_WILDCARD_HOST: &str = "wildcard_host";

/// Derived, queryable projection of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionFacts {
    /// Normalized capability tokens from the per-engine derivation table.
    pub capabilities: BTreeSet<String>,
    /// Scope (`"global"` or database name) → granted privilege names.
    pub privilege_sets: BTreeMap<String, BTreeSet<String>>,
}

impl PermissionFacts {
    /// The privilege set for a scope. Absent scopes are a routine condition
    /// (not-yet-collected accounts); callers treat them as empty.
    pub fn scope(&self, scope: &str) -> Option<&BTreeSet<String>> {
        self.privilege_sets.get(scope)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Flat categories that feed the global scope, per engine.
fn global_sources(db_type: DbType) -> &'static [&'static str] {
    match db_type {
        DbType::MySql => &["global_privileges"],
        DbType::Postgres => &["role_attributes"],
        DbType::SqlServer => &["server_permissions", "server_roles"],
        DbType::Oracle => &["system_privileges", "roles"],
    }
}

/// Build facts from a snapshot. Total and deterministic: the same snapshot
/// always yields identical set contents.
pub fn build_facts(snapshot: &PermissionSnapshot) -> PermissionFacts {
    let mut privilege_sets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let globals = global_sources(snapshot.db_type);

    for (name, data) in &snapshot.categories {
        match data {
            CategoryData::Privileges(entries) => {
                if globals.contains(&name.as_str()) {
                    privilege_sets
                        .entry(GLOBAL_SCOPE.to_string())
                        .or_default()
                        .extend(granted_names(entries));
                }
                // Flat categories outside the global sources (e.g. MySQL
                // roles) only feed capability derivation.
            }
            CategoryData::PerDatabase(per_db) => {
                for (database, entries) in per_db {
                    privilege_sets
                        .entry(database.clone())
                        .or_default()
                        .extend(granted_names(entries));
                }
            }
        }
    }

    let capabilities = derive_capabilities(snapshot, &privilege_sets);
    PermissionFacts {
        capabilities,
        privilege_sets,
    }
}

/// Flatten a mixed entry sequence into granted names. Bare strings always
/// contribute; grant objects contribute iff `granted`.
fn granted_names(entries: &[PrivilegeEntry]) -> impl Iterator<Item = String> + '_ {
    entries
        .iter()
        .filter_map(|e| e.granted_name().map(str::to_owned))
}

/// Fixed table of engine-specific capability predicates over the global
/// privilege set and `type_specific`.
fn derive_capabilities(
    snapshot: &PermissionSnapshot,
    privilege_sets: &BTreeMap<String, BTreeSet<String>>,
) -> BTreeSet<String> {
    static EMPTY: BTreeSet<String> = BTreeSet::new();
    let global = privilege_sets.get(GLOBAL_SCOPE).unwrap_or(&EMPTY);
    let mut caps = BTreeSet::new();
    let mut cap = |token: &str| {
        caps.insert(token.to_string());
    };

    match snapshot.db_type {
        DbType::MySql => {
            if global.contains("GRANT OPTION") {
                cap(CAP_CAN_GRANT);
            }
            if global.contains("SUPER") || global.contains("ALL PRIVILEGES") {
                cap(CAP_IS_SUPERUSER);
            }
            if type_specific_bool(snapshot, "account_locked") {
                cap(CAP_ACCOUNT_LOCKED);
            }
            if type_specific_str(snapshot, "host") == Some("%") {
                cap(CAP_WILDCARD_HOST);
            }
        }
        DbType::Postgres => {
            if global.contains("SUPERUSER") {
                cap(CAP_IS_SUPERUSER);
            }
            if global.contains("CREATEROLE") {
                cap(CAP_CAN_GRANT);
            }
            if global.contains("LOGIN") {
                cap(CAP_CAN_LOGIN);
            }
            if global.contains("BYPASSRLS") {
                cap(CAP_BYPASS_RLS);
            }
            if global.contains("REPLICATION") {
                cap(CAP_REPLICATION);
            }
        }
        DbType::SqlServer => {
            if global.contains("sysadmin") {
                cap(CAP_IS_SUPERUSER);
            }
            if global.contains("CONTROL SERVER") {
                cap(CAP_CAN_GRANT);
            }
        }
        DbType::Oracle => {
            if global.contains("DBA") || global.contains("SYSDBA") {
                cap(CAP_IS_SUPERUSER);
            }
            if global.contains("GRANT ANY PRIVILEGE") {
                cap(CAP_CAN_GRANT);
            }
        }
    }

    caps
}

fn type_specific_bool(snapshot: &PermissionSnapshot, key: &str) -> bool {
    snapshot
        .type_specific
        .as_ref()
        .and_then(|ts| ts.get(key))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn type_specific_str<'a>(snapshot: &'a PermissionSnapshot, key: &str) -> Option<&'a str> {
    snapshot
        .type_specific
        .as_ref()
        .and_then(|ts| ts.get(key))
        .and_then(|v| v.as_str())
}
