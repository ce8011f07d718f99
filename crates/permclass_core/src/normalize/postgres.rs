//! PostgreSQL adapter payloads.
//!
//! Canonical categories: `role_attributes`, `database_privileges`, `roles`.
//! Role attributes (SUPERUSER, CREATEROLE, LOGIN, ...) act as the global
//! privilege scope for this engine.

use crate::snapshot::WARN_MEMBERSHIP_TRUNCATED;

use super::{AdapterProfile, DegradedFlag};

pub(super) static PROFILE: AdapterProfile = AdapterProfile {
    aliases: &[
        ("attributes", "role_attributes"),
        ("role_attributes", "role_attributes"),
        ("databases", "database_privileges"),
        ("database_privileges", "database_privileges"),
        ("memberships", "roles"),
        ("roles", "roles"),
    ],
    flags: &[DegradedFlag {
        // The agent walks pg_auth_members to a bounded depth; deeper
        // membership graphs come back truncated.
        key: "membership_depth_exceeded",
        warn_when: true,
        code: WARN_MEMBERSHIP_TRUNCATED,
    }],
};

#[cfg(test)]
mod tests {
    use crate::normalize::normalize;
    use crate::snapshot::{DbType, SnapshotMeta, WARN_MEMBERSHIP_TRUNCATED};
    use chrono::Utc;
    use serde_json::json;

    fn meta() -> SnapshotMeta {
        SnapshotMeta {
            adapter: "pg-agent".into(),
            adapter_version: "1.9".into(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn maps_attribute_and_membership_spellings() {
        let raw = json!({
            "attributes": ["LOGIN", "CREATEROLE"],
            "memberships": ["pg_monitor"],
            "database_privileges": {"app": ["CONNECT", "CREATE"]},
        });
        let snap = normalize(&raw, DbType::Postgres, meta()).unwrap();
        assert_eq!(
            snap.categories.keys().collect::<Vec<_>>(),
            vec!["database_privileges", "role_attributes", "roles"]
        );
    }

    #[test]
    fn truncated_membership_walk_is_flagged() {
        let raw = json!({
            "role_attributes": ["LOGIN"],
            "roles": ["a", "b"],
            "membership_depth_exceeded": true,
        });
        let snap = normalize(&raw, DbType::Postgres, meta()).unwrap();
        assert_eq!(snap.errors, vec![WARN_MEMBERSHIP_TRUNCATED]);
    }
}
