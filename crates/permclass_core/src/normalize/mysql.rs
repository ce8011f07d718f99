//! MySQL adapter payloads.
//!
//! Canonical categories: `global_privileges`, `database_privileges`, `roles`.
//! Type-specific attributes carry the host mask and the account lock flag.

use crate::snapshot::WARN_ROLE_CLOSURE_DISABLED;

use super::{AdapterProfile, DegradedFlag};

pub(super) static PROFILE: AdapterProfile = AdapterProfile {
    aliases: &[
        // Older agents shipped "global"/"databases"; current ones use the
        // canonical spellings directly.
        ("global", "global_privileges"),
        ("global_privileges", "global_privileges"),
        ("databases", "database_privileges"),
        ("database_privileges", "database_privileges"),
        ("roles", "roles"),
    ],
    flags: &[DegradedFlag {
        // MySQL < 8 cannot expand role grants; the agent reports the roles
        // it saw but flags the closure as unexpanded.
        key: "roles_resolved",
        warn_when: false,
        code: WARN_ROLE_CLOSURE_DISABLED,
    }],
};

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::normalize::normalize;
    use crate::snapshot::{CategoryData, DbType, SnapshotMeta, WARN_ROLE_CLOSURE_DISABLED};
    use chrono::Utc;
    use serde_json::json;

    fn meta() -> SnapshotMeta {
        SnapshotMeta {
            adapter: "mysql-agent".into(),
            adapter_version: "2.3".into(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn maps_legacy_and_current_field_names() {
        let raw = json!({
            "global": ["SELECT", "GRANT OPTION"],
            "databases": {"orders": ["SELECT", "INSERT"]},
            "roles": ["app_rw"],
        });
        let snap = normalize(&raw, DbType::MySql, meta()).unwrap();
        assert_eq!(
            snap.categories.keys().collect::<Vec<_>>(),
            vec!["database_privileges", "global_privileges", "roles"]
        );
        match &snap.categories["database_privileges"] {
            CategoryData::PerDatabase(map) => assert!(map.contains_key("orders")),
            other => panic!("expected per-database data, got {other:?}"),
        }
    }

    #[test]
    fn unresolved_role_closure_is_a_warning_not_an_error() {
        let raw = json!({
            "global_privileges": ["SELECT"],
            "roles": ["app_rw"],
            "roles_resolved": false,
        });
        let snap = normalize(&raw, DbType::MySql, meta()).unwrap();
        assert_eq!(snap.errors, vec![WARN_ROLE_CLOSURE_DISABLED]);
    }

    #[test]
    fn resolved_role_closure_emits_nothing() {
        let raw = json!({"roles": ["app_rw"], "roles_resolved": true});
        let snap = normalize(&raw, DbType::MySql, meta()).unwrap();
        assert!(snap.errors.is_empty());
    }

    #[test]
    fn non_boolean_flag_is_rejected() {
        let raw = json!({"roles_resolved": "no"});
        let err = normalize(&raw, DbType::MySql, meta()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
