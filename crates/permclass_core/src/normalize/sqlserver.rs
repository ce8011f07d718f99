//! SQL Server adapter payloads.
//!
//! Canonical categories: `server_roles`, `server_permissions`,
//! `database_privileges`. Server roles and permissions together form the
//! global privilege scope for this engine.

use crate::snapshot::WARN_PARTIAL_GRANT_PARSE;

use super::{AdapterProfile, DegradedFlag};

pub(super) static PROFILE: AdapterProfile = AdapterProfile {
    aliases: &[
        ("server_roles", "server_roles"),
        ("server_permissions", "server_permissions"),
        ("permissions", "server_permissions"),
        ("databases", "database_privileges"),
        ("database_privileges", "database_privileges"),
    ],
    flags: &[DegradedFlag {
        // sys.server_permissions rows with provider-specific grammar the
        // agent could not decode.
        key: "partial_grant_parse",
        warn_when: true,
        code: WARN_PARTIAL_GRANT_PARSE,
    }],
};

#[cfg(test)]
mod tests {
    use crate::normalize::normalize;
    use crate::snapshot::{DbType, SnapshotMeta, WARN_PARTIAL_GRANT_PARSE};
    use chrono::Utc;
    use serde_json::json;

    fn meta() -> SnapshotMeta {
        SnapshotMeta {
            adapter: "mssql-agent".into(),
            adapter_version: "3.1".into(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn maps_server_level_categories() {
        let raw = json!({
            "server_roles": ["sysadmin"],
            "permissions": ["CONTROL SERVER", {"privilege": "VIEW ANY DATABASE", "granted": true}],
            "databases": {"crm": ["SELECT"]},
        });
        let snap = normalize(&raw, DbType::SqlServer, meta()).unwrap();
        assert_eq!(
            snap.categories.keys().collect::<Vec<_>>(),
            vec!["database_privileges", "server_permissions", "server_roles"]
        );
    }

    #[test]
    fn partial_grant_parse_is_flagged() {
        let raw = json!({
            "server_permissions": ["CONNECT SQL"],
            "partial_grant_parse": true,
        });
        let snap = normalize(&raw, DbType::SqlServer, meta()).unwrap();
        assert_eq!(snap.errors, vec![WARN_PARTIAL_GRANT_PARSE]);
    }
}
