//! Oracle adapter payloads.
//!
//! Canonical categories: `system_privileges`, `roles`, `object_privileges`.
//! System privileges and granted roles together form the global privilege
//! scope; object privileges are keyed by owning schema.

use crate::snapshot::WARN_ROLE_CLOSURE_DISABLED;

use super::{AdapterProfile, DegradedFlag};

pub(super) static PROFILE: AdapterProfile = AdapterProfile {
    aliases: &[
        ("sys_privs", "system_privileges"),
        ("system_privileges", "system_privileges"),
        ("granted_roles", "roles"),
        ("roles", "roles"),
        ("obj_privs", "object_privileges"),
        ("object_privileges", "object_privileges"),
    ],
    flags: &[DegradedFlag {
        // DBA_ROLE_PRIVS closure skipped when the agent lacks SELECT on the
        // DBA_* views and falls back to USER_* views.
        key: "role_closure_disabled",
        warn_when: true,
        code: WARN_ROLE_CLOSURE_DISABLED,
    }],
};
