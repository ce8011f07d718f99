//! Snapshot normalizer — converts a raw adapter payload into the canonical
//! versioned snapshot schema.
//!
//! One sub-normalizer per engine maps adapter field names onto the canonical
//! category set. Normalization is pure and fail-fast: malformed input raises,
//! while recognized-but-degraded input is recorded as a warning code on the
//! snapshot and never blocks storage.

mod mysql;
mod oracle;
mod postgres;
mod sqlserver;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::Error;
use crate::snapshot::{
    CategoryData, DbType, PermissionSnapshot, SnapshotMeta, SNAPSHOT_SCHEMA_VERSION,
    TYPE_SPECIFIC_VERSION,
};

/// Payload keys handled by the normalizer itself rather than an engine
/// category table.
const RESERVED_KEYS: &[&str] = &["type_specific", "extra", "errors"];

/// How one engine's adapter payload maps onto canonical categories.
pub(crate) struct AdapterProfile {
    /// Adapter field name → canonical category name. Adapters across
    /// versions use different spellings; every accepted spelling is listed.
    pub aliases: &'static [(&'static str, &'static str)],
    /// Boolean degradation flags the adapter may set.
    pub flags: &'static [DegradedFlag],
}

/// A recognized degraded-input marker: when the adapter sets `key` to
/// `warn_when`, `code` is appended to the snapshot's warning list.
pub(crate) struct DegradedFlag {
    pub key: &'static str,
    pub warn_when: bool,
    pub code: &'static str,
}

fn profile_for(db_type: DbType) -> &'static AdapterProfile {
    match db_type {
        DbType::MySql => &mysql::PROFILE,
        DbType::Postgres => &postgres::PROFILE,
        DbType::SqlServer => &sqlserver::PROFILE,
        DbType::Oracle => &oracle::PROFILE,
    }
}

/// Normalize a raw adapter payload into a canonical snapshot.
///
/// The payload must be a mapping; anything else is a type error. Unrecognized
/// category keys are a hard error: a category the normalizer does not
/// understand is never dropped or renamed.
pub fn normalize(
    raw: &Value,
    db_type: DbType,
    meta: SnapshotMeta,
) -> Result<PermissionSnapshot, Error> {
    let map = raw.as_object().ok_or_else(|| {
        Error::InvalidType(format!(
            "raw payload must be a mapping, got {}",
            json_type_name(raw)
        ))
    })?;

    let profile = profile_for(db_type);
    let mut errors = adapter_errors(map)?;
    let categories = collect_categories(map, profile, &mut errors)?;
    let type_specific = normalize_type_specific(map.get("type_specific"))?;

    Ok(PermissionSnapshot {
        version: SNAPSHOT_SCHEMA_VERSION,
        db_type,
        categories,
        type_specific,
        extra: map.get("extra").cloned(),
        errors,
        meta,
    })
}

/// Single entry point for `type_specific` normalization.
///
/// `None` passes through; a non-mapping value is a type error; a mapping
/// without a `version` gets `version = 1` injected; any other integer version
/// is rejected outright, with no forward or backward coercion.
pub fn normalize_type_specific(
    value: Option<&Value>,
) -> Result<Option<serde_json::Map<String, Value>>, Error> {
    let map = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(Error::InvalidType(format!(
                "type_specific must be a mapping, got {}",
                json_type_name(other)
            )))
        }
    };

    let mut out = map.clone();
    match out.get("version") {
        None => {
            out.insert("version".into(), Value::from(TYPE_SPECIFIC_VERSION));
        }
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) if v == TYPE_SPECIFIC_VERSION => {}
            Some(v) => {
                return Err(Error::UnsupportedVersion {
                    what: "type_specific",
                    found: v,
                    supported: TYPE_SPECIFIC_VERSION,
                })
            }
            None => {
                return Err(Error::InvalidType(format!(
                    "type_specific version must be an integer, got {n}"
                )))
            }
        },
        Some(other) => {
            return Err(Error::InvalidType(format!(
                "type_specific version must be an integer, got {}",
                json_type_name(other)
            )))
        }
    }
    Ok(Some(out))
}

fn collect_categories(
    map: &serde_json::Map<String, Value>,
    profile: &AdapterProfile,
    warnings: &mut Vec<String>,
) -> Result<BTreeMap<String, CategoryData>, Error> {
    let mut categories = BTreeMap::new();

    for (key, value) in map {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(flag) = profile.flags.iter().find(|f| f.key == key) {
            match value {
                Value::Bool(b) => {
                    if *b == flag.warn_when {
                        warnings.push(flag.code.to_string());
                    }
                }
                other => {
                    return Err(Error::InvalidInput(format!(
                        "flag {key} must be a boolean, got {}",
                        json_type_name(other)
                    )))
                }
            }
            continue;
        }
        let canonical = profile
            .aliases
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, canonical)| *canonical)
            .ok_or_else(|| Error::InvalidInput(format!("unrecognized category {key}")))?;

        let data: CategoryData = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidInput(format!("category {key}: {e}")))?;
        if categories.insert(canonical.to_string(), data).is_some() {
            return Err(Error::InvalidInput(format!(
                "category {canonical} supplied more than once"
            )));
        }
    }

    Ok(categories)
}

/// Warning codes the adapter itself already collected, if any.
fn adapter_errors(map: &serde_json::Map<String, Value>) -> Result<Vec<String>, Error> {
    let Some(value) = map.get("errors") else {
        return Ok(Vec::new());
    };
    let list = value
        .as_array()
        .ok_or_else(|| Error::InvalidType("errors must be a list of codes".into()))?;
    list.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_owned)
                .ok_or_else(|| Error::InvalidType("errors entries must be strings".into()))
        })
        .collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
