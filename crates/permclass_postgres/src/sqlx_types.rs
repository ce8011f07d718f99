//! Row types bridging Postgres rows and core domain types.
//!
//! Enum-typed columns come back as text and convert via `TryFrom` with a
//! `String` error, mapped to `Error::Internal` at the store boundary.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use permclass_core::{
    AccountClassification, ClassificationAssignment, ClassificationRule, DailyMatchStat, DbType,
    SnapshotRecord,
};

#[derive(Debug, FromRow)]
pub(crate) struct PgSnapshotRow {
    pub account_id: Uuid,
    pub instance_id: Uuid,
    pub collected_at: DateTime<Utc>,
    pub payload: Value,
}

impl From<PgSnapshotRow> for SnapshotRecord {
    fn from(row: PgSnapshotRow) -> Self {
        Self {
            account_id: row.account_id,
            instance_id: row.instance_id,
            collected_at: row.collected_at,
            payload: row.payload,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PgRuleRow {
    pub rule_group_id: Uuid,
    pub rule_version: i32,
    pub rule_name: String,
    pub db_type: String,
    pub classification_code: String,
    pub rule_expression: Value,
    pub is_active: bool,
    pub superseded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgRuleRow> for ClassificationRule {
    type Error = String;

    fn try_from(row: PgRuleRow) -> Result<Self, String> {
        let db_type: DbType = row
            .db_type
            .parse()
            .map_err(|_| format!("unknown db_type {:?}", row.db_type))?;
        Ok(Self {
            rule_group_id: row.rule_group_id,
            rule_version: row.rule_version,
            rule_name: row.rule_name,
            db_type,
            classification_code: row.classification_code,
            rule_expression: row.rule_expression,
            is_active: row.is_active,
            superseded_at: row.superseded_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PgClassificationRow {
    pub classification_id: Uuid,
    pub code: String,
    pub display_name: String,
    pub risk_level: i16,
    pub is_system: bool,
}

impl From<PgClassificationRow> for AccountClassification {
    fn from(row: PgClassificationRow) -> Self {
        Self {
            id: row.classification_id,
            code: row.code,
            display_name: row.display_name,
            risk_level: row.risk_level,
            is_system: row.is_system,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PgAssignmentRow {
    pub account_id: Uuid,
    pub instance_id: Uuid,
    pub classification_id: Uuid,
    pub rule_group_id: Uuid,
    pub rule_version: i32,
    pub assigned_at: DateTime<Utc>,
}

impl From<PgAssignmentRow> for ClassificationAssignment {
    fn from(row: PgAssignmentRow) -> Self {
        Self {
            account_id: row.account_id,
            instance_id: row.instance_id,
            classification_id: row.classification_id,
            rule_group_id: row.rule_group_id,
            rule_version: row.rule_version,
            assigned_at: row.assigned_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PgStatRow {
    pub stat_date: NaiveDate,
    pub rule_group_id: Uuid,
    pub classification_id: Uuid,
    pub db_type: String,
    pub instance_id: Uuid,
    pub matched_count: i64,
}

impl TryFrom<PgStatRow> for DailyMatchStat {
    type Error = String;

    fn try_from(row: PgStatRow) -> Result<Self, String> {
        let db_type: DbType = row
            .db_type
            .parse()
            .map_err(|_| format!("unknown db_type {:?}", row.db_type))?;
        Ok(Self {
            stat_date: row.stat_date,
            rule_group_id: row.rule_group_id,
            classification_id: row.classification_id,
            db_type,
            instance_id: row.instance_id,
            matched_count: row.matched_count,
        })
    }
}
