//! Classification rules — immutable, versioned rows.
//!
//! A rule group is a stable identity; every edit appends a new version row
//! and stamps `superseded_at` on the prior live one. History is never
//! rewritten, so any past assignment can be replayed against the exact
//! expression that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::error::Error;
use crate::snapshot::DbType;

/// Set operator applied within one clause of a rule expression.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RuleOperator {
    And,
    #[default]
    Or,
}

/// Declarative predicate evaluated against an account's facts.
///
/// Clause types (global vs per-database) combine with logical AND; within a
/// clause the declared operator governs. An empty privilege list is a no-op
/// clause, so an expression with no clauses matches every account of its
/// engine type; broad rules are gated by activation, not by the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleExpression {
    #[serde(default)]
    pub operator: RuleOperator,
    #[serde(default)]
    pub global_privileges: Vec<String>,
    /// Per-database clause. Reserved: authored rules keep this empty today.
    #[serde(default)]
    pub database_privileges: Vec<String>,
}

impl RuleExpression {
    /// Parse an authored expression document. Unknown operators and
    /// non-list privilege fields are malformed, not defaulted.
    pub fn parse(value: &serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidInput(format!("rule expression: {e}")))
    }

    /// True when the expression carries no constraint at all.
    pub fn is_unconstrained(&self) -> bool {
        self.global_privileges.is_empty() && self.database_privileges.is_empty()
    }
}

/// One version of a named rule. `(rule_group_id, rule_version)` is unique;
/// at most one version per group is live (`is_active` and not superseded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub rule_group_id: Uuid,
    pub rule_version: i32,
    pub rule_name: String,
    pub db_type: DbType,
    /// Code of the classification this rule assigns on match.
    pub classification_code: String,
    /// Stored expression document. Parsed lazily per pass so one malformed
    /// expression skips that rule rather than failing rule loading.
    pub rule_expression: serde_json::Value,
    pub is_active: bool,
    pub superseded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ClassificationRule {
    /// Live means eligible for evaluation in the next pass.
    pub fn is_live(&self) -> bool {
        self.is_active && self.superseded_at.is_none()
    }
}

/// Authoring input for the first version of a new rule group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub rule_name: String,
    pub db_type: DbType,
    pub classification_code: String,
    pub rule_expression: serde_json::Value,
}
