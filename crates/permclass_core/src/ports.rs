//! Storage port traits.
//!
//! Implemented by `permclass_postgres` for production and by the in-memory
//! stores in [`crate::memory`] for tests and embedders — core logic depends
//! only on these traits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::classification::{AccountClassification, NewClassification};
use crate::error::Error;
use crate::rule::{ClassificationRule, NewRule};
use crate::snapshot::{DbType, PermissionSnapshot};

pub type Result<T> = std::result::Result<T, Error>;

/// An account eligible for a classification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountRef {
    pub account_id: Uuid,
    pub instance_id: Uuid,
}

/// Stored snapshot row: the payload stays raw JSON so one undecodable
/// account is skippable without failing a whole batch load.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub account_id: Uuid,
    pub instance_id: Uuid,
    pub collected_at: DateTime<Utc>,
    pub payload: Value,
}

impl SnapshotRecord {
    /// Decode the stored payload and gate on the schema version.
    pub fn decode(&self) -> Result<PermissionSnapshot> {
        let snapshot: PermissionSnapshot = serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::InvalidInput(format!("stored snapshot: {e}")))?;
        snapshot.ensure_supported_version()?;
        Ok(snapshot)
    }
}

/// Snapshot persistence. A new collection supersedes the prior snapshot
/// wholesale; rows are never partially updated.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put_snapshot(
        &self,
        account_id: Uuid,
        instance_id: Uuid,
        snapshot: &PermissionSnapshot,
    ) -> Result<()>;

    async fn latest_snapshot(&self, account_id: Uuid) -> Result<Option<SnapshotRecord>>;

    /// Batched lookup — the pass engine loads a whole account set in one
    /// round trip.
    async fn latest_snapshots(
        &self,
        account_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, SnapshotRecord>>;
}

/// Append-only rule storage: versions are rows, never in-place edits.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Create version 1 of a new rule group.
    async fn create_rule(&self, rule: NewRule) -> Result<ClassificationRule>;

    /// Append the next version and stamp `superseded_at` on the prior live
    /// row in the same operation.
    async fn publish_version(
        &self,
        rule_group_id: Uuid,
        rule_name: Option<String>,
        rule_expression: Value,
    ) -> Result<ClassificationRule>;

    /// Toggle the current version's activation flag.
    async fn set_active(&self, rule_group_id: Uuid, active: bool) -> Result<ClassificationRule>;

    /// Live rules for one engine type: `is_active AND superseded_at IS NULL`.
    async fn active_rules(&self, db_type: DbType) -> Result<Vec<ClassificationRule>>;

    /// Exact historical version, for replaying an assignment.
    async fn rule_version(
        &self,
        rule_group_id: Uuid,
        rule_version: i32,
    ) -> Result<Option<ClassificationRule>>;

    /// Full version history of a group, oldest first.
    async fn history(&self, rule_group_id: Uuid) -> Result<Vec<ClassificationRule>>;
}

/// Classification taxonomy storage.
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// Idempotently re-assert the system classifications (upsert on code).
    /// Returns how many rows were written. User-added rows are untouched.
    async fn seed_system(&self) -> Result<u32>;

    async fn insert(&self, new: NewClassification) -> Result<AccountClassification>;

    async fn by_code(&self, code: &str) -> Result<Option<AccountClassification>>;

    async fn list(&self) -> Result<Vec<AccountClassification>>;
}

/// The result row linking an account to a classification via the exact rule
/// version that matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationAssignment {
    pub account_id: Uuid,
    pub instance_id: Uuid,
    pub classification_id: Uuid,
    pub rule_group_id: Uuid,
    pub rule_version: i32,
    pub assigned_at: DateTime<Utc>,
}

/// One mutation produced by a pass.
#[derive(Debug, Clone)]
pub enum AssignmentChange {
    Upsert(ClassificationAssignment),
    Remove { account_id: Uuid },
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn current_for_accounts(
        &self,
        account_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ClassificationAssignment>>;

    /// Apply a batch of changes from one pass.
    async fn apply(&self, changes: &[AssignmentChange]) -> Result<()>;
}

/// Per (date, rule, classification, engine, instance) aggregate of matched
/// accounts. One row per key per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMatchStat {
    pub stat_date: NaiveDate,
    pub rule_group_id: Uuid,
    pub classification_id: Uuid,
    pub db_type: DbType,
    pub instance_id: Uuid,
    pub matched_count: i64,
}

#[async_trait]
pub trait MatchStatsStore: Send + Sync {
    /// Upsert the day's counts: re-running a pass overwrites, never
    /// accumulates duplicate rows for the same key.
    async fn upsert_daily(&self, stats: &[DailyMatchStat]) -> Result<()>;

    async fn for_date(&self, date: NaiveDate, db_type: DbType) -> Result<Vec<DailyMatchStat>>;
}
