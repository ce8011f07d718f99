//! In-memory implementations of the storage ports.
//!
//! Used by the engine tests and by embedders that want the classification
//! core without a database. Semantics mirror the Postgres adapter: rule
//! versions are append-only, seeds are idempotent, snapshot rows are
//! superseded wholesale.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::classification::{
    validate_classification, AccountClassification, NewClassification, SYSTEM_CLASSIFICATIONS,
};
use crate::error::Error;
use crate::ports::{
    AssignmentChange, AssignmentStore, ClassificationAssignment, ClassificationStore,
    DailyMatchStat, MatchStatsStore, Result, RuleStore, SnapshotRecord, SnapshotStore,
};
use crate::rule::{ClassificationRule, NewRule};
use crate::snapshot::{DbType, PermissionSnapshot};

// ── MemorySnapshotStore ───────────────────────────────────────

#[derive(Default)]
pub struct MemorySnapshotStore {
    rows: RwLock<HashMap<Uuid, SnapshotRecord>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an arbitrary payload row directly, bypassing normalization.
    /// Lets tests and backfills stage undecodable snapshots.
    pub fn put_raw(
        &self,
        account_id: Uuid,
        instance_id: Uuid,
        collected_at: DateTime<Utc>,
        payload: Value,
    ) {
        self.rows.write().unwrap_or_else(|e| e.into_inner()).insert(
            account_id,
            SnapshotRecord {
                account_id,
                instance_id,
                collected_at,
                payload,
            },
        );
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put_snapshot(
        &self,
        account_id: Uuid,
        instance_id: Uuid,
        snapshot: &PermissionSnapshot,
    ) -> Result<()> {
        let payload = serde_json::to_value(snapshot).map_err(|e| Error::Internal(anyhow!(e)))?;
        self.put_raw(account_id, instance_id, snapshot.meta.collected_at, payload);
        Ok(())
    }

    async fn latest_snapshot(&self, account_id: Uuid) -> Result<Option<SnapshotRecord>> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&account_id)
            .cloned())
    }

    async fn latest_snapshots(
        &self,
        account_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, SnapshotRecord>> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(account_ids
            .iter()
            .filter_map(|id| rows.get(id).map(|r| (*id, r.clone())))
            .collect())
    }
}

// ── MemoryRuleStore ───────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRuleStore {
    rows: RwLock<Vec<ClassificationRule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn create_rule(&self, rule: NewRule) -> Result<ClassificationRule> {
        let row = ClassificationRule {
            rule_group_id: Uuid::new_v4(),
            rule_version: 1,
            rule_name: rule.rule_name,
            db_type: rule.db_type,
            classification_code: rule.classification_code,
            rule_expression: rule.rule_expression,
            is_active: true,
            superseded_at: None,
            created_at: Utc::now(),
        };
        self.rows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(row.clone());
        Ok(row)
    }

    async fn publish_version(
        &self,
        rule_group_id: Uuid,
        rule_name: Option<String>,
        rule_expression: Value,
    ) -> Result<ClassificationRule> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        let current = rows
            .iter_mut()
            .find(|r| r.rule_group_id == rule_group_id && r.superseded_at.is_none())
            .ok_or_else(|| Error::NotFound(format!("live rule version for {rule_group_id}")))?;
        current.superseded_at = Some(now);
        let prior = current.clone();

        let next_version = rows
            .iter()
            .filter(|r| r.rule_group_id == rule_group_id)
            .map(|r| r.rule_version)
            .max()
            .unwrap_or(0)
            + 1;
        let row = ClassificationRule {
            rule_group_id,
            rule_version: next_version,
            rule_name: rule_name.unwrap_or(prior.rule_name),
            db_type: prior.db_type,
            classification_code: prior.classification_code,
            rule_expression,
            is_active: prior.is_active,
            superseded_at: None,
            created_at: now,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn set_active(&self, rule_group_id: Uuid, active: bool) -> Result<ClassificationRule> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let current = rows
            .iter_mut()
            .find(|r| r.rule_group_id == rule_group_id && r.superseded_at.is_none())
            .ok_or_else(|| Error::NotFound(format!("live rule version for {rule_group_id}")))?;
        current.is_active = active;
        Ok(current.clone())
    }

    async fn active_rules(&self, db_type: DbType) -> Result<Vec<ClassificationRule>> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.db_type == db_type && r.is_live())
            .cloned()
            .collect())
    }

    async fn rule_version(
        &self,
        rule_group_id: Uuid,
        rule_version: i32,
    ) -> Result<Option<ClassificationRule>> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.rule_group_id == rule_group_id && r.rule_version == rule_version)
            .cloned())
    }

    async fn history(&self, rule_group_id: Uuid) -> Result<Vec<ClassificationRule>> {
        let mut versions: Vec<ClassificationRule> = self
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.rule_group_id == rule_group_id)
            .cloned()
            .collect();
        versions.sort_by_key(|r| r.rule_version);
        Ok(versions)
    }
}

// ── MemoryClassificationStore ─────────────────────────────────

#[derive(Default)]
pub struct MemoryClassificationStore {
    rows: RwLock<Vec<AccountClassification>>,
}

impl MemoryClassificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClassificationStore for MemoryClassificationStore {
    async fn seed_system(&self) -> Result<u32> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let mut written = 0;
        for (code, display_name, risk_level) in SYSTEM_CLASSIFICATIONS {
            match rows.iter_mut().find(|c| c.code == *code) {
                Some(existing) if existing.is_system => {
                    existing.display_name = (*display_name).to_string();
                    existing.risk_level = *risk_level;
                    written += 1;
                }
                // A user-added row with this code is left alone.
                Some(_) => {}
                None => {
                    rows.push(AccountClassification {
                        id: Uuid::new_v4(),
                        code: (*code).to_string(),
                        display_name: (*display_name).to_string(),
                        risk_level: *risk_level,
                        is_system: true,
                    });
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn insert(&self, new: NewClassification) -> Result<AccountClassification> {
        validate_classification(&new.code, new.risk_level)?;
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        if rows.iter().any(|c| c.code == new.code) {
            return Err(Error::Conflict(format!(
                "classification {} already exists",
                new.code
            )));
        }
        let row = AccountClassification {
            id: Uuid::new_v4(),
            code: new.code,
            display_name: new.display_name,
            risk_level: new.risk_level,
            is_system: false,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn by_code(&self, code: &str) -> Result<Option<AccountClassification>> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<AccountClassification>> {
        let mut all = self
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        all.sort_by_key(|c| (c.risk_level, c.code.clone()));
        Ok(all)
    }
}

// ── MemoryAssignmentStore ─────────────────────────────────────

#[derive(Default)]
pub struct MemoryAssignmentStore {
    rows: RwLock<HashMap<Uuid, ClassificationAssignment>>,
}

impl MemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssignmentStore for MemoryAssignmentStore {
    async fn current_for_accounts(
        &self,
        account_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ClassificationAssignment>> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(account_ids
            .iter()
            .filter_map(|id| rows.get(id).map(|a| (*id, a.clone())))
            .collect())
    }

    async fn apply(&self, changes: &[AssignmentChange]) -> Result<()> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        for change in changes {
            match change {
                AssignmentChange::Upsert(assignment) => {
                    rows.insert(assignment.account_id, assignment.clone());
                }
                AssignmentChange::Remove { account_id } => {
                    rows.remove(account_id);
                }
            }
        }
        Ok(())
    }
}

// ── MemoryMatchStatsStore ─────────────────────────────────────

type StatKey = (NaiveDate, Uuid, Uuid, DbType, Uuid);

#[derive(Default)]
pub struct MemoryMatchStatsStore {
    rows: RwLock<HashMap<StatKey, DailyMatchStat>>,
}

impl MemoryMatchStatsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MatchStatsStore for MemoryMatchStatsStore {
    async fn upsert_daily(&self, stats: &[DailyMatchStat]) -> Result<()> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        for stat in stats {
            let key = (
                stat.stat_date,
                stat.rule_group_id,
                stat.classification_id,
                stat.db_type,
                stat.instance_id,
            );
            rows.insert(key, stat.clone());
        }
        Ok(())
    }

    async fn for_date(&self, date: NaiveDate, db_type: DbType) -> Result<Vec<DailyMatchStat>> {
        let mut out: Vec<DailyMatchStat> = self
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| s.stat_date == date && s.db_type == db_type)
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.rule_group_id, s.instance_id));
        Ok(out)
    }
}
