//! Postgres implementations of all permclass_core port traits.
//!
//! Each adapter is a newtype wrapping PgPool. All SQL is runtime-checked
//! (sqlx::query, not sqlx::query!) to avoid compile-time DB requirement.

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use permclass_core::classification::{
    validate_classification, AccountClassification, NewClassification, SYSTEM_CLASSIFICATIONS,
};
use permclass_core::ports::{
    AssignmentChange, AssignmentStore, ClassificationAssignment, ClassificationStore,
    DailyMatchStat, MatchStatsStore, Result, RuleStore, SnapshotRecord, SnapshotStore,
};
use permclass_core::{
    ClassificationRule, DbType, Error, NewRule, PermissionSnapshot,
};

use crate::sqlx_types::{
    PgAssignmentRow, PgClassificationRow, PgRuleRow, PgSnapshotRow, PgStatRow,
};

const RULE_COLUMNS: &str = "rule_group_id, rule_version, rule_name, db_type, \
     classification_code, rule_expression, is_active, superseded_at, created_at";

// ── PgSnapshotStore ───────────────────────────────────────────

/// Postgres-backed snapshot store. Collections append rows; reads resolve
/// the latest row per account, so a new collection supersedes wholesale.
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn put_snapshot(
        &self,
        account_id: Uuid,
        instance_id: Uuid,
        snapshot: &PermissionSnapshot,
    ) -> Result<()> {
        let payload = serde_json::to_value(snapshot).map_err(|e| anyhow!(e))?;
        sqlx::query(
            r#"
            INSERT INTO permclass.permission_snapshots
                (account_id, instance_id, db_type, collected_at, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(account_id)
        .bind(instance_id)
        .bind(snapshot.db_type.as_ref())
        .bind(snapshot.meta.collected_at)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn latest_snapshot(&self, account_id: Uuid) -> Result<Option<SnapshotRecord>> {
        let row = sqlx::query_as::<_, PgSnapshotRow>(
            r#"
            SELECT account_id, instance_id, collected_at, payload
            FROM permclass.permission_snapshots
            WHERE account_id = $1
            ORDER BY collected_at DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.map(SnapshotRecord::from))
    }

    async fn latest_snapshots(
        &self,
        account_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, SnapshotRecord>> {
        let rows = sqlx::query_as::<_, PgSnapshotRow>(
            r#"
            SELECT DISTINCT ON (account_id)
                account_id, instance_id, collected_at, payload
            FROM permclass.permission_snapshots
            WHERE account_id = ANY($1)
            ORDER BY account_id, collected_at DESC
            "#,
        )
        .bind(account_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(rows
            .into_iter()
            .map(|r| (r.account_id, SnapshotRecord::from(r)))
            .collect())
    }
}

// ── PgRuleStore ───────────────────────────────────────────────

/// Append-only rule storage. A partial unique index on
/// `(rule_group_id) WHERE superseded_at IS NULL` enforces one live version
/// per group at the database level.
pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn rule_from_row(row: PgRuleRow) -> Result<ClassificationRule> {
    row.try_into().map_err(|e: String| Error::Internal(anyhow!(e)))
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn create_rule(&self, rule: NewRule) -> Result<ClassificationRule> {
        let row = sqlx::query_as::<_, PgRuleRow>(&format!(
            r#"
            INSERT INTO permclass.classification_rules
                (rule_group_id, rule_version, rule_name, db_type,
                 classification_code, rule_expression, is_active)
            VALUES (gen_random_uuid(), 1, $1, $2, $3, $4, true)
            RETURNING {RULE_COLUMNS}
            "#,
        ))
        .bind(&rule.rule_name)
        .bind(rule.db_type.as_ref())
        .bind(&rule.classification_code)
        .bind(&rule.rule_expression)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rule_from_row(row)
    }

    async fn publish_version(
        &self,
        rule_group_id: Uuid,
        rule_name: Option<String>,
        rule_expression: serde_json::Value,
    ) -> Result<ClassificationRule> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        // Supersede the live version, carrying its settings forward.
        let prior = sqlx::query_as::<_, PgRuleRow>(&format!(
            r#"
            UPDATE permclass.classification_rules
            SET superseded_at = now()
            WHERE rule_group_id = $1
              AND superseded_at IS NULL
            RETURNING {RULE_COLUMNS}
            "#,
        ))
        .bind(rule_group_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| Error::NotFound(format!("live rule version for {rule_group_id}")))?;

        let row = sqlx::query_as::<_, PgRuleRow>(&format!(
            r#"
            INSERT INTO permclass.classification_rules
                (rule_group_id, rule_version, rule_name, db_type,
                 classification_code, rule_expression, is_active)
            SELECT $1, MAX(rule_version) + 1, $2, $3, $4, $5, $6
            FROM permclass.classification_rules
            WHERE rule_group_id = $1
            RETURNING {RULE_COLUMNS}
            "#,
        ))
        .bind(rule_group_id)
        .bind(rule_name.as_deref().unwrap_or(prior.rule_name.as_str()))
        .bind(prior.db_type.as_str())
        .bind(prior.classification_code.as_str())
        .bind(&rule_expression)
        .bind(prior.is_active)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        tx.commit().await.map_err(|e| anyhow!(e))?;
        rule_from_row(row)
    }

    async fn set_active(&self, rule_group_id: Uuid, active: bool) -> Result<ClassificationRule> {
        let row = sqlx::query_as::<_, PgRuleRow>(&format!(
            r#"
            UPDATE permclass.classification_rules
            SET is_active = $2
            WHERE rule_group_id = $1
              AND superseded_at IS NULL
            RETURNING {RULE_COLUMNS}
            "#,
        ))
        .bind(rule_group_id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| Error::NotFound(format!("live rule version for {rule_group_id}")))?;
        rule_from_row(row)
    }

    async fn active_rules(&self, db_type: DbType) -> Result<Vec<ClassificationRule>> {
        let rows = sqlx::query_as::<_, PgRuleRow>(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM permclass.classification_rules
            WHERE db_type = $1
              AND is_active
              AND superseded_at IS NULL
            ORDER BY created_at
            "#,
        ))
        .bind(db_type.as_ref())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(rule_from_row).collect()
    }

    async fn rule_version(
        &self,
        rule_group_id: Uuid,
        rule_version: i32,
    ) -> Result<Option<ClassificationRule>> {
        let row = sqlx::query_as::<_, PgRuleRow>(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM permclass.classification_rules
            WHERE rule_group_id = $1 AND rule_version = $2
            "#,
        ))
        .bind(rule_group_id)
        .bind(rule_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(rule_from_row).transpose()
    }

    async fn history(&self, rule_group_id: Uuid) -> Result<Vec<ClassificationRule>> {
        let rows = sqlx::query_as::<_, PgRuleRow>(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM permclass.classification_rules
            WHERE rule_group_id = $1
            ORDER BY rule_version
            "#,
        ))
        .bind(rule_group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter().map(rule_from_row).collect()
    }
}

// ── PgClassificationStore ─────────────────────────────────────

pub struct PgClassificationStore {
    pool: PgPool,
}

impl PgClassificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CLASSIFICATION_COLUMNS: &str =
    "classification_id, code, display_name, risk_level, is_system";

#[async_trait]
impl ClassificationStore for PgClassificationStore {
    async fn seed_system(&self) -> Result<u32> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        let mut written = 0u32;
        for (code, display_name, risk_level) in SYSTEM_CLASSIFICATIONS {
            // Upsert on code; the WHERE guard keeps a user-added row with a
            // colliding code untouched.
            let result = sqlx::query(
                r#"
                INSERT INTO permclass.account_classifications
                    (code, display_name, risk_level, is_system)
                VALUES ($1, $2, $3, true)
                ON CONFLICT (code) DO UPDATE
                    SET display_name = EXCLUDED.display_name,
                        risk_level = EXCLUDED.risk_level
                    WHERE account_classifications.is_system
                "#,
            )
            .bind(*code)
            .bind(*display_name)
            .bind(*risk_level)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
            written += result.rows_affected() as u32;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        info!(written, "re-asserted system classifications");
        Ok(written)
    }

    async fn insert(&self, new: NewClassification) -> Result<AccountClassification> {
        validate_classification(&new.code, new.risk_level)?;
        let row = sqlx::query_as::<_, PgClassificationRow>(&format!(
            r#"
            INSERT INTO permclass.account_classifications
                (code, display_name, risk_level, is_system)
            VALUES ($1, $2, $3, false)
            RETURNING {CLASSIFICATION_COLUMNS}
            "#,
        ))
        .bind(&new.code)
        .bind(&new.display_name)
        .bind(new.risk_level)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                Error::Conflict(format!("classification {} already exists", new.code))
            }
            _ => Error::Internal(anyhow!(e)),
        })?;
        Ok(row.into())
    }

    async fn by_code(&self, code: &str) -> Result<Option<AccountClassification>> {
        let row = sqlx::query_as::<_, PgClassificationRow>(&format!(
            r#"
            SELECT {CLASSIFICATION_COLUMNS}
            FROM permclass.account_classifications
            WHERE code = $1
            "#,
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.map(AccountClassification::from))
    }

    async fn list(&self) -> Result<Vec<AccountClassification>> {
        let rows = sqlx::query_as::<_, PgClassificationRow>(&format!(
            r#"
            SELECT {CLASSIFICATION_COLUMNS}
            FROM permclass.account_classifications
            ORDER BY risk_level, code
            "#,
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(rows.into_iter().map(AccountClassification::from).collect())
    }
}

// ── PgAssignmentStore ─────────────────────────────────────────

pub struct PgAssignmentStore {
    pool: PgPool,
}

impl PgAssignmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentStore for PgAssignmentStore {
    async fn current_for_accounts(
        &self,
        account_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ClassificationAssignment>> {
        let rows = sqlx::query_as::<_, PgAssignmentRow>(
            r#"
            SELECT account_id, instance_id, classification_id,
                   rule_group_id, rule_version, assigned_at
            FROM permclass.classification_assignments
            WHERE account_id = ANY($1)
            "#,
        )
        .bind(account_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(rows
            .into_iter()
            .map(|r| (r.account_id, ClassificationAssignment::from(r)))
            .collect())
    }

    async fn apply(&self, changes: &[AssignmentChange]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        for change in changes {
            match change {
                AssignmentChange::Upsert(a) => {
                    sqlx::query(
                        r#"
                        INSERT INTO permclass.classification_assignments
                            (account_id, instance_id, classification_id,
                             rule_group_id, rule_version, assigned_at)
                        VALUES ($1, $2, $3, $4, $5, $6)
                        ON CONFLICT (account_id) DO UPDATE SET
                            instance_id = EXCLUDED.instance_id,
                            classification_id = EXCLUDED.classification_id,
                            rule_group_id = EXCLUDED.rule_group_id,
                            rule_version = EXCLUDED.rule_version,
                            assigned_at = EXCLUDED.assigned_at
                        "#,
                    )
                    .bind(a.account_id)
                    .bind(a.instance_id)
                    .bind(a.classification_id)
                    .bind(a.rule_group_id)
                    .bind(a.rule_version)
                    .bind(a.assigned_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| anyhow!(e))?;
                }
                AssignmentChange::Remove { account_id } => {
                    sqlx::query(
                        r#"
                        DELETE FROM permclass.classification_assignments
                        WHERE account_id = $1
                        "#,
                    )
                    .bind(account_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| anyhow!(e))?;
                }
            }
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

// ── PgMatchStatsStore ─────────────────────────────────────────

pub struct PgMatchStatsStore {
    pool: PgPool,
}

impl PgMatchStatsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MatchStatsStore for PgMatchStatsStore {
    async fn upsert_daily(&self, stats: &[DailyMatchStat]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        for stat in stats {
            sqlx::query(
                r#"
                INSERT INTO permclass.daily_match_stats
                    (stat_date, rule_group_id, classification_id,
                     db_type, instance_id, matched_count)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (stat_date, rule_group_id, classification_id,
                             db_type, instance_id)
                DO UPDATE SET matched_count = EXCLUDED.matched_count
                "#,
            )
            .bind(stat.stat_date)
            .bind(stat.rule_group_id)
            .bind(stat.classification_id)
            .bind(stat.db_type.as_ref())
            .bind(stat.instance_id)
            .bind(stat.matched_count)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn for_date(
        &self,
        date: chrono::NaiveDate,
        db_type: DbType,
    ) -> Result<Vec<DailyMatchStat>> {
        let rows = sqlx::query_as::<_, PgStatRow>(
            r#"
            SELECT stat_date, rule_group_id, classification_id,
                   db_type, instance_id, matched_count
            FROM permclass.daily_match_stats
            WHERE stat_date = $1 AND db_type = $2
            ORDER BY rule_group_id, instance_id
            "#,
        )
        .bind(date)
        .bind(db_type.as_ref())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter()
            .map(|r| {
                r.try_into()
                    .map_err(|e: String| Error::Internal(anyhow!(e)))
            })
            .collect()
    }
}
