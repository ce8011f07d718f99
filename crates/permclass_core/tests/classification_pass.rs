//! End-to-end classification pass scenarios over the in-memory ports.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use permclass_core::memory::{
    MemoryAssignmentStore, MemoryClassificationStore, MemoryMatchStatsStore, MemoryRuleStore,
    MemorySnapshotStore,
};
use permclass_core::ports::Result as PortResult;
use permclass_core::{
    build_facts, AccountRef, AssignmentStore, ClassificationEngine, ClassificationStore,
    ClassifyCache, DbType, DslEvaluator, EngineConfig, EvaluatorMode, MatchStatsStore, NewRule,
    PassOutcome, PermissionSnapshot, RuleCatalog, RuleExpression, RuleMatcher, RuleStore,
    SnapshotIntake, SnapshotMeta, SnapshotRecord, SnapshotStore,
};

struct Harness {
    engine: Arc<ClassificationEngine>,
    catalog: Arc<RuleCatalog>,
    intake: SnapshotIntake,
    rules: Arc<MemoryRuleStore>,
    snapshots: Arc<MemorySnapshotStore>,
    classifications: Arc<MemoryClassificationStore>,
    assignments: Arc<MemoryAssignmentStore>,
    stats: Arc<MemoryMatchStatsStore>,
}

async fn harness_with(config: EngineConfig) -> Harness {
    let cache = Arc::new(ClassifyCache::new());
    let rules = Arc::new(MemoryRuleStore::new());
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let classifications = Arc::new(MemoryClassificationStore::new());
    let assignments = Arc::new(MemoryAssignmentStore::new());
    let stats = Arc::new(MemoryMatchStatsStore::new());
    classifications.seed_system().await.unwrap();

    let catalog = Arc::new(RuleCatalog::new(
        Arc::clone(&rules) as Arc<dyn RuleStore>,
        Arc::clone(&cache),
    ));
    let intake = SnapshotIntake::new(
        Arc::clone(&snapshots) as Arc<dyn SnapshotStore>,
        Arc::clone(&cache),
    );
    let engine = Arc::new(ClassificationEngine::new(
        Arc::clone(&catalog),
        Arc::clone(&snapshots) as Arc<dyn SnapshotStore>,
        Arc::clone(&classifications) as Arc<dyn ClassificationStore>,
        Arc::clone(&assignments) as Arc<dyn AssignmentStore>,
        Arc::clone(&stats) as Arc<dyn MatchStatsStore>,
        Arc::clone(&cache),
        config,
    ));

    Harness {
        engine,
        catalog,
        intake,
        rules,
        snapshots,
        classifications,
        assignments,
        stats,
    }
}

async fn harness() -> Harness {
    harness_with(EngineConfig::default()).await
}

fn meta() -> SnapshotMeta {
    SnapshotMeta {
        adapter: "mysql-agent".into(),
        adapter_version: "2.3".into(),
        collected_at: Utc::now(),
    }
}

fn account() -> AccountRef {
    AccountRef {
        account_id: Uuid::new_v4(),
        instance_id: Uuid::new_v4(),
    }
}

async fn ingest_mysql(h: &Harness, a: AccountRef, globals: &[&str]) -> PermissionSnapshot {
    h.intake
        .ingest(
            a.account_id,
            a.instance_id,
            &json!({ "global_privileges": globals }),
            DbType::MySql,
            meta(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn or_rule_classifies_grant_holder() {
    let h = harness().await;
    let a = account();
    let snapshot = ingest_mysql(&h, a, &["SELECT", "INSERT", "GRANT OPTION"]).await;

    let rule = h
        .catalog
        .create_rule(NewRule {
            rule_name: "grant holders".into(),
            db_type: DbType::MySql,
            classification_code: "super".into(),
            rule_expression: json!({"operator": "OR", "global_privileges": ["GRANT OPTION"]}),
        })
        .await
        .unwrap();

    let summary = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(summary.outcome, PassOutcome::Completed);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.errors, 0);

    let current = h
        .assignments
        .current_for_accounts(&[a.account_id])
        .await
        .unwrap();
    let assignment = &current[&a.account_id];
    assert_eq!(assignment.rule_group_id, rule.rule_group_id);
    assert_eq!(assignment.rule_version, 1);

    // The diagnostic detail names the privilege that satisfied the clause.
    let facts = build_facts(&snapshot);
    let expr = RuleExpression::parse(&rule.rule_expression).unwrap();
    let result = DslEvaluator.evaluate(&facts, &expr);
    assert!(result.matched);
    assert_eq!(result.clauses[0].satisfied, vec!["GRANT OPTION"]);
}

#[tokio::test]
async fn empty_privilege_set_is_no_match_not_error() {
    let h = harness().await;
    let a = account();
    ingest_mysql(&h, a, &[]).await;

    h.catalog
        .create_rule(NewRule {
            rule_name: "grant holders".into(),
            db_type: DbType::MySql,
            classification_code: "super".into(),
            rule_expression: json!({"global_privileges": ["GRANT OPTION"]}),
        })
        .await
        .unwrap();

    let summary = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(summary.created, 0);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.errors, 0);
    assert!(h
        .assignments
        .current_for_accounts(&[a.account_id])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn second_run_without_changes_is_idempotent() {
    let h = harness().await;
    let a = account();
    ingest_mysql(&h, a, &["GRANT OPTION"]).await;
    h.catalog
        .create_rule(NewRule {
            rule_name: "grant holders".into(),
            db_type: DbType::MySql,
            classification_code: "super".into(),
            rule_expression: json!({"global_privileges": ["GRANT OPTION"]}),
        })
        .await
        .unwrap();

    let first = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(first.created, 1);
    let assigned_at = h
        .assignments
        .current_for_accounts(&[a.account_id])
        .await
        .unwrap()[&a.account_id]
        .assigned_at;

    let second = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 1);

    let after = h
        .assignments
        .current_for_accounts(&[a.account_id])
        .await
        .unwrap()[&a.account_id]
        .assigned_at;
    assert_eq!(after, assigned_at, "unchanged match keeps assigned_at");
}

#[tokio::test]
async fn empty_account_set_reports_nothing_to_do() {
    let h = harness().await;
    let summary = h.engine.run_pass(DbType::Oracle, &[]).await.unwrap();
    assert_eq!(summary.outcome, PassOutcome::NothingToDo);
    assert_eq!(summary.errors, 0);
}

#[tokio::test]
async fn rule_edit_takes_effect_on_next_pass() {
    let h = harness().await;
    let a = account();
    ingest_mysql(&h, a, &["GRANT OPTION", "SUPER"]).await;

    let v1 = h
        .catalog
        .create_rule(NewRule {
            rule_name: "grant holders".into(),
            db_type: DbType::MySql,
            classification_code: "super".into(),
            rule_expression: json!({"global_privileges": ["GRANT OPTION"]}),
        })
        .await
        .unwrap();

    let first = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(first.created, 1);

    // Authoring a new version invalidates the cached rule set; the very
    // next pass resolves version 2, not the cached version 1.
    let v2 = h
        .catalog
        .publish_version(
            v1.rule_group_id,
            None,
            json!({"operator": "AND", "global_privileges": ["SUPER"]}),
        )
        .await
        .unwrap();
    assert_eq!(v2.rule_version, 2);

    let second = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(second.updated, 1);
    let assignment = h
        .assignments
        .current_for_accounts(&[a.account_id])
        .await
        .unwrap()[&a.account_id]
        .clone();
    assert_eq!(assignment.rule_version, 2);
}

#[tokio::test]
async fn snapshot_refresh_invalidates_cached_facts() {
    let h = harness().await;
    let a = account();
    ingest_mysql(&h, a, &["GRANT OPTION"]).await;
    h.catalog
        .create_rule(NewRule {
            rule_name: "grant holders".into(),
            db_type: DbType::MySql,
            classification_code: "super".into(),
            rule_expression: json!({"global_privileges": ["GRANT OPTION"]}),
        })
        .await
        .unwrap();

    let first = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(first.created, 1);

    // A fresh collection drops the grant; intake invalidates the cached
    // facts, so the next pass sees the revocation and clears the assignment.
    ingest_mysql(&h, a, &["SELECT"]).await;
    let second = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(second.removed, 1);
    assert!(h
        .assignments
        .current_for_accounts(&[a.account_id])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn risk_order_decides_among_multiple_matches() {
    let h = harness().await;
    let a = account();
    ingest_mysql(&h, a, &["SELECT", "GRANT OPTION"]).await;

    // Matches both rules; the rule targeting the riskier classification wins.
    h.catalog
        .create_rule(NewRule {
            rule_name: "readers".into(),
            db_type: DbType::MySql,
            classification_code: "read_only".into(),
            rule_expression: json!({"global_privileges": ["SELECT"]}),
        })
        .await
        .unwrap();
    h.catalog
        .create_rule(NewRule {
            rule_name: "grant holders".into(),
            db_type: DbType::MySql,
            classification_code: "super".into(),
            rule_expression: json!({"global_privileges": ["GRANT OPTION"]}),
        })
        .await
        .unwrap();

    h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    let assignment = h
        .assignments
        .current_for_accounts(&[a.account_id])
        .await
        .unwrap()[&a.account_id]
        .clone();
    let superuser = h.classifications.by_code("super").await.unwrap().unwrap();
    assert_eq!(assignment.classification_id, superuser.id);
    let history = h.rules.history(assignment.rule_group_id).await.unwrap();
    assert_eq!(history[0].classification_code, "super");
}

#[tokio::test]
async fn malformed_snapshot_skips_account_not_pass() {
    let h = harness().await;
    let good = account();
    let bad = account();
    ingest_mysql(&h, good, &["GRANT OPTION"]).await;
    h.snapshots.put_raw(
        bad.account_id,
        bad.instance_id,
        Utc::now(),
        json!({"version": "four", "categories": 12}),
    );

    h.catalog
        .create_rule(NewRule {
            rule_name: "grant holders".into(),
            db_type: DbType::MySql,
            classification_code: "super".into(),
            rule_expression: json!({"global_privileges": ["GRANT OPTION"]}),
        })
        .await
        .unwrap();

    let summary = h.engine.run_pass(DbType::MySql, &[good, bad]).await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.skipped_accounts.len(), 1);
    assert_eq!(summary.skipped_accounts[0].id, bad.account_id);
}

#[tokio::test]
async fn unparseable_rule_is_skipped_with_warning() {
    let h = harness().await;
    let a = account();
    ingest_mysql(&h, a, &["GRANT OPTION"]).await;

    // Bypass the catalog's authoring validation to stage a malformed row.
    let broken = h
        .rules
        .create_rule(NewRule {
            rule_name: "broken".into(),
            db_type: DbType::MySql,
            classification_code: "dba".into(),
            rule_expression: json!({"operator": "XOR", "global_privileges": ["SELECT"]}),
        })
        .await
        .unwrap();
    h.catalog
        .create_rule(NewRule {
            rule_name: "grant holders".into(),
            db_type: DbType::MySql,
            classification_code: "super".into(),
            rule_expression: json!({"global_privileges": ["GRANT OPTION"]}),
        })
        .await
        .unwrap();

    let summary = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(summary.created, 1, "healthy rule still classifies");
    assert_eq!(summary.skipped_rules.len(), 1);
    assert_eq!(summary.skipped_rules[0].id, broken.rule_group_id);
}

#[tokio::test]
async fn daily_stats_upsert_once_per_key() {
    let h = harness().await;
    let a = account();
    let b = AccountRef {
        account_id: Uuid::new_v4(),
        instance_id: a.instance_id,
    };
    ingest_mysql(&h, a, &["GRANT OPTION"]).await;
    ingest_mysql(&h, b, &["GRANT OPTION"]).await;
    h.catalog
        .create_rule(NewRule {
            rule_name: "grant holders".into(),
            db_type: DbType::MySql,
            classification_code: "super".into(),
            rule_expression: json!({"global_privileges": ["GRANT OPTION"]}),
        })
        .await
        .unwrap();

    h.engine.run_pass(DbType::MySql, &[a, b]).await.unwrap();
    h.engine.run_pass(DbType::MySql, &[a, b]).await.unwrap();

    let rows = h
        .stats
        .for_date(Utc::now().date_naive(), DbType::MySql)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "one row per (rule, instance) per day");
    assert_eq!(rows[0].matched_count, 2);
}

#[tokio::test]
async fn legacy_evaluator_flag_widens_matching() {
    let h = harness_with(EngineConfig {
        evaluator: EvaluatorMode::Legacy,
        ..EngineConfig::default()
    })
    .await;
    let a = account();
    ingest_mysql(&h, a, &["SELECT"]).await;

    // AND over a privilege the account lacks: DSL v4 would reject, the
    // legacy per-field matcher matches on the SELECT hit alone.
    h.catalog
        .create_rule(NewRule {
            rule_name: "ddl users".into(),
            db_type: DbType::MySql,
            classification_code: "ddl".into(),
            rule_expression: json!({"operator": "AND", "global_privileges": ["SELECT", "DROP"]}),
        })
        .await
        .unwrap();

    let summary = h.engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(summary.created, 1);
}

// ── single-flight lock ────────────────────────────────────────

/// Snapshot store that parks inside the batched load until released, so a
/// test can hold a pass open mid-run.
struct GatedSnapshotStore {
    inner: Arc<MemorySnapshotStore>,
    entered: Arc<tokio::sync::Semaphore>,
    release: Arc<tokio::sync::Semaphore>,
}

#[async_trait]
impl SnapshotStore for GatedSnapshotStore {
    async fn put_snapshot(
        &self,
        account_id: Uuid,
        instance_id: Uuid,
        snapshot: &PermissionSnapshot,
    ) -> PortResult<()> {
        self.inner.put_snapshot(account_id, instance_id, snapshot).await
    }

    async fn latest_snapshot(&self, account_id: Uuid) -> PortResult<Option<SnapshotRecord>> {
        self.inner.latest_snapshot(account_id).await
    }

    async fn latest_snapshots(
        &self,
        account_ids: &[Uuid],
    ) -> PortResult<HashMap<Uuid, SnapshotRecord>> {
        self.entered.add_permits(1);
        let _go = self.release.acquire().await;
        self.inner.latest_snapshots(account_ids).await
    }
}

#[tokio::test]
async fn overlapping_passes_for_same_db_type_conflict() {
    let cache = Arc::new(ClassifyCache::new());
    let rules = Arc::new(MemoryRuleStore::new());
    let inner = Arc::new(MemorySnapshotStore::new());
    let classifications = Arc::new(MemoryClassificationStore::new());
    classifications.seed_system().await.unwrap();
    let entered = Arc::new(tokio::sync::Semaphore::new(0));
    let release = Arc::new(tokio::sync::Semaphore::new(0));
    let gated = Arc::new(GatedSnapshotStore {
        inner: Arc::clone(&inner),
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    });

    let catalog = Arc::new(RuleCatalog::new(
        Arc::clone(&rules) as Arc<dyn RuleStore>,
        Arc::clone(&cache),
    ));
    let engine = Arc::new(ClassificationEngine::new(
        catalog,
        gated as Arc<dyn SnapshotStore>,
        classifications as Arc<dyn ClassificationStore>,
        Arc::new(MemoryAssignmentStore::new()) as _,
        Arc::new(MemoryMatchStatsStore::new()) as Arc<dyn MatchStatsStore>,
        cache,
        EngineConfig::default(),
    ));

    let a = account();
    let running = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run_pass(DbType::MySql, &[a]).await })
    };
    // Wait until the first pass is parked inside its snapshot load.
    let _seen = entered.acquire().await.unwrap();

    let overlap = engine.run_pass(DbType::MySql, &[a]).await;
    assert!(matches!(
        overlap,
        Err(permclass_core::Error::Conflict(_))
    ));

    // Release the first pass; the lock must be freed on completion.
    release.add_permits(1);
    running.await.unwrap().unwrap();
    let after = engine.run_pass(DbType::MySql, &[a]).await.unwrap();
    assert_eq!(after.outcome, PassOutcome::Completed);
}
