//! Classification assignment engine.
//!
//! A scheduled batch operation: resolve the live rule set for one engine
//! type, evaluate every eligible account's facts against it, persist the
//! assignment diff, and upsert the day's match statistics.
//!
//! Single-flight per engine type: overlapping passes for the same `db_type`
//! are rejected with a conflict. The run lock guard is RAII, so it is
//! released on every exit path, including errors and cancellation.
//! Per-account evaluation is pure and fanned out across tasks bounded by the
//! configured concurrency; all I/O is batched (one snapshot load, one
//! assignment read, one assignment write, one stats write per pass).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ClassifyCache;
use crate::catalog::RuleCatalog;
use crate::classification::AccountClassification;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::evaluate::{evaluator_for, RuleMatcher};
use crate::facts::build_facts;
use crate::ports::{
    AccountRef, AssignmentChange, AssignmentStore, ClassificationAssignment, ClassificationStore,
    DailyMatchStat, MatchStatsStore, Result, SnapshotRecord, SnapshotStore,
};
use crate::rule::{ClassificationRule, RuleExpression};
use crate::snapshot::DbType;

/// How a pass finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Completed,
    /// No eligible accounts. A routine completion state, not a failure.
    NothingToDo,
}

/// A unit (account or rule) excluded from one pass, with the reason kept for
/// operator drill-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedUnit {
    pub id: Uuid,
    pub reason: String,
}

/// Per-pass summary administrators see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub outcome: PassOutcome,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub removed: u32,
    /// Total skipped units; the vectors below carry the detail.
    pub errors: u32,
    pub skipped_accounts: Vec<SkippedUnit>,
    pub skipped_rules: Vec<SkippedUnit>,
}

impl PassSummary {
    fn empty(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            created: 0,
            updated: 0,
            unchanged: 0,
            removed: 0,
            errors: 0,
            skipped_accounts: vec![],
            skipped_rules: vec![],
        }
    }
}

/// A live rule with its expression parsed and its target classification
/// resolved, ready for evaluation.
struct PreparedRule {
    rule: ClassificationRule,
    expression: RuleExpression,
    classification: AccountClassification,
}

enum AccountVerdict {
    Skipped(String),
    NoMatch,
    /// Index into the prepared rule list of the winning rule.
    Matched { index: usize },
}

pub struct ClassificationEngine {
    catalog: Arc<RuleCatalog>,
    snapshots: Arc<dyn SnapshotStore>,
    classifications: Arc<dyn ClassificationStore>,
    assignments: Arc<dyn AssignmentStore>,
    stats: Arc<dyn MatchStatsStore>,
    cache: Arc<ClassifyCache>,
    config: EngineConfig,
    run_locks: Mutex<HashMap<DbType, Arc<AsyncMutex<()>>>>,
}

impl ClassificationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<RuleCatalog>,
        snapshots: Arc<dyn SnapshotStore>,
        classifications: Arc<dyn ClassificationStore>,
        assignments: Arc<dyn AssignmentStore>,
        stats: Arc<dyn MatchStatsStore>,
        cache: Arc<ClassifyCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            snapshots,
            classifications,
            assignments,
            stats,
            cache,
            config,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    fn run_lock(&self, db_type: DbType) -> Arc<AsyncMutex<()>> {
        let mut locks = self.run_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(db_type).or_default())
    }

    /// Run one classification pass for one engine type.
    ///
    /// Assignment policy: one classification per account. The first
    /// matching rule in risk order (target risk level ascending, group id
    /// tie-break) wins.
    pub async fn run_pass(
        &self,
        db_type: DbType,
        accounts: &[AccountRef],
    ) -> Result<PassSummary> {
        let lock = self.run_lock(db_type);
        let _guard = lock.try_lock().map_err(|_| {
            Error::Conflict(format!("classification pass already running for {db_type}"))
        })?;

        if accounts.is_empty() {
            info!(%db_type, "classification pass: no eligible accounts");
            return Ok(PassSummary::empty(PassOutcome::NothingToDo));
        }

        // The rollout flag is read once here; a flag flip mid-run does not
        // change an in-flight pass.
        let evaluator = evaluator_for(self.config.evaluator);
        info!(
            %db_type,
            evaluator = evaluator.name(),
            accounts = accounts.len(),
            "starting classification pass"
        );

        let mut summary = PassSummary::empty(PassOutcome::Completed);
        let rules = self.catalog.active_rules(db_type).await?;
        let prepared = Arc::new(self.prepare_rules(&rules, &mut summary).await?);

        let ids: Vec<Uuid> = accounts.iter().map(|a| a.account_id).collect();
        let records = self.snapshots.latest_snapshots(&ids).await?;
        let existing = self.assignments.current_for_accounts(&ids).await?;

        let verdicts = self
            .evaluate_accounts(accounts, records, Arc::clone(&prepared), evaluator)
            .await?;

        let now = Utc::now();
        let mut changes: Vec<AssignmentChange> = Vec::new();
        let mut match_counts: HashMap<(Uuid, Uuid, Uuid), i64> = HashMap::new();

        for (account, verdict) in verdicts {
            match verdict {
                AccountVerdict::Skipped(reason) => {
                    warn!(account_id = %account.account_id, %reason, "skipping account");
                    summary.skipped_accounts.push(SkippedUnit {
                        id: account.account_id,
                        reason,
                    });
                }
                AccountVerdict::NoMatch => {
                    if existing.contains_key(&account.account_id) {
                        changes.push(AssignmentChange::Remove {
                            account_id: account.account_id,
                        });
                        summary.removed += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
                AccountVerdict::Matched { index } => {
                    let winner = &prepared[index];
                    *match_counts
                        .entry((
                            winner.rule.rule_group_id,
                            winner.classification.id,
                            account.instance_id,
                        ))
                        .or_insert(0) += 1;

                    let same = existing.get(&account.account_id).is_some_and(|current| {
                        current.classification_id == winner.classification.id
                            && current.rule_group_id == winner.rule.rule_group_id
                            && current.rule_version == winner.rule.rule_version
                    });
                    if same {
                        summary.unchanged += 1;
                    } else {
                        if existing.contains_key(&account.account_id) {
                            summary.updated += 1;
                        } else {
                            summary.created += 1;
                        }
                        changes.push(AssignmentChange::Upsert(ClassificationAssignment {
                            account_id: account.account_id,
                            instance_id: account.instance_id,
                            classification_id: winner.classification.id,
                            rule_group_id: winner.rule.rule_group_id,
                            rule_version: winner.rule.rule_version,
                            assigned_at: now,
                        }));
                    }
                }
            }
        }

        if !changes.is_empty() {
            self.assignments.apply(&changes).await?;
        }

        let stat_rows: Vec<DailyMatchStat> = match_counts
            .into_iter()
            .map(
                |((rule_group_id, classification_id, instance_id), matched_count)| DailyMatchStat {
                    stat_date: now.date_naive(),
                    rule_group_id,
                    classification_id,
                    db_type,
                    instance_id,
                    matched_count,
                },
            )
            .collect();
        if !stat_rows.is_empty() {
            self.stats.upsert_daily(&stat_rows).await?;
        }

        summary.errors = (summary.skipped_accounts.len() + summary.skipped_rules.len()) as u32;
        info!(
            %db_type,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            removed = summary.removed,
            errors = summary.errors,
            "classification pass complete"
        );
        Ok(summary)
    }

    /// Parse expressions and resolve target classifications. A rule that
    /// fails either step is excluded from this pass only: fail-open per
    /// rule, never per pass.
    async fn prepare_rules(
        &self,
        rules: &[ClassificationRule],
        summary: &mut PassSummary,
    ) -> Result<Vec<PreparedRule>> {
        let classifications = self.classifications.list().await?;
        let by_code: HashMap<&str, &AccountClassification> = classifications
            .iter()
            .map(|c| (c.code.as_str(), c))
            .collect();

        let mut prepared = Vec::with_capacity(rules.len());
        for rule in rules {
            let expression = match RuleExpression::parse(&rule.rule_expression) {
                Ok(expression) => expression,
                Err(e) => {
                    warn!(
                        rule_group_id = %rule.rule_group_id,
                        rule_version = rule.rule_version,
                        error = %e,
                        "skipping rule with unparseable expression"
                    );
                    summary.skipped_rules.push(SkippedUnit {
                        id: rule.rule_group_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let Some(classification) = by_code.get(rule.classification_code.as_str()) else {
                warn!(
                    rule_group_id = %rule.rule_group_id,
                    classification_code = %rule.classification_code,
                    "skipping rule with unknown classification"
                );
                summary.skipped_rules.push(SkippedUnit {
                    id: rule.rule_group_id,
                    reason: format!("unknown classification {}", rule.classification_code),
                });
                continue;
            };
            prepared.push(PreparedRule {
                rule: rule.clone(),
                expression,
                classification: (*classification).clone(),
            });
        }

        prepared.sort_by(|a, b| {
            (a.classification.risk_level, a.rule.rule_group_id)
                .cmp(&(b.classification.risk_level, b.rule.rule_group_id))
        });
        Ok(prepared)
    }

    /// Fan evaluation out across accounts in chunks of the configured
    /// concurrency. Evaluation itself is pure; the only suspension points
    /// in a pass are the batched store calls around it.
    async fn evaluate_accounts(
        &self,
        accounts: &[AccountRef],
        mut records: HashMap<Uuid, SnapshotRecord>,
        prepared: Arc<Vec<PreparedRule>>,
        evaluator: &'static dyn RuleMatcher,
    ) -> Result<Vec<(AccountRef, AccountVerdict)>> {
        let mut verdicts = Vec::with_capacity(accounts.len());
        for chunk in accounts.chunks(self.config.concurrency.max(1)) {
            let mut join_set = JoinSet::new();
            for account in chunk.iter().copied() {
                let record = records.remove(&account.account_id);
                let prepared = Arc::clone(&prepared);
                let cache = Arc::clone(&self.cache);
                join_set.spawn(async move {
                    let verdict = classify_account(account, record, &prepared, evaluator, &cache);
                    (account, verdict)
                });
            }
            while let Some(joined) = join_set.join_next().await {
                let outcome =
                    joined.map_err(|e| Error::Internal(anyhow!("evaluation task failed: {e}")))?;
                verdicts.push(outcome);
            }
        }
        Ok(verdicts)
    }
}

/// Evaluate one account against the prepared rules, cache-first.
fn classify_account(
    account: AccountRef,
    record: Option<SnapshotRecord>,
    prepared: &[PreparedRule],
    evaluator: &dyn RuleMatcher,
    cache: &ClassifyCache,
) -> AccountVerdict {
    let Some(record) = record else {
        return AccountVerdict::Skipped("no snapshot collected".into());
    };

    let facts = match cache.facts_for(account.account_id, record.collected_at) {
        Some(facts) => facts,
        None => match record.decode() {
            Ok(snapshot) => cache.store_facts(
                account.account_id,
                record.collected_at,
                build_facts(&snapshot),
            ),
            Err(e) => return AccountVerdict::Skipped(e.to_string()),
        },
    };

    for (index, candidate) in prepared.iter().enumerate() {
        let result = evaluator.evaluate(&facts, &candidate.expression);
        if result.matched {
            debug!(
                account_id = %account.account_id,
                rule_group_id = %candidate.rule.rule_group_id,
                rule_version = candidate.rule.rule_version,
                reasons = ?result.clauses,
                "rule matched"
            );
            return AccountVerdict::Matched { index };
        }
    }
    AccountVerdict::NoMatch
}
