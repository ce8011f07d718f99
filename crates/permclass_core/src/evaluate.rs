//! Rule evaluators.
//!
//! Two implementations of one `RuleMatcher` seam, selected once per pass by
//! the rollout flag: the DSL v4 engine described below, and the legacy
//! per-field matcher kept alive so the flag can be rolled back without
//! re-collecting snapshots.
//!
//! DSL v4 semantics: clause types (global, per-database) combine with
//! logical AND; within a clause the declared operator governs. An empty
//! required list contributes no constraint. An absent scope resolves to the
//! empty set; unresolved accounts are routine, never an error.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::facts::{PermissionFacts, GLOBAL_SCOPE};
use crate::rule::{RuleExpression, RuleOperator};

/// Which evaluator a pass runs with. Read once per pass, never mid-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvaluatorMode {
    #[default]
    DslV4,
    Legacy,
}

/// Scope a clause outcome reports against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClauseScope {
    Global,
    Database,
    /// Legacy matcher: scope-insensitive union of every privilege set.
    Any,
}

/// Per-clause diagnostic detail: which required privileges were present and
/// which were missing, so operators can debug a match without re-running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseOutcome {
    pub scope: ClauseScope,
    pub operator: RuleOperator,
    pub satisfied: Vec<String>,
    pub missing: Vec<String>,
    pub matched: bool,
}

/// Result of evaluating one rule expression against one account's facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub clauses: Vec<ClauseOutcome>,
}

/// The evaluator seam. Implementations are pure: facts and expression in,
/// verdict and diagnostics out; no I/O, no suspension.
pub trait RuleMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, facts: &PermissionFacts, expr: &RuleExpression) -> MatchResult;
}

/// Resolve the evaluator for a pass from the rollout flag.
pub fn evaluator_for(mode: EvaluatorMode) -> &'static dyn RuleMatcher {
    match mode {
        EvaluatorMode::DslV4 => &DslEvaluator,
        EvaluatorMode::Legacy => &LegacyEvaluator,
    }
}

/// DSL v4 engine.
pub struct DslEvaluator;

impl RuleMatcher for DslEvaluator {
    fn name(&self) -> &'static str {
        "dsl_v4"
    }

    fn evaluate(&self, facts: &PermissionFacts, expr: &RuleExpression) -> MatchResult {
        let mut clauses = Vec::new();
        let mut matched = true;

        if !expr.global_privileges.is_empty() {
            static EMPTY: BTreeSet<String> = BTreeSet::new();
            let actual = facts.scope(GLOBAL_SCOPE).unwrap_or(&EMPTY);
            let clause = clause_outcome(
                ClauseScope::Global,
                expr.operator,
                &expr.global_privileges,
                actual,
            );
            matched &= clause.matched;
            clauses.push(clause);
        }

        if !expr.database_privileges.is_empty() {
            let clause = database_clause(facts, expr);
            matched &= clause.matched;
            clauses.push(clause);
        }

        // No clauses at all: vacuously satisfied. Broad on purpose; the
        // caller gates which rules are active.
        MatchResult { matched, clauses }
    }
}

fn clause_outcome(
    scope: ClauseScope,
    operator: RuleOperator,
    required: &[String],
    actual: &BTreeSet<String>,
) -> ClauseOutcome {
    let (satisfied, missing): (Vec<String>, Vec<String>) = required
        .iter()
        .cloned()
        .partition(|name| actual.contains(name));
    let matched = match operator {
        RuleOperator::And => missing.is_empty(),
        RuleOperator::Or => !satisfied.is_empty(),
    };
    ClauseOutcome {
        scope,
        operator,
        satisfied,
        missing,
        matched,
    }
}

/// Per-database clause: matched iff at least one database scope satisfies
/// the operator. Diagnostics report the union of privileges satisfied in
/// any database.
fn database_clause(facts: &PermissionFacts, expr: &RuleExpression) -> ClauseOutcome {
    let mut matched = false;
    let mut satisfied_union: BTreeSet<String> = BTreeSet::new();

    for (scope, actual) in &facts.privilege_sets {
        if scope == GLOBAL_SCOPE {
            continue;
        }
        let per_db = clause_outcome(
            ClauseScope::Database,
            expr.operator,
            &expr.database_privileges,
            actual,
        );
        satisfied_union.extend(per_db.satisfied);
        matched |= per_db.matched;
    }

    let satisfied: Vec<String> = expr
        .database_privileges
        .iter()
        .filter(|p| satisfied_union.contains(*p))
        .cloned()
        .collect();
    let missing: Vec<String> = expr
        .database_privileges
        .iter()
        .filter(|p| !satisfied_union.contains(*p))
        .cloned()
        .collect();

    ClauseOutcome {
        scope: ClauseScope::Database,
        operator: expr.operator,
        satisfied,
        missing,
        matched,
    }
}

/// Legacy per-field matcher, kept for rollback.
///
/// Ignores the operator and scopes: matched iff any required privilege from
/// either list appears in the union of all privilege sets. Less precise than
/// DSL v4, which is exactly why the flag exists.
pub struct LegacyEvaluator;

impl RuleMatcher for LegacyEvaluator {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn evaluate(&self, facts: &PermissionFacts, expr: &RuleExpression) -> MatchResult {
        let required: Vec<String> = expr
            .global_privileges
            .iter()
            .chain(expr.database_privileges.iter())
            .cloned()
            .collect();
        if required.is_empty() {
            return MatchResult {
                matched: true,
                clauses: vec![],
            };
        }

        let union: BTreeSet<String> = facts
            .privilege_sets
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect();
        let clause = clause_outcome(ClauseScope::Any, RuleOperator::Or, &required, &union);
        MatchResult {
            matched: clause.matched,
            clauses: vec![clause],
        }
    }
}
