//! Account permission classification core.
//!
//! Normalizes heterogeneous database-account permission payloads (MySQL,
//! PostgreSQL, SQL Server, Oracle) into one canonical, versioned snapshot
//! schema, derives a queryable facts projection, and evaluates declarative
//! classification rules against those facts to place accounts into risk
//! buckets, with immutable rule versioning, a rollout flag between the
//! legacy and DSL v4 evaluators, explicit cache invalidation, and daily
//! match statistics.
//!
//! # Architecture
//!
//! ```text
//! raw payload ──► normalize ──► PermissionSnapshot ──► build_facts ──► PermissionFacts
//!                                                                          │
//!                        RuleCatalog ──► active rules ──► RuleMatcher ◄────┘
//!                                              │
//!                                              ▼
//!                         ClassificationEngine::run_pass
//!                        (assignments + daily match stats)
//! ```
//!
//! Storage is behind port traits ([`ports`]); `permclass_postgres` provides
//! the production adapter and [`memory`] the in-process one. The cache layer
//! is explicit-invalidation only: [`catalog::RuleCatalog`] and
//! [`intake::SnapshotIntake`] invalidate as part of every write path.

pub mod cache;
pub mod catalog;
pub mod classification;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod facts;
pub mod intake;
pub mod memory;
pub mod normalize;
pub mod ports;
pub mod rule;
pub mod snapshot;

pub use cache::ClassifyCache;
pub use catalog::RuleCatalog;
pub use classification::{AccountClassification, NewClassification, SYSTEM_CLASSIFICATIONS};
pub use config::EngineConfig;
pub use engine::{ClassificationEngine, PassOutcome, PassSummary, SkippedUnit};
pub use error::Error;
pub use evaluate::{
    evaluator_for, ClauseOutcome, ClauseScope, DslEvaluator, EvaluatorMode, LegacyEvaluator,
    MatchResult, RuleMatcher,
};
pub use facts::{build_facts, PermissionFacts, GLOBAL_SCOPE};
pub use intake::SnapshotIntake;
pub use normalize::{normalize, normalize_type_specific};
pub use ports::{
    AccountRef, AssignmentChange, AssignmentStore, ClassificationAssignment, ClassificationStore,
    DailyMatchStat, MatchStatsStore, Result, RuleStore, SnapshotRecord, SnapshotStore,
};
pub use rule::{ClassificationRule, NewRule, RuleExpression, RuleOperator};
pub use snapshot::{
    CategoryData, DbType, PermissionSnapshot, PrivilegeEntry, SnapshotMeta,
    SNAPSHOT_SCHEMA_VERSION, TYPE_SPECIFIC_VERSION,
};
