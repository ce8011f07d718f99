//! PostgreSQL implementations of the `permclass_core` port traits.
//!
//! Each store is a newtype wrapping `PgPool`. All SQL is runtime-checked
//! (`sqlx::query`, not `sqlx::query!`) to avoid a compile-time database
//! requirement; the schema lives in `migrations/`.

mod sqlx_types;
mod store;

pub use store::{
    PgAssignmentStore, PgClassificationStore, PgMatchStatsStore, PgRuleStore, PgSnapshotStore,
};
