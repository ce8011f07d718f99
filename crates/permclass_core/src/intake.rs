//! Snapshot intake — the collection pipeline's entry point.
//!
//! Normalizes a raw adapter payload, stores the canonical snapshot, and
//! invalidates the account's cached facts in the same operation. Schema
//! violations surface to the caller as hard errors for that account's
//! snapshot; degraded-but-known input lands as warning codes on the stored
//! snapshot instead.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::ClassifyCache;
use crate::normalize::normalize;
use crate::ports::{Result, SnapshotStore};
use crate::snapshot::{DbType, PermissionSnapshot, SnapshotMeta};

pub struct SnapshotIntake {
    snapshots: Arc<dyn SnapshotStore>,
    cache: Arc<ClassifyCache>,
}

impl SnapshotIntake {
    pub fn new(snapshots: Arc<dyn SnapshotStore>, cache: Arc<ClassifyCache>) -> Self {
        Self { snapshots, cache }
    }

    pub async fn ingest(
        &self,
        account_id: Uuid,
        instance_id: Uuid,
        raw: &Value,
        db_type: DbType,
        meta: SnapshotMeta,
    ) -> Result<PermissionSnapshot> {
        let snapshot = normalize(raw, db_type, meta)?;
        if !snapshot.errors.is_empty() {
            warn!(
                %account_id,
                codes = ?snapshot.errors,
                "snapshot stored with degraded-input warnings"
            );
        }
        self.snapshots
            .put_snapshot(account_id, instance_id, &snapshot)
            .await?;
        self.cache.invalidate_facts(account_id);
        info!(%account_id, %db_type, "ingested permission snapshot");
        Ok(snapshot)
    }
}
