//! Cache layer — memoized active-rule sets and per-account facts.
//!
//! Staleness here is a correctness bug, not a performance nuance: every code
//! path that writes a rule or a snapshot invalidates the matching entries as
//! part of the same operation ([`crate::catalog`], [`crate::intake`]).
//! Invalidation is independently addressable per granularity; `clear` is the
//! coarse fallback, never a substitute for the targeted paths.
//!
//! Reads are concurrent; writes serialize against reads via the `RwLock`s,
//! so a pass never observes a partially-updated rule set.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::facts::PermissionFacts;
use crate::rule::ClassificationRule;
use crate::snapshot::DbType;

#[derive(Debug, Clone)]
struct FactsEntry {
    /// Invalidation key: the snapshot collection timestamp the facts were
    /// built from. A different timestamp never returns a hit.
    collected_at: DateTime<Utc>,
    facts: Arc<PermissionFacts>,
}

/// Process-wide cache shared by the pass engine, rule catalog, and intake.
#[derive(Default)]
pub struct ClassifyCache {
    rules: RwLock<HashMap<DbType, Arc<Vec<ClassificationRule>>>>,
    facts: RwLock<HashMap<Uuid, FactsEntry>>,
}

impl ClassifyCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Rule sets ──────────────────────────────────────────────

    pub fn rules_for(&self, db_type: DbType) -> Option<Arc<Vec<ClassificationRule>>> {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&db_type)
            .cloned()
    }

    pub fn store_rules(
        &self,
        db_type: DbType,
        rules: Vec<ClassificationRule>,
    ) -> Arc<Vec<ClassificationRule>> {
        let shared = Arc::new(rules);
        self.rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(db_type, Arc::clone(&shared));
        shared
    }

    pub fn invalidate_rules(&self, db_type: DbType) {
        debug!(%db_type, "invalidating rule cache");
        self.rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&db_type);
    }

    pub fn invalidate_rules_all(&self) {
        debug!("invalidating all rule caches");
        self.rules.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    // ── Per-account facts ──────────────────────────────────────

    /// Hit only when the cached entry was built from the snapshot collected
    /// at exactly `collected_at`.
    pub fn facts_for(
        &self,
        account_id: Uuid,
        collected_at: DateTime<Utc>,
    ) -> Option<Arc<PermissionFacts>> {
        let guard = self.facts.read().unwrap_or_else(|e| e.into_inner());
        guard
            .get(&account_id)
            .filter(|entry| entry.collected_at == collected_at)
            .map(|entry| Arc::clone(&entry.facts))
    }

    pub fn store_facts(
        &self,
        account_id: Uuid,
        collected_at: DateTime<Utc>,
        facts: PermissionFacts,
    ) -> Arc<PermissionFacts> {
        let shared = Arc::new(facts);
        self.facts.write().unwrap_or_else(|e| e.into_inner()).insert(
            account_id,
            FactsEntry {
                collected_at,
                facts: Arc::clone(&shared),
            },
        );
        shared
    }

    pub fn invalidate_facts(&self, account_id: Uuid) {
        debug!(%account_id, "invalidating facts cache");
        self.facts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&account_id);
    }

    // ── Coarse fallback ────────────────────────────────────────

    pub fn clear(&self) {
        debug!("clearing classification caches");
        self.rules.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.facts.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rule(db_type: DbType) -> ClassificationRule {
        ClassificationRule {
            rule_group_id: Uuid::new_v4(),
            rule_version: 1,
            rule_name: "r".into(),
            db_type,
            classification_code: "super".into(),
            rule_expression: serde_json::json!({}),
            is_active: true,
            superseded_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rule_cache_is_per_db_type() {
        let cache = ClassifyCache::new();
        cache.store_rules(DbType::MySql, vec![rule(DbType::MySql)]);
        cache.store_rules(DbType::Oracle, vec![rule(DbType::Oracle)]);

        cache.invalidate_rules(DbType::MySql);
        assert!(cache.rules_for(DbType::MySql).is_none());
        assert!(cache.rules_for(DbType::Oracle).is_some());

        cache.invalidate_rules_all();
        assert!(cache.rules_for(DbType::Oracle).is_none());
    }

    #[test]
    fn facts_hit_requires_matching_collection_timestamp() {
        let cache = ClassifyCache::new();
        let account = Uuid::new_v4();
        let t0 = Utc::now();
        cache.store_facts(account, t0, PermissionFacts::default());

        assert!(cache.facts_for(account, t0).is_some());
        assert!(cache.facts_for(account, t0 + Duration::seconds(60)).is_none());
    }

    #[test]
    fn facts_invalidation_is_per_account() {
        let cache = ClassifyCache::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();
        cache.store_facts(a, t0, PermissionFacts::default());
        cache.store_facts(b, t0, PermissionFacts::default());

        cache.invalidate_facts(a);
        assert!(cache.facts_for(a, t0).is_none());
        assert!(cache.facts_for(b, t0).is_some());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = ClassifyCache::new();
        let account = Uuid::new_v4();
        let t0 = Utc::now();
        cache.store_rules(DbType::MySql, vec![rule(DbType::MySql)]);
        cache.store_facts(account, t0, PermissionFacts::default());

        cache.clear();
        assert!(cache.rules_for(DbType::MySql).is_none());
        assert!(cache.facts_for(account, t0).is_none());
    }
}
