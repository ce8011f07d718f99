//! Rule catalog — the authoring/read surface over the rule store.
//!
//! Every write path here invalidates the rule cache for the affected engine
//! type as part of the same operation, so the next pass always resolves the
//! rule set a fresh store read would produce.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::cache::ClassifyCache;
use crate::ports::{Result, RuleStore};
use crate::rule::{ClassificationRule, NewRule, RuleExpression};
use crate::snapshot::DbType;

pub struct RuleCatalog {
    rules: Arc<dyn RuleStore>,
    cache: Arc<ClassifyCache>,
}

impl RuleCatalog {
    pub fn new(rules: Arc<dyn RuleStore>, cache: Arc<ClassifyCache>) -> Self {
        Self { rules, cache }
    }

    /// Create version 1 of a new rule group. The expression document is
    /// validated up front so authoring errors surface to the author, not to
    /// the next pass.
    pub async fn create_rule(&self, rule: NewRule) -> Result<ClassificationRule> {
        RuleExpression::parse(&rule.rule_expression)?;
        let created = self.rules.create_rule(rule).await?;
        self.cache.invalidate_rules(created.db_type);
        info!(
            rule_group_id = %created.rule_group_id,
            db_type = %created.db_type,
            "created rule group"
        );
        Ok(created)
    }

    /// Author a new version of an existing group. The prior version's row is
    /// superseded, never mutated.
    pub async fn publish_version(
        &self,
        rule_group_id: Uuid,
        rule_name: Option<String>,
        rule_expression: Value,
    ) -> Result<ClassificationRule> {
        RuleExpression::parse(&rule_expression)?;
        let published = self
            .rules
            .publish_version(rule_group_id, rule_name, rule_expression)
            .await?;
        self.cache.invalidate_rules(published.db_type);
        info!(
            rule_group_id = %published.rule_group_id,
            rule_version = published.rule_version,
            "published rule version"
        );
        Ok(published)
    }

    pub async fn set_active(&self, rule_group_id: Uuid, active: bool) -> Result<ClassificationRule> {
        let updated = self.rules.set_active(rule_group_id, active).await?;
        self.cache.invalidate_rules(updated.db_type);
        info!(
            rule_group_id = %updated.rule_group_id,
            active,
            "toggled rule activation"
        );
        Ok(updated)
    }

    /// Live rule set for an engine type, cache-first.
    pub async fn active_rules(&self, db_type: DbType) -> Result<Arc<Vec<ClassificationRule>>> {
        if let Some(cached) = self.cache.rules_for(db_type) {
            return Ok(cached);
        }
        let rules = self.rules.active_rules(db_type).await?;
        Ok(self.cache.store_rules(db_type, rules))
    }

    /// Historical lookup for assignment replay; bypasses the cache.
    pub async fn rule_version(
        &self,
        rule_group_id: Uuid,
        rule_version: i32,
    ) -> Result<Option<ClassificationRule>> {
        self.rules.rule_version(rule_group_id, rule_version).await
    }

    pub async fn history(&self, rule_group_id: Uuid) -> Result<Vec<ClassificationRule>> {
        self.rules.history(rule_group_id).await
    }
}
