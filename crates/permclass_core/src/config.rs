//! Engine configuration.
//!
//! The evaluator rollout flag and the pass concurrency bound. Loaded from
//! YAML or from `PERMCLASS_*` environment overrides; the flag is read once
//! per pass, never mid-run.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;
use crate::evaluate::EvaluatorMode;

fn default_concurrency() -> usize {
    8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which evaluator passes run with: `dsl_v4` or `legacy`.
    #[serde(default)]
    pub evaluator: EvaluatorMode,
    /// Upper bound on concurrent per-account evaluation within one pass.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluator: EvaluatorMode::default(),
            concurrency: default_concurrency(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(source: &str) -> Result<Self, Error> {
        serde_yaml::from_str(source)
            .map_err(|e| Error::InvalidInput(format!("engine config: {e}")))
    }

    /// Defaults overridden by `PERMCLASS_EVALUATOR` and
    /// `PERMCLASS_CONCURRENCY` when set. Unparseable values are ignored with
    /// a warning rather than failing startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("PERMCLASS_EVALUATOR") {
            match raw.as_str() {
                "dsl_v4" => config.evaluator = EvaluatorMode::DslV4,
                "legacy" => config.evaluator = EvaluatorMode::Legacy,
                other => warn!(value = other, "ignoring unknown PERMCLASS_EVALUATOR"),
            }
        }
        if let Ok(raw) = std::env::var("PERMCLASS_CONCURRENCY") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.concurrency = n,
                _ => warn!(value = %raw, "ignoring invalid PERMCLASS_CONCURRENCY"),
            }
        }
        config
    }
}
