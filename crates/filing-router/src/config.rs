use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RouterError, RouterResult};
use crate::rag::intent_classifier::ClassifierConfig;
use crate::rag::routing_policy::{CompletenessWeights, PolicyConfig};
use crate::types::{QueryIntent, MAX_FALLBACKS};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub classifier: ClassifierConfig,
    pub policy: PolicyConfig,
    pub completeness: CompletenessWeights,
    pub arbitration: ArbitrationConfig,
    /// Optional JSON alias file; the built-in seed list is used when unset
    pub aliases_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub max_tokens: usize,
}

impl ArbitrationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 20_000,
            max_tokens: 400,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            policy: PolicyConfig::default(),
            completeness: CompletenessWeights::default(),
            arbitration: ArbitrationConfig::default(),
            aliases_path: None,
        }
    }
}

impl RouterConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> RouterResult<()> {
        if self.arbitration.enabled && self.arbitration.timeout_ms == 0 {
            return Err(RouterError::Config(
                "arbitration.timeout_ms must be > 0 when arbitration is enabled".into(),
            ));
        }
        if self.arbitration.max_tokens == 0 {
            return Err(RouterError::Config("arbitration.max_tokens must be > 0".into()));
        }

        let weights = &self.completeness;
        for (name, w) in [
            ("company", weights.company),
            ("year", weights.year),
            ("doc_type", weights.doc_type),
            ("quarter", weights.quarter),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(RouterError::Config(format!(
                    "completeness.{} must be in [0.0, 1.0]",
                    name
                )));
            }
        }

        let mut classified = HashSet::new();
        for rule in &self.classifier.rules {
            if rule.patterns.is_empty() {
                return Err(RouterError::Config(format!(
                    "classifier rule for {} has no patterns",
                    rule.intent
                )));
            }
            if !(0.0..=1.0).contains(&rule.threshold) {
                return Err(RouterError::Config(format!(
                    "classifier threshold for {} must be in [0.0, 1.0]",
                    rule.intent
                )));
            }
            classified.insert(rule.intent);
        }
        if !(0.0..=1.0).contains(&self.classifier.default_confidence) {
            return Err(RouterError::Config(
                "classifier.default_confidence must be in [0.0, 1.0]".into(),
            ));
        }

        let policy = &self.policy;
        for threshold in [
            policy.sparse_metadata_threshold,
            policy.comparison_fanout_threshold,
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(RouterError::Config(
                    "policy thresholds must be in [0.0, 1.0]".into(),
                ));
            }
        }
        for intent in QueryIntent::ALL {
            let Some(rule) = policy.rules.iter().find(|r| r.intent == intent) else {
                return Err(RouterError::Config(format!("policy has no rule for {}", intent)));
            };
            if rule.fallback.len() > MAX_FALLBACKS || rule.fallback.contains(&rule.primary) {
                return Err(RouterError::Config(format!(
                    "policy fallback for {} must hold at most {} routes other than the primary",
                    intent, MAX_FALLBACKS
                )));
            }
        }
        // OpenEnded is the classifier's default and needs no patterns
        for intent in QueryIntent::ALL {
            if intent != QueryIntent::OpenEnded && !classified.contains(&intent) {
                return Err(RouterError::Config(format!(
                    "classifier has no rule for {}",
                    intent
                )));
            }
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> RouterResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RouterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/filing-router/router.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("filing-router").join("router.json"))
    }

    /// Load from [`Self::default_path`], or built-in defaults when no file is there.
    pub fn load_default() -> RouterResult<Self> {
        Self::load_or_default(Self::default_path().as_deref())
    }

    /// Load `path` when it exists; a missing file means built-in defaults.
    /// A file that exists but fails to parse or validate is an error.
    pub fn load_or_default(path: Option<&Path>) -> RouterResult<Self> {
        match path {
            Some(path) if path.exists() => {
                let config = Self::from_file(path)?;
                tracing::info!(path = %path.display(), "[RouterConfig] Loaded router config");
                Ok(config)
            }
            _ => {
                tracing::debug!("[RouterConfig] No router config file, using defaults");
                Ok(Self::default())
            }
        }
    }
}
