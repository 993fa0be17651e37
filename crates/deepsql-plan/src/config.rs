//! Deep operation configuration.

use deepsql_core::error::ConfigError;
use deepsql_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Depth limit applied to compositions without their own annotation.
pub const DEFAULT_DEPTH_LIMIT: usize = 3;

/// Which deep write strategy to plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Single block when the executor supports it, flattening otherwise.
    #[default]
    Auto,
    /// One statement per touched target.
    Flatten,
    /// One atomic block program.
    SingleBlock,
}

impl WriteStrategy {
    /// Resolve `Auto` against executor capability.
    pub fn resolve(self, supports_single_block: bool) -> Self {
        match self {
            WriteStrategy::Auto if supports_single_block => WriteStrategy::SingleBlock,
            WriteStrategy::Auto => WriteStrategy::Flatten,
            other => other,
        }
    }
}

/// Configuration for deep planning and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepConfig {
    /// How often one composition may repeat along a chain.
    pub default_depth_limit: usize,
    /// Generate absent surrogate keys of owned rows.
    pub auto_generate_keys: bool,
    pub strategy: WriteStrategy,
}

impl Default for DeepConfig {
    fn default() -> Self {
        Self {
            default_depth_limit: DEFAULT_DEPTH_LIMIT,
            auto_generate_keys: true,
            strategy: WriteStrategy::Auto,
        }
    }
}

impl DeepConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default depth limit (builder pattern).
    #[must_use]
    pub fn depth_limit(mut self, limit: usize) -> Self {
        self.default_depth_limit = limit;
        self
    }

    /// Set the `auto_generate_keys` option (builder pattern).
    #[must_use]
    pub fn auto_generate_keys(mut self, value: bool) -> Self {
        self.auto_generate_keys = value;
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: WriteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid deep configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_depth_limit == 0 {
            return Err(Error::Config(ConfigError {
                message: "default_depth_limit must be at least 1".to_string(),
                source: None,
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DeepConfig::default();
        assert_eq!(config.default_depth_limit, 3);
        assert!(config.auto_generate_keys);
        assert_eq!(config.strategy, WriteStrategy::Auto);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = DeepConfig::from_json(r#"{"strategy": "single_block", "auto_generate_keys": false}"#)
            .unwrap();
        assert_eq!(config.strategy, WriteStrategy::SingleBlock);
        assert!(!config.auto_generate_keys);
        assert_eq!(config.default_depth_limit, 3);
    }

    #[test]
    fn rejects_zero_depth_and_garbage() {
        let err = DeepConfig::from_json(r#"{"default_depth_limit": 0}"#).unwrap_err();
        assert!(err.is_config_error());
        let err = DeepConfig::from_json("not json").unwrap_err();
        assert!(err.is_config_error());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn auto_resolves_by_capability() {
        assert_eq!(WriteStrategy::Auto.resolve(true), WriteStrategy::SingleBlock);
        assert_eq!(WriteStrategy::Auto.resolve(false), WriteStrategy::Flatten);
        assert_eq!(WriteStrategy::Flatten.resolve(true), WriteStrategy::Flatten);
    }
}
