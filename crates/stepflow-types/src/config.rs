//! Engine configuration types.
//!
//! `EngineConfig` represents the `config.toml` that tunes step timeouts,
//! retry backoff, and the default whole-workflow retry budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the workflow engine.
///
/// Loaded from `~/.stepflow/config.toml`. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Step timeout used when a step does not set `timeout_secs`.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// Constant pause between two attempts of the same step, in milliseconds.
    #[serde(default = "default_step_retry_backoff_ms")]
    pub step_retry_backoff_ms: u64,

    /// Whole-workflow retry budget for workflows created without one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

fn default_step_timeout_secs() -> u64 {
    30
}

fn default_step_retry_backoff_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: default_step_timeout_secs(),
            step_retry_backoff_ms: default_step_retry_backoff_ms(),
            default_max_retries: default_max_retries(),
        }
    }
}

impl EngineConfig {
    /// The backoff between step attempts as a `Duration`.
    pub fn step_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.step_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.default_step_timeout_secs, 30);
        assert_eq!(config.step_retry_backoff_ms, 1_000);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.step_retry_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.default_step_timeout_secs, 30);
        assert_eq!(config.default_max_retries, 3);
    }

    #[test]
    fn test_engine_config_deserialize_partial() {
        let toml_str = r#"
step_retry_backoff_ms = 250
default_max_retries = 5
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_step_timeout_secs, 30);
        assert_eq!(config.step_retry_backoff_ms, 250);
        assert_eq!(config.default_max_retries, 5);
    }
}
