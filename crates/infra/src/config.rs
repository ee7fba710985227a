//! Engine configuration.
//!
//! Loaded from an optional file plus `SIGIL_`-prefixed environment variables
//! (e.g. `SIGIL_MAX_PUSH_ATTEMPTS=5`). Environment wins over the file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::RetryPolicy;

pub const ENV_PREFIX: &str = "SIGIL";

const DEFAULT_MAX_PUSH_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Load → decide → push cycles per command, including the first.
    #[serde(default = "default_max_push_attempts")]
    pub max_push_attempts: u32,

    /// Linear backoff base between retries.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Primary database. `None` runs on the in-memory store.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Read replica used for loads and searches only.
    #[serde(default)]
    pub replica_url: Option<String>,
}

fn default_max_push_attempts() -> u32 {
    DEFAULT_MAX_PUSH_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_push_attempts: DEFAULT_MAX_PUSH_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            database_url: None,
            replica_url: None,
        }
    }
}

impl EngineConfig {
    /// Load from `file` (if given and present) and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(file, None)
    }

    /// Same as [`EngineConfig::load`] but reads variables from `env` instead of
    /// the process environment when given.
    pub fn load_with_env(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env.map(|vars| vars.into_iter().collect())),
            )
            .build()?;

        let cfg: EngineConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_push_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_push_attempts must be at least 1".to_string(),
            ));
        }
        if self.replica_url.is_some() && self.database_url.is_none() {
            return Err(ConfigError::Invalid(
                "replica_url requires database_url".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_push_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_apply_without_any_source() {
        let cfg = EngineConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn prefixed_environment_overrides_defaults() {
        let cfg = EngineConfig::load_with_env(
            None,
            env(&[
                ("SIGIL_MAX_PUSH_ATTEMPTS", "5"),
                ("SIGIL_RETRY_BACKOFF_MS", "25"),
                ("SIGIL_DATABASE_URL", "postgres://localhost/sigil"),
                ("OTHER_MAX_PUSH_ATTEMPTS", "9"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.max_push_attempts, 5);
        assert_eq!(cfg.retry_policy().delay(2), Duration::from_millis(50));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/sigil"));
        assert_eq!(cfg.replica_url, None);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err =
            EngineConfig::load_with_env(None, env(&[("SIGIL_MAX_PUSH_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn replica_without_primary_is_rejected() {
        let cfg = EngineConfig {
            replica_url: Some("postgres://replica/sigil".to_string()),
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
