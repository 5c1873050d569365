//! Typed configuration: TOML file, then environment overrides.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Loaded once at startup; fails fast on anything invalid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::{QueueName, RetryPolicy};
use crate::worker::{InvalidPayloadPolicy, TickBudget, WorkerConfig};

pub const ENV_DATABASE: &str = "SPINDLE_DATABASE";
pub const ENV_QUEUE: &str = "SPINDLE_QUEUE";
pub const ENV_LEASE_SECS: &str = "SPINDLE_LEASE_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {name} has invalid value {value:?}")]
    Env { name: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpindleConfig {
    /// SQLite database file.
    pub database: PathBuf,

    /// Queue to produce into and consume from.
    pub queue: String,

    /// Lease window for claimed items, in seconds.
    pub lease_secs: u64,

    pub worker: WorkerSection,
    pub retry: RetrySection,
    pub invalid_payload: InvalidPayloadPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSection {
    pub workers: usize,
    pub interval_secs: u64,
    pub max_items_per_tick: usize,
    pub max_secs_per_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    /// Claims allowed per item; 0 means no limit.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for SpindleConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("spindle.sqlite"),
            queue: "feed_import".to_string(),
            lease_secs: 30,
            worker: WorkerSection::default(),
            retry: RetrySection::default(),
            invalid_payload: InvalidPayloadPolicy::default(),
        }
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        let budget = TickBudget::default();
        Self {
            workers: 1,
            interval_secs: 60,
            max_items_per_tick: budget.max_items,
            max_secs_per_tick: budget.max_duration.as_secs(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts.unwrap_or(0),
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl SpindleConfig {
    /// Defaults, overlaid with `path` (if any), overlaid with the process
    /// environment, then validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SPINDLE_*` overrides, reading variables through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database) = lookup(ENV_DATABASE) {
            self.database = PathBuf::from(database);
        }
        if let Some(queue) = lookup(ENV_QUEUE) {
            self.queue = queue;
        }
        if let Some(value) = lookup(ENV_LEASE_SECS) {
            self.lease_secs = value.trim().parse().map_err(|_| ConfigError::Env {
                name: ENV_LEASE_SECS,
                value,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_secs == 0 {
            return Err(ConfigError::Invalid("lease_secs must be greater than 0".into()));
        }
        if self.worker.workers == 0 {
            return Err(ConfigError::Invalid("worker.workers must be greater than 0".into()));
        }
        if self.worker.max_items_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "worker.max_items_per_tick must be greater than 0".into(),
            ));
        }
        if self.worker.max_secs_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "worker.max_secs_per_tick must be greater than 0".into(),
            ));
        }
        if self.worker.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker.interval_secs must be greater than 0".into(),
            ));
        }
        // failed items stay leased until the tick ends
        if self.lease_secs <= self.worker.max_secs_per_tick {
            return Err(ConfigError::Invalid(format!(
                "lease_secs ({}) must exceed worker.max_secs_per_tick ({})",
                self.lease_secs, self.worker.max_secs_per_tick
            )));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.multiplier must be at least 1.0".into()));
        }
        QueueName::new(self.queue.as_str()).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(())
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.worker.interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: (self.retry.max_attempts > 0).then_some(self.retry.max_attempts),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            lease: self.lease(),
            budget: TickBudget {
                max_items: self.worker.max_items_per_tick,
                max_duration: Duration::from_secs(self.worker.max_secs_per_tick),
            },
            retry: self.retry_policy(),
            invalid_payload: self.invalid_payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        let config = SpindleConfig::from_toml_str("").unwrap();
        assert_eq!(config, SpindleConfig::default());
        assert_eq!(config.queue, "feed_import");
        assert_eq!(config.lease(), Duration::from_secs(30));
        assert_eq!(config.worker_config(), WorkerConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn parses_every_section() {
        let config = SpindleConfig::from_toml_str(
            r#"
            database = "/var/lib/spindle/queue.sqlite"
            queue = "exqueue_import"
            lease_secs = 120
            invalid_payload = "leave_leased"

            [worker]
            workers = 4
            interval_secs = 10
            max_items_per_tick = 25
            max_secs_per_tick = 2

            [retry]
            max_attempts = 0
            base_delay_ms = 500
            multiplier = 3.0
            "#,
        )
        .unwrap();

        assert_eq!(config.database, PathBuf::from("/var/lib/spindle/queue.sqlite"));
        assert_eq!(config.worker.workers, 4);
        let worker = config.worker_config();
        assert_eq!(worker.lease, Duration::from_secs(120));
        assert_eq!(worker.budget.max_items, 25);
        assert_eq!(worker.invalid_payload, InvalidPayloadPolicy::LeaveLeased);
        assert_eq!(worker.retry.max_attempts, None);
        assert_eq!(worker.retry.next_delay(2), Duration::from_millis(1500));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            SpindleConfig::from_toml_str("lease_sec = 5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DATABASE, "/tmp/other.sqlite"),
            (ENV_QUEUE, "other"),
            (ENV_LEASE_SECS, "45"),
        ]);
        let mut config = SpindleConfig::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/other.sqlite"));
        assert_eq!(config.queue, "other");
        assert_eq!(config.lease_secs, 45);
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = SpindleConfig::default();
        let err = config
            .apply_env(|name| (name == ENV_LEASE_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: ENV_LEASE_SECS, .. }));
    }

    #[rstest]
    #[case::zero_time_budget("[worker]\nmax_secs_per_tick = 0")]
    #[case::zero_interval("[worker]\ninterval_secs = 0")]
    #[case::zero_items("[worker]\nmax_items_per_tick = 0")]
    #[case::lease_equal_to_tick("lease_secs = 5\n[worker]\nmax_secs_per_tick = 5")]
    #[case::lease_shorter_than_tick("lease_secs = 3\n[worker]\nmax_secs_per_tick = 10")]
    fn validation_rejects_budgets_that_stall_or_outlive_the_lease(#[case] toml: &str) {
        let config = SpindleConfig::from_toml_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validation_rejects_zero_lease_and_workers() {
        let mut config = SpindleConfig {
            lease_secs: 0,
            ..SpindleConfig::default()
        };
        assert!(config.validate().is_err());

        config.lease_secs = 30;
        config.worker.workers = 0;
        assert!(config.validate().is_err());

        config.worker.workers = 2;
        config.queue = "not a queue".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpindleConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
