//! Configuration for the synchronization engine.
//!
//! Values come from an optional `protoman.toml` at the project root:
//!
//! ```toml
//! [sync]
//! workers = 8
//! max_attempts = 3
//! initial_backoff_ms = 100
//! max_backoff_ms = 5000
//! backoff_multiplier = 2.0
//!
//! [registry]
//! timeout_secs = 30
//! republish = "reject"   # or "allow"; directory registries only
//! ```
//!
//! A missing file yields the defaults; unknown sections are ignored.

use std::path::Path;
use std::time::Duration;

use protoman_registry::RepublishPolicy;
use serde::Deserialize;

use crate::error::{SyncError, SyncResult};

/// Name of the optional project configuration file.
pub const CONFIG_FILE: &str = "protoman.toml";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of steps in flight at once.
    pub workers: usize,
    /// Retry configuration for registry calls.
    pub retry: RetryConfig,
    /// Request timeout for network transports.
    pub timeout: Duration,
    /// Republish policy for directory registries opened by this project.
    pub republish: RepublishPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            workers: 8,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            republish: RepublishPolicy::default(),
        }
    }

    /// Sets the worker count (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Load `protoman.toml` from `project_root`, falling back to defaults.
    pub fn load(project_root: &Path) -> SyncResult<Self> {
        let path = project_root.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
        Self::from_toml(&content).map_err(|detail| SyncError::Config { path, detail })
    }

    /// Parse configuration text.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| e.to_string())?;
        let mut config = Self::default();

        if let Some(workers) = file.sync.workers {
            if workers == 0 {
                return Err("sync.workers must be at least 1".to_string());
            }
            config.workers = workers;
        }
        if let Some(attempts) = file.sync.max_attempts {
            if attempts == 0 {
                return Err("sync.max_attempts must be at least 1".to_string());
            }
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = file.sync.initial_backoff_ms {
            config.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.sync.max_backoff_ms {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = file.sync.backoff_multiplier {
            if !(multiplier >= 1.0) {
                return Err("sync.backoff_multiplier must be >= 1.0".to_string());
            }
            config.retry.backoff_multiplier = multiplier;
        }
        if let Some(secs) = file.registry.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = file.registry.republish {
            config.republish = policy;
        }
        Ok(config)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per call (1 = no retry).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculates the delay before attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    sync: SyncSection,
    #[serde(default)]
    registry: RegistrySection,
}

#[derive(Debug, Default, Deserialize)]
struct SyncSection {
    workers: Option<usize>,
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistrySection {
    timeout_secs: Option<u64>,
    republish: Option<RepublishPolicy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.workers, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.republish, RepublishPolicy::Reject);
    }

    #[test]
    fn parse_full_file() {
        let config = SyncConfig::from_toml(
            r#"
[sync]
workers = 2
max_attempts = 5
initial_backoff_ms = 10
max_backoff_ms = 40
backoff_multiplier = 3.0

[registry]
timeout_secs = 7
republish = "allow"

[unrelated]
key = "ignored"
"#,
        )
        .unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(10));
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert_eq!(config.republish, RepublishPolicy::Allow);
    }

    #[test]
    fn reject_zero_workers() {
        assert!(SyncConfig::from_toml("[sync]\nworkers = 0\n").is_err());
        assert!(SyncConfig::from_toml("[sync\n").is_err());
        assert!(SyncConfig::from_toml("[registry]\nrepublish = \"maybe\"\n").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(dir.path()).unwrap();
        assert_eq!(config.workers, SyncConfig::default().workers);
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[sync]\nworkers = \"many\"\n").unwrap();
        let err = SyncConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(8), Duration::from_secs(5));
    }
}
