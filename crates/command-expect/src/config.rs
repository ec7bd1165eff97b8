//! Session configuration
//!
//! A [`ProcessConfig`] can be built in code or parsed from YAML, e.g.
//!
//! ```yaml
//! verbose: true
//! stop_timeout_ms: 5000
//! poll_interval_ms: 50
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_STOP_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Tunables for an [`InteractiveProcess`](crate::InteractiveProcess)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
    /// Mirror every drained line to the session's line sink
    pub verbose: bool,

    /// How long `stop` waits after a graceful terminate before killing, in milliseconds
    pub stop_timeout_ms: u64,

    /// Readiness timeout used by the drainers between stop-signal checks
    pub poll_interval_ms: u64,

    /// Name used for drainer threads and log fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            label: None,
        }
    }
}

impl ProcessConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ProcessConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if let Some(label) = &self.label {
            if label.trim().is_empty() {
                return Err(Error::Config("label must not be blank".into()));
            }
        }
        Ok(())
    }

    /// Set verbose mirroring
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the graceful-terminate timeout used by `stop`
    ///
    /// Sub-millisecond parts round up.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = ceil_millis(timeout);
        self
    }

    /// Set the drainer readiness timeout
    ///
    /// Sub-millisecond parts round up, so only `Duration::ZERO` fails validation.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = ceil_millis(interval);
        self
    }

    /// Set the label used for threads and logs
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The graceful-terminate timeout
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// The drainer readiness timeout
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn ceil_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros().div_ceil(1000)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessConfig::default();
        assert!(!config.verbose);
        assert_eq!(config.stop_timeout(), Duration::from_secs(300));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_partial_yaml() {
        let config =
            ProcessConfig::from_yaml_str("verbose: true\nstop_timeout_ms: 5000\n").unwrap();
        assert!(config.verbose);
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_sub_second_stop_timeout_is_kept() {
        let config = ProcessConfig::default().with_stop_timeout(Duration::from_millis(900));
        assert_eq!(config.stop_timeout(), Duration::from_millis(900));

        let config = ProcessConfig::from_yaml_str("stop_timeout_ms: 250").unwrap();
        assert_eq!(config.stop_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_sub_millisecond_durations_round_up() {
        let config = ProcessConfig::default()
            .with_poll_interval(Duration::from_micros(500))
            .with_stop_timeout(Duration::from_micros(1));
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.stop_timeout(), Duration::from_millis(1));
        config.validate().unwrap();

        let config = ProcessConfig::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let err = ProcessConfig::from_yaml_str("poll_interval_ms: 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let err = ProcessConfig::from_yaml_str("verbos: true").unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");
        std::fs::write(&path, "label: repl\npoll_interval_ms: 20\n").unwrap();

        let config = ProcessConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.label.as_deref(), Some("repl"));
        assert_eq!(config.poll_interval(), Duration::from_millis(20));
    }
}
