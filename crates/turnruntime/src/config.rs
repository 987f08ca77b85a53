use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use turncore::FlowError;

/// Timing knobs of the turn gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// How long an acquirer waits for a busy key before giving up.
    pub wait_timeout_ms: u64,
    /// Delay between two acquisition attempts.
    pub poll_interval_ms: u64,
    /// Age after which a lock record is presumed abandoned.
    pub stale_after_ms: u64,
    /// When set, a holder refreshes its record at this interval while working.
    pub heartbeat_ms: Option<u64>,
}

impl GateConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_ms = Some(interval.as_millis() as u64);
        self
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 60_000,
            poll_interval_ms: 20,
            stale_after_ms: 5 * 60 * 1000,
            heartbeat_ms: None,
        }
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub gate: GateConfig,
    pub event_buffer_size: usize,
    /// SQLite file backing the lock table. `None` keeps locks in memory.
    pub lock_db: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, FlowError> {
        let config: RuntimeConfig =
            toml::from_str(raw).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, FlowError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if let Some(heartbeat) = self.gate.heartbeat() {
            if heartbeat >= self.gate.stale_after() {
                return Err(FlowError::Config(format!(
                    "heartbeat_ms ({}) must be shorter than stale_after_ms ({})",
                    heartbeat.as_millis(),
                    self.gate.stale_after_ms
                )));
            }
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            event_buffer_size: 1000,
            lock_db: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let gate = GateConfig::default();
        assert_eq!(gate.wait_timeout(), Duration::from_secs(60));
        assert_eq!(gate.poll_interval(), Duration::from_millis(20));
        assert_eq!(gate.stale_after(), Duration::from_secs(300));
        assert_eq!(gate.heartbeat(), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            lock_db = "/tmp/turns.db"

            [gate]
            wait_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.gate.wait_timeout_ms, 500);
        assert_eq!(config.gate.poll_interval_ms, 20);
        assert_eq!(config.event_buffer_size, 1000);
        assert_eq!(config.lock_db, Some(PathBuf::from("/tmp/turns.db")));
    }

    #[test]
    fn rejects_heartbeat_longer_than_stale_threshold() {
        let err = RuntimeConfig::from_toml_str(
            r#"
            [gate]
            stale_after_ms = 1000
            heartbeat_ms = 5000
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, FlowError::Config(_)));
    }
}
