//! ConsumerConfig - consumer の調整値
//!
//! 既定値は単一ノードでの運用を想定した値。YAML などから `serde` で読み込み、
//! `ConsumerBuilder::build()` の時点で検証する（Fail-fast）。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Base period of the admission and recovery timers.
    pub interval_ms: u64,
    /// Capacity of the wait queue between the sources and the worker pool.
    pub max_waits: usize,
    /// Concurrent executions.
    pub max_process: usize,
    /// Lease records claimed per recovery pass.
    pub fetch_size: usize,
    /// How long a claim holds a record.
    pub lease_window_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            max_waits: 128,
            max_process: 64,
            fetch_size: 10,
            lease_window_secs: 300,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

impl ConsumerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn lease_window(&self) -> Duration {
        Duration::from_secs(self.lease_window_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("interval_ms", self.interval_ms as usize),
            ("max_waits", self.max_waits),
            ("max_process", self.max_process),
            ("fetch_size", self.fetch_size),
            ("lease_window_secs", self.lease_window_secs as usize),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = ConsumerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert_eq!(config.lease_window(), Duration::from_secs(300));
    }

    #[rstest]
    #[case::interval(ConsumerConfig { interval_ms: 0, ..Default::default() }, "interval_ms")]
    #[case::waits(ConsumerConfig { max_waits: 0, ..Default::default() }, "max_waits")]
    #[case::process(ConsumerConfig { max_process: 0, ..Default::default() }, "max_process")]
    #[case::fetch(ConsumerConfig { fetch_size: 0, ..Default::default() }, "fetch_size")]
    fn zero_fields_are_rejected(#[case] config: ConsumerConfig, #[case] field: &str) {
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), format!("{field} must be greater than zero"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: ConsumerConfig = serde_json::from_str(r#"{"max_process": 4}"#).unwrap();
        assert_eq!(config.max_process, 4);
        assert_eq!(config.max_waits, 128);
    }
}
