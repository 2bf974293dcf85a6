//! YAML 設定の読み込み

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use ferry_core::app::ConsumerConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Owner id of this consumer; must be unique across the pool.
    pub node_id: String,
    pub database: DatabaseConfig,
    pub consumer: ConsumerConfig,
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Queue pops older than this that were never confirmed are put back.
    pub stale_pop_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: "ferry-1".into(),
            database: DatabaseConfig::default(),
            consumer: ConsumerConfig::default(),
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ferry.db"),
            stale_pop_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: AppConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        anyhow::ensure!(!config.node_id.is_empty(), "node_id must not be empty");
        anyhow::ensure!(
            config.database.stale_pop_secs > 0,
            "database.stale_pop_secs must be greater than zero"
        );
        config.consumer.validate()?;
        Ok(config)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn stale_pop(&self) -> Duration {
        Duration::from_secs(self.database.stale_pop_secs)
    }
}
