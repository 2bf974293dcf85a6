//! ConsumerBuilder - consumer の構築とワイヤリング
//!
//! # 設計
//! - ストアはすべて明示的に渡す（グローバルなデフォルト実装は持たない）
//! - 起動時検証（Fail-fast）: port の不足と不正な設定値は `build()` で弾く

use std::sync::Arc;

use thiserror::Error;

use super::config::{ConfigError, ConsumerConfig};
use super::consumer::Consumer;
use crate::domain::{ErrorKind, OwnerId};
use crate::ports::{AttemptLog, Clock, LeaseStore, NeverSuspend, SecretStore, SuspendCheck, SystemClock, TaskQueue};

/// ConsumerBuilder は Consumer を構築
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(SqliteStore::open("ferry.db", codec, clock, lease_window)?);
/// let consumer = ConsumerBuilder::new("node-1")
///     .config(config)
///     .store(store)
///     .build()?;
/// consumer.start()?;
/// ```
pub struct ConsumerBuilder {
    owner: OwnerId,
    config: ConsumerConfig,
    queue: Option<Arc<dyn TaskQueue>>,
    leases: Option<Arc<dyn LeaseStore>>,
    secrets: Option<Arc<dyn SecretStore>>,
    attempts: Option<Arc<dyn AttemptLog>>,
    clock: Arc<dyn Clock>,
    suspend: Arc<dyn SuspendCheck>,
}

/// BuildError は consumer 構築時のエラー
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing {0}: every store must be given explicitly")]
    MissingPort(&'static str),

    #[error("invalid consumer config: {0}")]
    Config(#[from] ConfigError),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

impl ConsumerBuilder {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: OwnerId::new(owner),
            config: ConsumerConfig::default(),
            queue: None,
            leases: None,
            secrets: None,
            attempts: None,
            clock: Arc::new(SystemClock),
            suspend: Arc::new(NeverSuspend),
        }
    }

    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn leases(mut self, leases: Arc<dyn LeaseStore>) -> Self {
        self.leases = Some(leases);
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn attempt_log(mut self, attempts: Arc<dyn AttemptLog>) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Use one value for all four stores (e.g. `SqliteStore`).
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: TaskQueue + LeaseStore + SecretStore + AttemptLog + 'static,
    {
        self.queue(store.clone())
            .leases(store.clone())
            .secrets(store.clone())
            .attempt_log(store)
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn suspend_check(mut self, suspend: Arc<dyn SuspendCheck>) -> Self {
        self.suspend = suspend;
        self
    }

    pub fn build(self) -> Result<Consumer, BuildError> {
        self.config.validate()?;
        let queue = self.queue.ok_or(BuildError::MissingPort("task queue"))?;
        let leases = self.leases.ok_or(BuildError::MissingPort("lease store"))?;
        let secrets = self.secrets.ok_or(BuildError::MissingPort("secret store"))?;
        let attempts = self.attempts.ok_or(BuildError::MissingPort("attempt log"))?;
        Ok(Consumer::new(
            self.owner,
            self.config,
            queue,
            leases,
            secrets,
            attempts,
            self.clock,
            self.suspend,
        ))
    }
}
