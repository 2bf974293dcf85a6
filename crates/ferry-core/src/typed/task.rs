//! Task trait - 型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)
//! - 共通メタデータ (`TaskMeta`) はバリアントに埋め込み、trait からアクセスする

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::domain::{TaskError, TaskId, TaskMeta};

/// Default execution deadline of a task.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default retry budget of a task.
pub const DEFAULT_MAX_RETRY_TIMES: u32 = 6;

/// Task は task_type と型を対応付け、実行方法を定義する
///
/// # 使用例
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// struct MyTask {
///     #[serde(flatten)]
///     meta: TaskMeta,
///     message: String,
/// }
///
/// #[async_trait]
/// impl Task for MyTask {
///     const TYPE: &'static str = "my_task";
///     fn meta(&self) -> &TaskMeta { &self.meta }
///     fn meta_mut(&mut self) -> &mut TaskMeta { &mut self.meta }
///     fn validate(&self) -> Result<(), TaskError> { Ok(()) }
///     fn content(&self) -> String { self.message.clone() }
///     async fn run(&mut self, ctx: &RunContext) -> Result<String, TaskError> { ... }
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: lease store にスナップショットを保存・復元するため
/// - `Debug`: ログ出力のため
/// - `Send + Sync + 'static`: worker (tokio task) へ move するため
#[async_trait]
pub trait Task: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Registry key, persisted next to every snapshot.
    const TYPE: &'static str;

    fn meta(&self) -> &TaskMeta;

    fn meta_mut(&mut self) -> &mut TaskMeta;

    /// Reject tasks with missing required fields before they are queued.
    fn validate(&self) -> Result<(), TaskError>;

    /// Human readable summary stored next to the snapshot.
    fn content(&self) -> String;

    /// Perform the side effect.
    ///
    /// Implementations should record `meta_mut().record_success(..)` /
    /// `record_failure(..)` so the attempt log sees result, error and duration.
    /// The engine enforces `ctx.deadline()` independently.
    async fn run(&mut self, ctx: &RunContext) -> Result<String, TaskError>;

    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    fn max_retry_times(&self) -> u32 {
        DEFAULT_MAX_RETRY_TIMES
    }
}

/// What a single execution attempt is given.
#[derive(Debug, Clone)]
pub struct RunContext {
    task_id: TaskId,
    token: String,
    deadline: Instant,
}

impl RunContext {
    pub fn new(task_id: TaskId, token: impl Into<String>, deadline: Instant) -> Self {
        Self {
            task_id,
            token: token.into(),
            deadline,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Single-use token the remote side must present back on its callback.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
