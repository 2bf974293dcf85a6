//! DynTask - object-safe な Task の抽象化
//!
//! # 学習ポイント
//! - Object-safe trait (DynTask)
//! - Type erasure パターン (TypedTask<T> → DynTask)
//!
//! engine・store は具体的なバリアントを知らずに `BoxTask` だけを扱う。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::task::{RunContext, Task};
use crate::domain::{TaskError, TaskMeta};

/// A task of any registered variant.
pub type BoxTask = Box<dyn DynTask>;

/// DynTask は型消去された Task
///
/// # Object Safety
/// - メソッドはジェネリックではない
/// - `Box<dyn DynTask>` として engine に渡せる
#[async_trait]
pub trait DynTask: fmt::Debug + Send + Sync {
    fn task_type(&self) -> &'static str;
    fn meta(&self) -> &TaskMeta;
    fn meta_mut(&mut self) -> &mut TaskMeta;
    fn validate(&self) -> Result<(), TaskError>;
    fn content(&self) -> String;
    fn timeout(&self) -> Duration;
    fn max_retry_times(&self) -> u32;
    async fn run_dyn(&mut self, ctx: &RunContext) -> Result<String, TaskError>;
    fn to_json(&self) -> Result<serde_json::Value, TaskError>;
}

/// Wraps a concrete `Task` so it can live behind `dyn DynTask`.
pub struct TypedTask<T: Task> {
    inner: T,
}

impl<T: Task> TypedTask<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn boxed(inner: T) -> BoxTask {
        Box::new(Self::new(inner))
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Task> fmt::Debug for TypedTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

#[async_trait]
impl<T: Task> DynTask for TypedTask<T> {
    fn task_type(&self) -> &'static str {
        T::TYPE
    }

    fn meta(&self) -> &TaskMeta {
        self.inner.meta()
    }

    fn meta_mut(&mut self) -> &mut TaskMeta {
        self.inner.meta_mut()
    }

    fn validate(&self) -> Result<(), TaskError> {
        self.inner.validate()
    }

    fn content(&self) -> String {
        self.inner.content()
    }

    fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    fn max_retry_times(&self) -> u32 {
        self.inner.max_retry_times()
    }

    async fn run_dyn(&mut self, ctx: &RunContext) -> Result<String, TaskError> {
        self.inner.run(ctx).await
    }

    fn to_json(&self) -> Result<serde_json::Value, TaskError> {
        Ok(serde_json::to_value(&self.inner)?)
    }
}
