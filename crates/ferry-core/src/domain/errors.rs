//! Errors - エラー型と分類
//!
//! 各層のエラーは `kind()` で運用上の分類 (`ErrorKind`) に落とせる。
//! ストア系のエラーは呼び出し側でログに残してリトライ判断に変換し、
//! 制御ループを止めることはない。

use std::time::Duration;

use thiserror::Error;

use super::ids::TaskId;

/// Operational classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad task parameters, rejected at submission.
    Validation,
    /// No constructor registered for a type name.
    UnknownTaskType,
    /// Transient I/O failure against a queue/lease/secret store.
    StoreUnavailable,
    /// The record already exists in the store.
    Duplicate,
    /// A persisted snapshot could not be encoded or decoded.
    Codec,
    /// The task's own side effect failed.
    Execution,
    /// A deadline elapsed (task run or shutdown drain).
    DeadlineExceeded,
    /// Invalid configuration detected at startup.
    Config,
    /// The consumer's lifecycle does not allow the call (e.g. start after stop).
    Lifecycle,
    /// The engine itself failed, not a task.
    Internal,
}

/// Failures that belong to a task: validation, lookup and execution.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("incorrect parameter: {0}")]
    Validation(String),

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("{0}")]
    Execution(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("task codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl TaskError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Validation(_) => ErrorKind::Validation,
            TaskError::UnknownTaskType(_) => ErrorKind::UnknownTaskType,
            TaskError::Execution(_) => ErrorKind::Execution,
            TaskError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            TaskError::Codec(_) => ErrorKind::Codec,
        }
    }
}

/// Failures of the queue, lease, secret and log stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("task {0} is already tracked")]
    Duplicate(TaskId),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::StoreUnavailable,
            StoreError::Duplicate(_) => ErrorKind::Duplicate,
            StoreError::Task(e) => e.kind(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Task(TaskError::Codec(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(TaskError::Validation("url".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            StoreError::from(TaskError::UnknownTaskType("x".into())).kind(),
            ErrorKind::UnknownTaskType
        );
        assert_eq!(StoreError::unavailable("down").kind(), ErrorKind::StoreUnavailable);
        assert_eq!(StoreError::Duplicate(TaskId::nil()).kind(), ErrorKind::Duplicate);
    }

    #[test]
    fn validation_message_names_the_field() {
        let err = TaskError::Validation("app_id".into());
        assert_eq!(err.to_string(), "incorrect parameter: app_id");
    }
}
