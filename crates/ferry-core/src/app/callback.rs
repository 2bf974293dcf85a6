//! CallbackVerifier - タスクの遠隔側から返ってきたコールバックの検証
//!
//! `U-Task-Id` / `U-Task-Token` を受け取り、secret store の単回トークンと照合する。
//! 照合は成否にかかわらずトークンを消費する。

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{ErrorKind, StoreError, TaskId};
use crate::ports::SecretStore;
use crate::typed::{TASK_ID_HEADER, TASK_TOKEN_HEADER};

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("malformed task id: {0:?}")]
    MalformedTaskId(String),

    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("token rejected for task {0}")]
    Rejected(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CallbackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallbackError::MalformedTaskId(_) | CallbackError::MissingHeader(_) => {
                ErrorKind::Validation
            }
            CallbackError::Rejected(_) => ErrorKind::Validation,
            CallbackError::Store(e) => e.kind(),
        }
    }
}

#[derive(Clone)]
pub struct CallbackVerifier {
    secrets: Arc<dyn SecretStore>,
}

impl CallbackVerifier {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    /// Accept the callback at most once per issued token.
    pub async fn verify(&self, task_id: &str, token: &str) -> Result<TaskId, CallbackError> {
        let id: TaskId = task_id
            .trim()
            .parse()
            .map_err(|_| CallbackError::MalformedTaskId(task_id.to_string()))?;
        if self.secrets.check(id, token).await? {
            tracing::info!(task_id = %id, "callback accepted");
            Ok(id)
        } else {
            tracing::warn!(task_id = %id, "callback rejected");
            Err(CallbackError::Rejected(id))
        }
    }

    /// Same as `verify`, reading the two headers by case-insensitive name.
    pub async fn verify_headers<'a, I>(&self, headers: I) -> Result<TaskId, CallbackError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut task_id = None;
        let mut token = None;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(TASK_ID_HEADER) {
                task_id = Some(value);
            } else if name.eq_ignore_ascii_case(TASK_TOKEN_HEADER) {
                token = Some(value);
            }
        }
        let task_id = task_id.ok_or(CallbackError::MissingHeader(TASK_ID_HEADER))?;
        let token = token.ok_or(CallbackError::MissingHeader(TASK_TOKEN_HEADER))?;
        self.verify(task_id, token).await
    }
}
