//! Producer - タスク投入の境界
//!
//! init → validate → push の順で primary queue に積む。

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{ErrorKind, StoreError, TaskError, TaskId};
use crate::ports::{Clock, IdGenerator, TaskQueue};
use crate::typed::{BoxTask, TaskRegistry};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("queue refused task {0}")]
    Rejected(TaskId),
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::Task(e) => e.kind(),
            SubmitError::Store(e) => e.kind(),
            SubmitError::Rejected(_) => ErrorKind::StoreUnavailable,
        }
    }
}

pub struct Producer {
    id: String,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<TaskRegistry>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Producer {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn TaskQueue>,
        registry: Arc<TaskRegistry>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            registry,
            ids,
            clock,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Assign identity, validate and enqueue.
    pub async fn submit(&self, mut task: BoxTask) -> Result<TaskId, SubmitError> {
        let task_id = self.ids.generate_task_id();
        task.meta_mut().init(&self.id, task_id, self.clock.now_secs());
        task.validate()?;

        if !self.queue.push(task.as_ref()).await? {
            return Err(SubmitError::Rejected(task_id));
        }
        tracing::info!(
            producer = %self.id,
            %task_id,
            task_type = task.task_type(),
            app_id = %task.meta().app_id,
            expect_time = task.meta().expect_time(),
            "task submitted"
        );
        Ok(task_id)
    }

    /// Build a task from its type name and JSON payload, then submit it.
    pub async fn submit_json(
        &self,
        task_type: &str,
        payload: serde_json::Value,
    ) -> Result<TaskId, SubmitError> {
        let task = self.registry.construct(task_type, payload)?;
        self.submit(task).await
    }
}
