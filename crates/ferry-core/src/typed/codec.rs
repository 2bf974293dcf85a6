//! TaskCodec - スナップショットと Task の相互変換
//!
//! # フォーマット
//! `{"type": "<Task::TYPE>", "task": { ...payload... }}` の JSON。
//! type から registry 経由でバリアントを復元する。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::erased::{BoxTask, DynTask};
use super::registry::TaskRegistry;
use crate::domain::TaskError;

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    task_type: String,
    task: serde_json::Value,
}

/// Encodes tasks into persisted snapshots and back.
#[derive(Clone)]
pub struct TaskCodec {
    registry: Arc<TaskRegistry>,
}

impl TaskCodec {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn encode(&self, task: &dyn DynTask) -> Result<Vec<u8>, TaskError> {
        let envelope = Envelope {
            task_type: task.task_type().to_string(),
            task: task.to_json()?,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<BoxTask, TaskError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        self.registry.construct(&envelope.task_type, envelope.task)
    }
}
