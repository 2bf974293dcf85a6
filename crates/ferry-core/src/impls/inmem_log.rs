//! MemoryAttemptLog - 実行履歴をメモリに積むだけの実装

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{AttemptEntry, OwnerId, StoreError, TaskId};
use crate::ports::{AttemptLog, Clock, entry_for};
use crate::typed::DynTask;

pub struct MemoryAttemptLog {
    clock: Arc<dyn Clock>,
    entries: Mutex<Vec<AttemptEntry>>,
}

impl MemoryAttemptLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub async fn entries(&self) -> Vec<AttemptEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn entries_for(&self, task_id: TaskId) -> Vec<AttemptEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AttemptLog for MemoryAttemptLog {
    async fn append(&self, owner: &OwnerId, task: &dyn DynTask) -> Result<(), StoreError> {
        let entry = entry_for(owner, task, self.clock.now_secs());
        self.entries.lock().await.push(entry);
        Ok(())
    }
}
