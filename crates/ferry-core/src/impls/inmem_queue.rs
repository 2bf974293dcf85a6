//! MemoryQueue - 開発・テスト用の primary queue
//!
//! # 実装詳細
//! - VecDeque にエンコード済みスナップショットを保持（永続化と同じ経路を通す）
//! - `two_phase()` で作ると pop したタスクは confirm まで unconfirmed に残る

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{StoreError, TaskId};
use crate::ports::{ConfirmQueue, TaskQueue};
use crate::typed::{BoxTask, DynTask, TaskCodec};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    unconfirmed: HashMap<TaskId, Vec<u8>>,
}

pub struct MemoryQueue {
    codec: TaskCodec,
    two_phase: bool,
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new(codec: TaskCodec) -> Self {
        Self {
            codec,
            two_phase: false,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// A queue whose pops must be confirmed.
    pub fn two_phase(codec: TaskCodec) -> Self {
        Self {
            two_phase: true,
            ..Self::new(codec)
        }
    }

    pub async fn unconfirmed(&self) -> usize {
        self.state.lock().await.unconfirmed.len()
    }

    /// Put every popped-but-unconfirmed task back at the head.
    pub async fn restore_unconfirmed(&self) -> usize {
        let mut state = self.state.lock().await;
        let restored: Vec<Vec<u8>> = state.unconfirmed.drain().map(|(_, bytes)| bytes).collect();
        let count = restored.len();
        for bytes in restored {
            state.ready.push_front(bytes);
        }
        count
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn pop(&self) -> Result<Option<BoxTask>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(bytes) = state.ready.pop_front() else {
            return Ok(None);
        };
        let task = match self.codec.decode(&bytes) {
            Ok(task) => task,
            Err(e) => {
                // 復元できないものは末尾に戻して失敗を返す
                state.ready.push_back(bytes);
                return Err(e.into());
            }
        };
        if self.two_phase {
            state.unconfirmed.insert(task.meta().id, bytes);
        }
        Ok(Some(task))
    }

    async fn push(&self, task: &dyn DynTask) -> Result<bool, StoreError> {
        let bytes = self.codec.encode(task)?;
        self.state.lock().await.ready.push_back(bytes);
        Ok(true)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.ready.len())
    }

    fn as_confirm(&self) -> Option<&dyn ConfirmQueue> {
        if self.two_phase { Some(self) } else { None }
    }
}

#[async_trait]
impl ConfirmQueue for MemoryQueue {
    async fn confirm(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.state.lock().await.unconfirmed.remove(&task_id);
        Ok(())
    }
}
