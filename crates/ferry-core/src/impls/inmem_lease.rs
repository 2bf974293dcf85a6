//! MemoryLeaseStore - 単一プロセス用の lease store
//!
//! claim はひとつの critical section の中で「対象選択 → 更新 → 読み戻し」を行う。
//! SQL 実装の条件付き UPDATE と同じ意味になるようにしている。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{LeaseRecord, OwnerId, StoreError, TaskId};
use crate::ports::{Clock, LeaseStore};
use crate::typed::{BoxTask, DynTask, TaskCodec};

struct Row {
    /// Insertion order, breaks `created_at` ties.
    seq: u64,
    record: LeaseRecord,
}

#[derive(Default)]
struct LeaseTable {
    rows: HashMap<TaskId, Row>,
    next_seq: u64,
}

pub struct MemoryLeaseStore {
    codec: TaskCodec,
    clock: Arc<dyn Clock>,
    lease_window: Duration,
    table: Mutex<LeaseTable>,
}

impl MemoryLeaseStore {
    pub fn new(codec: TaskCodec, clock: Arc<dyn Clock>, lease_window: Duration) -> Self {
        Self {
            codec,
            clock,
            lease_window,
            table: Mutex::new(LeaseTable::default()),
        }
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn claim(&self, owner: &OwnerId, size: usize) -> Result<Vec<BoxTask>, StoreError> {
        let now = self.clock.now_secs();
        let lease_until = now + self.lease_window.as_secs() as i64;

        let mut table = self.table.lock().await;
        let mut due: Vec<(i64, u64, TaskId)> = table
            .rows
            .values()
            .filter(|row| row.record.is_claimable(now))
            .map(|row| (row.record.created_at, row.seq, row.record.task_id))
            .collect();
        due.sort();
        due.truncate(size);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, _, task_id) in due {
            let Some(row) = table.rows.get_mut(&task_id) else {
                continue;
            };
            row.record.owner_id = owner.clone();
            row.record.attempts += 1;
            row.record.next_time = lease_until;
            row.record.updated_at = now;

            match self.codec.decode(&row.record.payload) {
                Ok(task) => claimed.push(task),
                Err(e) => {
                    tracing::error!(%task_id, error = %e, "lease claim: undecodable snapshot");
                }
            }
        }
        Ok(claimed)
    }

    async fn insert(&self, owner: &OwnerId, task: &dyn DynTask) -> Result<(), StoreError> {
        let now = self.clock.now_secs();
        let meta = task.meta();
        let payload = self.codec.encode(task)?;
        let (attempts, next_time) = if meta.is_processing() {
            (1, now + 2 * task.timeout().as_secs() as i64)
        } else {
            (0, meta.next_time)
        };

        let mut table = self.table.lock().await;
        if table.rows.contains_key(&meta.id) {
            return Err(StoreError::Duplicate(meta.id));
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.rows.insert(
            meta.id,
            Row {
                seq,
                record: LeaseRecord {
                    task_id: meta.id,
                    app_id: meta.app_id.clone(),
                    payload,
                    content: task.content(),
                    result: String::new(),
                    error: String::new(),
                    exec_ms: 0,
                    attempts,
                    max_attempts: task.max_retry_times(),
                    next_time,
                    owner_id: owner.clone(),
                    created_at: now,
                    updated_at: now,
                },
            },
        );
        Ok(())
    }

    async fn update(&self, owner: &OwnerId, task: &dyn DynTask) -> Result<bool, StoreError> {
        let now = self.clock.now_secs();
        let meta = task.meta();
        let payload = self.codec.encode(task)?;

        let mut table = self.table.lock().await;
        let Some(row) = table.rows.get_mut(&meta.id) else {
            return Ok(false);
        };
        if &row.record.owner_id != owner {
            return Ok(false);
        }
        row.record.payload = payload;
        row.record.result = meta.last.result.clone().unwrap_or_default();
        row.record.error = meta.last.error.clone().unwrap_or_default();
        row.record.exec_ms = meta.last.exec_ms;
        row.record.next_time = meta.next_time;
        row.record.updated_at = now;
        Ok(true)
    }

    async fn delete(&self, owner: &OwnerId, task_id: TaskId) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;
        let owned = matches!(table.rows.get(&task_id), Some(row) if &row.record.owner_id == owner);
        if owned {
            table.rows.remove(&task_id);
        }
        Ok(owned)
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<LeaseRecord>, StoreError> {
        let table = self.table.lock().await;
        Ok(table.rows.get(&task_id).map(|row| row.record.clone()))
    }

    async fn poisoned(&self, limit: usize) -> Result<Vec<LeaseRecord>, StoreError> {
        let table = self.table.lock().await;
        let mut rows: Vec<&Row> = table
            .rows
            .values()
            .filter(|row| row.record.is_poisoned())
            .collect();
        rows.sort_by_key(|row| (row.record.created_at, row.seq));
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| row.record.clone())
            .collect())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.table.lock().await.rows.len())
    }
}
