//! LeaseStore port - 処理中タスクの正本（in-flight table）
//!
//! # 設計原則
//! - Lease の権威はここにある。排他は `claim` の条件付き更新だけで行う（外部ロックなし）
//! - `next_time` は backoff（この時刻まで再試行しない）と lease 期限（この時刻まで保持）を兼ねる
//! - `attempts >= max_attempts` のレコードは二度と claim されない（poison）

use async_trait::async_trait;

use crate::domain::{LeaseRecord, OwnerId, StoreError, TaskId};
use crate::typed::{BoxTask, DynTask};

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Claim up to `size` due records for `owner`.
    ///
    /// In one atomic step: pick rows with `attempts < max_attempts` and
    /// `next_time < now` in `created_at`/insertion order, set
    /// `owner_id = owner`, `attempts += 1`, `next_time = now + lease_window`,
    /// and return exactly those rows. A claimer that loses a race gets fewer
    /// rows, not an error.
    async fn claim(&self, owner: &OwnerId, size: usize) -> Result<Vec<BoxTask>, StoreError>;

    /// Start tracking a task. Fails with `StoreError::Duplicate` if its id is
    /// already tracked.
    ///
    /// A processing task counts as handed out: `attempts = 1` and the lease
    /// runs for twice its timeout. Otherwise `attempts = 0` and
    /// `next_time = task.meta().next_time`.
    async fn insert(&self, owner: &OwnerId, task: &dyn DynTask) -> Result<(), StoreError>;

    /// Persist the snapshot and `next_time` of a task still leased by
    /// `owner`. `false` when the record is gone or owned by someone else.
    async fn update(&self, owner: &OwnerId, task: &dyn DynTask) -> Result<bool, StoreError>;

    /// Stop tracking a task leased by `owner`.
    async fn delete(&self, owner: &OwnerId, task_id: TaskId) -> Result<bool, StoreError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<LeaseRecord>, StoreError>;

    /// Records that exhausted their retry budget, oldest first.
    async fn poisoned(&self, limit: usize) -> Result<Vec<LeaseRecord>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}
