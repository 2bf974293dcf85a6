//! TaskQueue port - 投入済み・未処理タスクの FIFO（primary queue）
//!
//! # 設計原則
//! - pop は先頭から、push は末尾へ
//! - 二段階確認（confirm）は任意の capability。`as_confirm()` で問い合わせる
//! - confirm 対応の実装では pop しただけのタスクは消えず、confirm で初めて削除される

use async_trait::async_trait;

use crate::domain::{StoreError, TaskId};
use crate::typed::{BoxTask, DynTask};

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Take the task at the head, `None` when empty.
    async fn pop(&self) -> Result<Option<BoxTask>, StoreError>;

    /// Append a task at the tail.
    async fn push(&self, task: &dyn DynTask) -> Result<bool, StoreError>;

    /// Number of tasks waiting (popped-but-unconfirmed ones excluded).
    async fn len(&self) -> Result<usize, StoreError>;

    /// Two-phase capability, if this queue has one.
    fn as_confirm(&self) -> Option<&dyn ConfirmQueue> {
        None
    }
}

/// Second acknowledgement after a pop.
#[async_trait]
pub trait ConfirmQueue: Send + Sync {
    /// Forget a popped task for good. Call only once it is tracked elsewhere.
    async fn confirm(&self, task_id: TaskId) -> Result<(), StoreError>;
}
