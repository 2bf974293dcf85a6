//! AttemptLog port - 実行履歴の追記専用ログ

use async_trait::async_trait;

use crate::domain::{AttemptEntry, OwnerId, StoreError};
use crate::typed::DynTask;

/// Append-only record of every execution attempt.
///
/// The engine never lets an append failure abort disposal; it only logs it.
#[async_trait]
pub trait AttemptLog: Send + Sync {
    async fn append(&self, owner: &OwnerId, task: &dyn DynTask) -> Result<(), StoreError>;
}

/// Build the log entry for the attempt a task just finished.
pub fn entry_for(owner: &OwnerId, task: &dyn DynTask, logged_at: i64) -> AttemptEntry {
    let meta = task.meta();
    AttemptEntry {
        task_id: meta.id,
        app_id: meta.app_id.clone(),
        task_type: task.task_type().to_string(),
        owner_id: owner.clone(),
        content: task.content(),
        result: meta.last.result.clone().unwrap_or_default(),
        error: meta.last.error.clone().unwrap_or_default(),
        exec_ms: meta.last.exec_ms,
        times: meta.times,
        next_time: meta.next_time,
        success: meta.last.is_success(),
        logged_at,
    }
}
