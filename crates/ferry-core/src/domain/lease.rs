//! Lease records and attempt log entries.

use serde::{Deserialize, Serialize};

use super::ids::{OwnerId, TaskId};

/// One row of the lease store.
///
/// `next_time` is both the backoff marker ("not before") and the lease
/// expiry ("held until"). A record is claimable when
/// `attempts < max_attempts && next_time < now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub task_id: TaskId,
    pub app_id: String,
    /// Encoded task snapshot.
    pub payload: Vec<u8>,
    pub content: String,
    pub result: String,
    pub error: String,
    pub exec_ms: u64,
    /// Times the record was handed out for execution.
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_time: i64,
    pub owner_id: OwnerId,
    pub created_at: i64,
    pub updated_at: i64,
}

impl LeaseRecord {
    /// Exhausted its retry budget: no claim will ever return it again.
    pub fn is_poisoned(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn is_claimable(&self, now: i64) -> bool {
        self.attempts < self.max_attempts && self.next_time < now
    }
}

/// One entry of the append-only attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptEntry {
    pub task_id: TaskId,
    pub app_id: String,
    pub task_type: String,
    pub owner_id: OwnerId,
    pub content: String,
    pub result: String,
    pub error: String,
    pub exec_ms: u64,
    pub times: u32,
    pub next_time: i64,
    pub success: bool,
    pub logged_at: i64,
}
