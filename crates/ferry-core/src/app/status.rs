//! Status - consumer の状態スナップショット

use serde::Serialize;

use crate::domain::{EngineState, OwnerId};

/// Point-in-time view of one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStatus {
    pub owner: OwnerId,
    pub state: EngineState,
    /// Tasks offered but not yet picked up by a worker.
    pub waiting: usize,
    /// Tasks currently inside `run`.
    pub running: usize,
    pub max_waits: usize,
    pub max_process: usize,
}

impl ConsumerStatus {
    /// 何も抱えていない（drain 完了の判定に使う）
    pub fn is_idle(&self) -> bool {
        self.waiting == 0 && self.running == 0
    }
}

/// Outcome of a successful `Consumer::stop`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Tasks taken off the wait queue during shutdown.
    pub drained: usize,
    /// Drained tasks whose lease record was re-persisted.
    pub reset: usize,
}
