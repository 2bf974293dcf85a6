//! Scheduling metadata shared by every task variant.

use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// `expect_time` values below this are a delay relative to `create_time`.
pub const RELATIVE_EXPECT_LIMIT_SECS: i64 = 3600 * 24 * 365;

/// Identity, provenance and retry bookkeeping of a task.
///
/// Every task variant embeds one of these (usually `#[serde(flatten)]`).
/// All timestamps are unix epoch seconds.
///
/// `expect_time` has three encodings:
/// - `0`: run immediately
/// - `< RELATIVE_EXPECT_LIMIT_SECS`: delay from `create_time`
/// - otherwise: absolute timestamp
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMeta {
    #[serde(default)]
    pub id: TaskId,
    #[serde(default)]
    pub producer_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub expect_time: i64,
    #[serde(default)]
    pub next_time: i64,
    /// Failed attempts so far. Never reset.
    #[serde(default)]
    pub times: u32,
    #[serde(default)]
    pub processing: bool,

    /// Outcome of the current attempt, only meaningful until it is logged.
    #[serde(skip)]
    pub last: LastAttempt,
}

/// Transient per-attempt fields. Not persisted, not part of equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastAttempt {
    pub result: Option<String>,
    pub error: Option<String>,
    pub exec_ms: u64,
}

impl LastAttempt {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl TaskMeta {
    /// Assign identity at submission. Called exactly once per task.
    pub fn init(&mut self, producer_id: impl Into<String>, id: TaskId, now: i64) {
        self.id = id;
        self.producer_id = producer_id.into();
        self.create_time = now;
        self.next_time = 0;
        self.times = 0;
        self.processing = false;
        self.last = LastAttempt::default();
    }

    /// Resolve `expect_time` into an absolute timestamp.
    pub fn expect_time(&self) -> i64 {
        if self.expect_time < RELATIVE_EXPECT_LIMIT_SECS {
            return self.create_time + self.expect_time;
        }
        self.expect_time
    }

    /// Record a failed attempt and push `next_time` out by `times²` seconds.
    pub fn increase_times(&mut self, now: i64) {
        self.times += 1;
        let times = i64::from(self.times);
        self.next_time = now + times * times;
    }

    pub fn set_processing(&mut self) {
        self.processing = true;
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn record_success(&mut self, result: impl Into<String>, exec_ms: u64) {
        self.last = LastAttempt {
            result: Some(result.into()),
            error: None,
            exec_ms,
        };
    }

    pub fn record_failure(&mut self, result: Option<String>, error: impl Into<String>, exec_ms: u64) {
        self.last = LastAttempt {
            result,
            error: Some(error.into()),
            exec_ms,
        };
    }
}

impl PartialEq for TaskMeta {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.producer_id == other.producer_id
            && self.app_id == other.app_id
            && self.create_time == other.create_time
            && self.expect_time == other.expect_time
            && self.next_time == other.next_time
            && self.times == other.times
            && self.processing == other.processing
    }
}

impl Eq for TaskMeta {}
