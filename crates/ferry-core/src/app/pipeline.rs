//! Pipeline - admission / recovery / dispose の 1 回分の処理
//!
//! 制御ループ（consumer.rs）はタイマーと状態だけを扱い、
//! ストアに触る処理はすべてここにある。ストアのエラーはここでログに残し、
//! 呼び出し側には伝播させない。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::Instant;

use super::config::ConsumerConfig;
use crate::domain::{OwnerId, StoreError, TaskError, TaskId, TaskMeta};
use crate::ports::{AttemptLog, Clock, LeaseStore, SecretStore, TaskQueue};
use crate::typed::{BoxTask, DynTask, RunContext};

pub(crate) struct Shared {
    pub(crate) owner: OwnerId,
    pub(crate) config: ConsumerConfig,
    pub(crate) queue: Arc<dyn TaskQueue>,
    pub(crate) leases: Arc<dyn LeaseStore>,
    pub(crate) secrets: Arc<dyn SecretStore>,
    pub(crate) attempts: Arc<dyn AttemptLog>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) waits: mpsc::Sender<BoxTask>,
    /// Dispose calls currently in flight.
    pub(crate) running: AtomicUsize,
}

/// Counts one in-flight dispose; released on drop, also on panic.
pub(crate) struct RunningGuard(Arc<Shared>);

impl RunningGuard {
    pub(crate) fn enter(shared: Arc<Shared>) -> Self {
        shared.running.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.0
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Shared {
    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Move at most one task from the primary queue into the lease store.
    ///
    /// Returns the delay before the next pass: zero when a task was found.
    pub(crate) async fn admission_pass(&self) -> Duration {
        let interval = self.config.interval();
        let mut task = match self.queue.pop().await {
            Ok(Some(task)) => task,
            Ok(None) => return interval,
            Err(e) => {
                tracing::warn!(owner = %self.owner, error = %e, "admission: pop failed");
                return interval;
            }
        };

        let task_id = task.meta().id;
        let now = self.clock.now_secs();
        let expect_time = task.meta().expect_time();
        if expect_time <= now + interval.as_secs() as i64 {
            task.meta_mut().set_processing();
        } else {
            task.meta_mut().next_time = expect_time;
        }

        match self.leases.insert(&self.owner, task.as_ref()).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                tracing::info!(owner = %self.owner, %task_id, "admission: already tracked, dropping duplicate");
                self.confirm(task_id).await;
                return Duration::ZERO;
            }
            Err(e) => {
                tracing::warn!(owner = %self.owner, %task_id, error = %e, "admission: insert failed, pushing back");
                match self.queue.push(task.as_ref()).await {
                    // 末尾に複製を置けたので元の pop は確定させる
                    Ok(true) => self.confirm(task_id).await,
                    Ok(false) => {
                        tracing::error!(owner = %self.owner, %task_id, "admission: push back rejected");
                    }
                    Err(e) => {
                        tracing::error!(owner = %self.owner, %task_id, error = %e, "admission: push back failed");
                    }
                }
                return Duration::ZERO;
            }
        }
        self.confirm(task_id).await;

        if task.meta().is_processing() {
            tracing::debug!(owner = %self.owner, %task_id, "admission: dispatching immediately");
            self.offer(vec![task]).await;
        } else {
            tracing::debug!(owner = %self.owner, %task_id, next_time = task.meta().next_time, "admission: deferred");
        }
        Duration::ZERO
    }

    /// Claim due lease records and offer them for dispatch.
    pub(crate) async fn recovery_pass(&self) {
        match self.leases.claim(&self.owner, self.config.fetch_size).await {
            Ok(tasks) if tasks.is_empty() => {}
            Ok(tasks) => {
                tracing::debug!(owner = %self.owner, count = tasks.len(), "recovery: claimed");
                self.offer(tasks).await;
            }
            Err(e) => {
                tracing::warn!(owner = %self.owner, error = %e, "recovery: claim failed");
            }
        }
    }

    /// Put tasks on the wait queue, waiting up to each task's own timeout.
    ///
    /// A dropped offer leaves the task leased; a later recovery pass picks it up.
    pub(crate) async fn offer(&self, tasks: Vec<BoxTask>) {
        for task in tasks {
            let task_id = task.meta().id;
            let timeout = task.timeout();
            match self.waits.send_timeout(task, timeout).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(owner = %self.owner, %task_id, "dispatch: wait queue full, offer dropped");
                }
                Err(SendTimeoutError::Closed(_)) => {
                    tracing::debug!(owner = %self.owner, %task_id, "dispatch: wait queue closed");
                    return;
                }
            }
        }
    }

    /// Run one attempt and settle the lease record.
    pub(crate) async fn dispose(&self, mut task: BoxTask) {
        let task_id = task.meta().id;
        let timeout = task.timeout();

        let token = match self.secrets.issue(task_id, timeout).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(owner = %self.owner, %task_id, error = %e, "dispose: token issue failed");
                String::new()
            }
        };

        let started = Instant::now();
        let ctx = RunContext::new(task_id, token, started + timeout);
        let outcome = match tokio::time::timeout(timeout, task.run_dyn(&ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let exec_ms = started.elapsed().as_millis() as u64;
                task.meta_mut().record_failure(None, "deadline exceeded", exec_ms);
                Err(TaskError::DeadlineExceeded(timeout))
            }
        };
        let exec_ms = started.elapsed().as_millis() as u64;
        reconcile_last_attempt(task.meta_mut(), &outcome, exec_ms);

        if let Err(e) = self.attempts.append(&self.owner, task.as_ref()).await {
            tracing::warn!(owner = %self.owner, %task_id, error = %e, "dispose: attempt log append failed");
        }

        match outcome {
            Ok(_) => self.settle_success(task_id).await,
            Err(e) => {
                tracing::info!(owner = %self.owner, %task_id, times = task.meta().times + 1, error = %e, "dispose: attempt failed");
                self.settle_failure(task).await;
            }
        }
    }

    /// Re-persist a task drained from the wait queue during shutdown.
    pub(crate) async fn reset(&self, mut task: BoxTask) -> bool {
        let now = self.clock.now_secs();
        task.meta_mut().increase_times(now);
        self.persist(task.as_ref()).await
    }

    async fn settle_success(&self, task_id: TaskId) {
        match self.leases.delete(&self.owner, task_id).await {
            Ok(true) => tracing::info!(owner = %self.owner, %task_id, "dispose: done"),
            Ok(false) => {
                tracing::warn!(owner = %self.owner, %task_id, "dispose: lease moved to another owner, record kept");
            }
            Err(e) => {
                tracing::warn!(owner = %self.owner, %task_id, error = %e, "dispose: delete failed");
            }
        }
    }

    /// Back off a failed task. Returns whether its record is now poisoned.
    ///
    /// The record's `attempts` gates claims, and dropped offers or
    /// undecodable rows consume it without raising `times`, so the check
    /// reads the stored record back.
    pub(crate) async fn settle_failure(&self, mut task: BoxTask) -> bool {
        let now = self.clock.now_secs();
        task.meta_mut().increase_times(now);
        if !self.persist(task.as_ref()).await {
            return false;
        }

        let task_id = task.meta().id;
        match self.leases.get(task_id).await {
            Ok(Some(record)) if record.is_poisoned() => {
                tracing::warn!(
                    owner = %self.owner,
                    %task_id,
                    attempts = record.attempts,
                    max_attempts = record.max_attempts,
                    times = task.meta().times,
                    "dispose: retry budget exhausted, task is poisoned"
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(owner = %self.owner, %task_id, error = %e, "dispose: lease read-back failed");
                false
            }
        }
    }

    async fn persist(&self, task: &dyn DynTask) -> bool {
        let task_id = task.meta().id;
        match self.leases.update(&self.owner, task).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(owner = %self.owner, %task_id, "lease moved to another owner or record is gone");
                false
            }
            Err(e) => {
                tracing::warn!(owner = %self.owner, %task_id, error = %e, "lease update failed");
                false
            }
        }
    }

    async fn confirm(&self, task_id: TaskId) {
        let Some(confirm) = self.queue.as_confirm() else {
            return;
        };
        if let Err(e) = confirm.confirm(task_id).await {
            tracing::warn!(owner = %self.owner, %task_id, error = %e, "admission: confirm failed");
        }
    }
}

/// Make the recorded attempt agree with what `run` returned.
///
/// A task may return without recording anything; the returned result wins
/// over a stale or missing record.
fn reconcile_last_attempt(meta: &mut TaskMeta, outcome: &Result<String, TaskError>, exec_ms: u64) {
    match outcome {
        Ok(result) => {
            if meta.last.error.is_some() || meta.last.result.is_none() {
                let result = meta.last.result.take().unwrap_or_else(|| result.clone());
                meta.record_success(result, exec_ms);
            }
        }
        Err(e) => {
            if meta.last.error.is_none() {
                let result = meta.last.result.take();
                meta.record_failure(result, e.to_string(), exec_ms);
            }
        }
    }
}
