//! Consumer - 実行エンジン
//!
//! # 構成
//! - 制御ループ 1 本: admission タイマー、recovery タイマー、状態変化、
//!   wait queue を `tokio::select!` で多重化する
//! - admission / recovery の 1 回分は spawn したタスクで走らせる（ストアの遅延で
//!   ループが止まらないように）。同時に走るのはそれぞれ 1 本まで
//! - 実行は `Semaphore`（max_process）の permit を持った spawn タスク
//! - suspend の判定は別タスクが interval ごとに行い、watch channel で状態を流す
//!
//! # 停止
//! `stop()` は 1 回だけ。admission / recovery を新たに起こすのをやめ、wait queue に
//! 残ったタスクを lease store に書き戻しながら、実行中のタスクが終わるのを待つ。
//! 実行中のタスクを取り消すことはない。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use super::config::ConsumerConfig;
use super::pipeline::{RunningGuard, Shared};
use super::status::{ConsumerStatus, DrainReport};
use crate::domain::{EngineState, ErrorKind, OwnerId};
use crate::ports::{AttemptLog, Clock, LeaseStore, SecretStore, SuspendCheck, TaskQueue};
use crate::typed::BoxTask;

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error(
        "shutdown deadline exceeded: {waiting} waiting, {running} running, {resetting} resetting"
    )]
    DeadlineExceeded {
        waiting: usize,
        running: usize,
        resetting: usize,
    },

    #[error("consumer already stopped")]
    AlreadyStopped,

    #[error("consumer control loop panicked: {0}")]
    Panicked(String),
}

impl ShutdownError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShutdownError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            ShutdownError::AlreadyStopped => ErrorKind::Lifecycle,
            ShutdownError::Panicked(_) => ErrorKind::Internal,
        }
    }
}

enum Phase {
    Idle(mpsc::Receiver<BoxTask>),
    Started {
        control: JoinHandle<Leftovers>,
        monitor: JoinHandle<()>,
    },
    Stopped,
}

/// What the control loop hands back when it exits.
struct Leftovers {
    wait_rx: mpsc::Receiver<BoxTask>,
    admission: Option<JoinHandle<Duration>>,
    recovery: Option<JoinHandle<()>>,
}

impl Leftovers {
    fn sources_done(&self) -> bool {
        self.admission.as_ref().is_none_or(|h| h.is_finished())
            && self.recovery.as_ref().is_none_or(|h| h.is_finished())
    }
}

pub struct Consumer {
    shared: Arc<Shared>,
    suspend: Arc<dyn SuspendCheck>,
    pool: Arc<Semaphore>,
    state_tx: Arc<watch::Sender<EngineState>>,
    phase: Mutex<Phase>,
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        owner: OwnerId,
        config: ConsumerConfig,
        queue: Arc<dyn TaskQueue>,
        leases: Arc<dyn LeaseStore>,
        secrets: Arc<dyn SecretStore>,
        attempts: Arc<dyn AttemptLog>,
        clock: Arc<dyn Clock>,
        suspend: Arc<dyn SuspendCheck>,
    ) -> Self {
        let (waits, wait_rx) = mpsc::channel(config.max_waits);
        let pool = Arc::new(Semaphore::new(config.max_process));
        let (state_tx, _) = watch::channel(EngineState::Running);
        Self {
            shared: Arc::new(Shared {
                owner,
                config,
                queue,
                leases,
                secrets,
                attempts,
                clock,
                waits,
                running: Default::default(),
            }),
            suspend,
            pool,
            state_tx: Arc::new(state_tx),
            phase: Mutex::new(Phase::Idle(wait_rx)),
        }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.shared.owner
    }

    pub fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    pub fn status(&self) -> ConsumerStatus {
        let config = &self.shared.config;
        ConsumerStatus {
            owner: self.shared.owner.clone(),
            state: self.state(),
            waiting: config.max_waits - self.shared.waits.capacity(),
            running: self.shared.running(),
            max_waits: config.max_waits,
            max_process: config.max_process,
        }
    }

    /// Spawn the control loop and the suspend monitor.
    ///
    /// Starting a running consumer is a no-op; a stopped one cannot restart.
    pub fn start(&self) -> Result<(), ShutdownError> {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        match std::mem::replace(&mut *phase, Phase::Stopped) {
            Phase::Idle(wait_rx) => {
                let shared = self.shared.clone();
                let pool = self.pool.clone();
                let suspend = self.suspend.clone();
                let state_tx = self.state_tx.clone();
                let state_rx = self.state_tx.subscribe();
                // 最初の admission より先に suspend を一度評価しておく
                let control = tokio::spawn(async move {
                    refresh_suspend(suspend.as_ref(), &state_tx).await;
                    control_loop(shared, pool, state_rx, wait_rx).await
                });
                let monitor = tokio::spawn(suspend_monitor(
                    self.suspend.clone(),
                    self.state_tx.clone(),
                    self.shared.config.interval(),
                ));
                *phase = Phase::Started { control, monitor };
                tracing::info!(owner = %self.shared.owner, "consumer started");
                Ok(())
            }
            started @ Phase::Started { .. } => {
                *phase = started;
                Ok(())
            }
            Phase::Stopped => Err(ShutdownError::AlreadyStopped),
        }
    }

    /// Stop once and drain within `deadline`.
    ///
    /// Every task still on the wait queue is written back to the lease store
    /// with one more failed attempt. On `DeadlineExceeded` the undrained tasks
    /// stay leased and are recovered after their lease expires.
    pub async fn stop(&self, deadline: Duration) -> Result<DrainReport, ShutdownError> {
        let deadline_at = Instant::now() + deadline;
        let phase = {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *phase, Phase::Stopped)
        };

        let mut leftovers = match phase {
            Phase::Stopped => return Err(ShutdownError::AlreadyStopped),
            Phase::Idle(wait_rx) => {
                self.state_tx.send_replace(EngineState::Stopped);
                Leftovers {
                    wait_rx,
                    admission: None,
                    recovery: None,
                }
            }
            Phase::Started { control, monitor } => {
                self.state_tx.send_replace(EngineState::Stopped);
                monitor.abort();
                control
                    .await
                    .map_err(|e| ShutdownError::Panicked(e.to_string()))?
            }
        };
        tracing::info!(owner = %self.shared.owner, "consumer stopping, draining");

        let tick = (self.shared.config.interval() / 10).max(Duration::from_millis(1));
        let mut resets: JoinSet<bool> = JoinSet::new();
        let mut report = DrainReport::default();

        loop {
            while let Ok(task) = leftovers.wait_rx.try_recv() {
                report.drained += 1;
                let shared = self.shared.clone();
                resets.spawn(async move { shared.reset(task).await });
            }
            while let Some(joined) = resets.try_join_next() {
                match joined {
                    Ok(true) => report.reset += 1,
                    Ok(false) => {}
                    Err(e) => tracing::error!(owner = %self.shared.owner, error = %e, "drain: reset panicked"),
                }
            }

            let running = self.shared.running();
            if leftovers.sources_done()
                && leftovers.wait_rx.is_empty()
                && resets.is_empty()
                && running == 0
            {
                tracing::info!(
                    owner = %self.shared.owner,
                    drained = report.drained,
                    reset = report.reset,
                    "consumer stopped"
                );
                return Ok(report);
            }

            if Instant::now() >= deadline_at {
                let err = ShutdownError::DeadlineExceeded {
                    waiting: leftovers.wait_rx.len(),
                    running,
                    resetting: resets.len(),
                };
                resets.detach_all();
                tracing::warn!(owner = %self.shared.owner, error = %err, "consumer stop gave up");
                return Err(err);
            }
            tokio::time::sleep(tick).await;
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        // 制御ループと monitor を終わらせる。wait queue の中身は lease に残る
        self.state_tx.send_replace(EngineState::Stopped);
    }
}

async fn join_slot<T>(slot: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match slot.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn control_loop(
    shared: Arc<Shared>,
    pool: Arc<Semaphore>,
    mut state_rx: watch::Receiver<EngineState>,
    mut wait_rx: mpsc::Receiver<BoxTask>,
) -> Leftovers {
    let interval = shared.config.interval();
    let mut admission: Option<JoinHandle<Duration>> = None;
    let mut recovery: Option<JoinHandle<()>> = None;
    let mut next_admission = Instant::now();
    let mut next_recovery = Instant::now();
    let mut permit: Option<OwnedSemaphorePermit> = None;

    loop {
        let state = *state_rx.borrow_and_update();
        if state.is_terminal() {
            break;
        }
        let active = state.is_active();

        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(next_admission), if active && admission.is_none() => {
                let shared = shared.clone();
                admission = Some(tokio::spawn(async move { shared.admission_pass().await }));
            }
            joined = join_slot(&mut admission) => {
                admission = None;
                let delay = joined.unwrap_or_else(|e| {
                    tracing::error!(owner = %shared.owner, error = %e, "admission pass panicked");
                    interval
                });
                next_admission = Instant::now() + delay;
            }
            _ = tokio::time::sleep_until(next_recovery), if active && recovery.is_none() => {
                let shared = shared.clone();
                recovery = Some(tokio::spawn(async move { shared.recovery_pass().await }));
            }
            joined = join_slot(&mut recovery) => {
                recovery = None;
                if let Err(e) = joined {
                    tracing::error!(owner = %shared.owner, error = %e, "recovery pass panicked");
                }
                next_recovery = Instant::now() + interval;
            }
            acquired = pool.clone().acquire_owned(), if permit.is_none() => {
                match acquired {
                    Ok(acquired) => permit = Some(acquired),
                    Err(_) => break,
                }
            }
            received = wait_rx.recv(), if permit.is_some() => {
                let (Some(task), Some(held)) = (received, permit.take()) else {
                    break;
                };
                let guard = RunningGuard::enter(shared.clone());
                tokio::spawn(async move {
                    let _permit = held;
                    guard.shared().dispose(task).await;
                });
            }
        }
    }

    Leftovers {
        wait_rx,
        admission,
        recovery,
    }
}

async fn suspend_monitor(
    check: Arc<dyn SuspendCheck>,
    state_tx: Arc<watch::Sender<EngineState>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if state_tx.borrow().is_terminal() {
            break;
        }
        refresh_suspend(check.as_ref(), &state_tx).await;
    }
}

/// Flip Running <-> Suspended; never leaves Stopped.
async fn refresh_suspend(check: &dyn SuspendCheck, state_tx: &watch::Sender<EngineState>) {
    let suspended = match check.is_suspended().await {
        Ok(suspended) => suspended,
        Err(e) => {
            tracing::warn!(error = %e, "suspend check failed, keeping current state");
            return;
        }
    };
    state_tx.send_if_modified(|state| match (*state, suspended) {
        (EngineState::Running, true) => {
            tracing::info!("consumer suspended");
            *state = EngineState::Suspended;
            true
        }
        (EngineState::Suspended, false) => {
            tracing::info!("consumer resumed");
            *state = EngineState::Running;
            true
        }
        _ => false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ConsumerBuilder;
    use crate::domain::TaskId;
    use crate::impls::{MemoryAttemptLog, MemoryLeaseStore, MemoryQueue, MemorySecretStore};
    use crate::ports::{NeverSuspend, SuspendSwitch, SystemClock};
    use crate::typed::testing::ScriptedTask;
    use crate::typed::{TaskCodec, TaskRegistry, TypedTask};
    use ulid::Ulid;

    struct Harness {
        queue: Arc<MemoryQueue>,
        leases: Arc<MemoryLeaseStore>,
        log: Arc<MemoryAttemptLog>,
        consumer: Consumer,
    }

    fn harness(config: ConsumerConfig, suspend: Arc<dyn SuspendCheck>) -> Harness {
        let mut registry = TaskRegistry::new();
        registry.register::<ScriptedTask>().unwrap();
        let codec = TaskCodec::new(Arc::new(registry));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = Arc::new(MemoryQueue::new(codec.clone()));
        let leases = Arc::new(MemoryLeaseStore::new(codec, clock.clone(), config.lease_window()));
        let log = Arc::new(MemoryAttemptLog::new(clock.clone()));
        let consumer = ConsumerBuilder::new("c1")
            .config(config)
            .queue(queue.clone())
            .leases(leases.clone())
            .secrets(Arc::new(MemorySecretStore::new(clock.clone())))
            .attempt_log(log.clone())
            .clock(clock)
            .suspend_check(suspend)
            .build()
            .unwrap();
        Harness {
            queue,
            leases,
            log,
            consumer,
        }
    }

    fn fast_config() -> ConsumerConfig {
        ConsumerConfig {
            interval_ms: 10,
            max_waits: 8,
            max_process: 1,
            ..ConsumerConfig::default()
        }
    }

    async fn push(queue: &MemoryQueue, script: &[bool], sleep_ms: u64) -> TaskId {
        let mut task = ScriptedTask::new(script.iter().copied());
        task.sleep_ms = sleep_ms;
        let mut task = TypedTask::boxed(task);
        let now = chrono::Utc::now().timestamp();
        task.meta_mut().init("p1", TaskId::from_ulid(Ulid::new()), now);
        queue.push(task.as_ref()).await.unwrap();
        task.meta().id
    }

    async fn eventually(mut check: impl AsyncFnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn stop_is_terminal_and_fires_once() {
        let h = harness(fast_config(), Arc::new(NeverSuspend));
        h.consumer.start().unwrap();
        h.consumer.start().unwrap();

        let report = h.consumer.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(h.consumer.state(), EngineState::Stopped);
        assert!(matches!(
            h.consumer.stop(Duration::from_secs(1)).await,
            Err(ShutdownError::AlreadyStopped)
        ));
        let err = h.consumer.start().unwrap_err();
        assert!(matches!(err, ShutdownError::AlreadyStopped));
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
        assert_eq!(ShutdownError::Panicked("boom".into()).kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn executes_and_removes_successful_task() {
        let h = harness(fast_config(), Arc::new(NeverSuspend));
        let id = push(&h.queue, &[true], 0).await;
        h.consumer.start().unwrap();

        assert!(eventually(async || h.leases.get(id).await.unwrap().is_none()
            && !h.log.entries_for(id).await.is_empty())
        .await);
        let entries = h.log.entries_for(id).await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        h.consumer.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn suspended_consumer_leaves_queue_alone() {
        let switch = Arc::new(SuspendSwitch::new());
        switch.set(true);
        let h = harness(fast_config(), switch.clone());
        push(&h.queue, &[true], 0).await;
        h.consumer.start().unwrap();

        assert!(eventually(async || h.consumer.state() == EngineState::Suspended).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.queue.len().await.unwrap(), 1);

        switch.set(false);
        assert!(eventually(async || h.queue.len().await.unwrap() == 0).await);
        assert_eq!(h.consumer.state(), EngineState::Running);
        h.consumer.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn drain_keeps_waiting_and_running_tasks_leased() {
        let h = harness(fast_config(), Arc::new(NeverSuspend));
        let slow = push(&h.queue, &[false], 300).await;
        let mut waiting = Vec::new();
        for _ in 0..3 {
            waiting.push(push(&h.queue, &[true], 0).await);
        }
        h.consumer.start().unwrap();

        assert!(eventually(async || h.consumer.status().waiting == 3).await);
        assert_eq!(h.consumer.status().running, 1);

        let report = h.consumer.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report, DrainReport { drained: 3, reset: 3 });
        assert_eq!(h.leases.len().await.unwrap(), 4);

        // 待機中だったものは実行されずに書き戻される
        for id in waiting {
            assert!(h.log.entries_for(id).await.is_empty());
        }
        let slow_entries = h.log.entries_for(slow).await;
        assert_eq!(slow_entries.len(), 1);
        assert!(!slow_entries[0].success);
    }

    #[tokio::test]
    async fn drain_reports_deadline_exceeded() {
        let h = harness(fast_config(), Arc::new(NeverSuspend));
        push(&h.queue, &[true], 2_000).await;
        h.consumer.start().unwrap();
        assert!(eventually(async || h.consumer.status().running == 1).await);

        let err = h.consumer.stop(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(
            err,
            ShutdownError::DeadlineExceeded { running: 1, waiting: 0, .. }
        ));
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert_eq!(h.leases.len().await.unwrap(), 1);
    }
}
