#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use ferry_core::app::{Consumer, ConsumerBuilder, ConsumerConfig, Producer};
use ferry_core::domain::{TaskError, TaskMeta};
use ferry_core::impls::{MemoryAttemptLog, MemoryLeaseStore, MemoryQueue, MemorySecretStore};
use ferry_core::ports::{Clock, ManualClock, UlidGenerator};
use ferry_core::typed::{RunContext, Task, TaskCodec, TaskRegistry};

pub const T0: i64 = 1_700_000_000;

/// Fails `failures` times, then succeeds. The counter travels with the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlakyTask {
    #[serde(flatten)]
    pub meta: TaskMeta,
    pub failures: u32,
    pub max_retry: u32,
}

impl FlakyTask {
    pub fn new(failures: u32, max_retry: u32) -> Self {
        Self {
            meta: TaskMeta {
                app_id: "scenario".into(),
                ..TaskMeta::default()
            },
            failures,
            max_retry,
        }
    }

    pub fn expecting(mut self, expect_time: i64) -> Self {
        self.meta.expect_time = expect_time;
        self
    }
}

#[async_trait]
impl Task for FlakyTask {
    const TYPE: &'static str = "scenario.flaky";

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TaskMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), TaskError> {
        if self.meta.app_id.is_empty() {
            return Err(TaskError::Validation("app_id".into()));
        }
        Ok(())
    }

    fn content(&self) -> String {
        format!("flaky failures={}", self.failures)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn max_retry_times(&self) -> u32 {
        self.max_retry
    }

    async fn run(&mut self, ctx: &RunContext) -> Result<String, TaskError> {
        assert_eq!(ctx.token().len(), 32);
        if self.failures > 0 {
            self.failures -= 1;
            self.meta.record_failure(None, "flaky", 1);
            return Err(TaskError::execution("flaky"));
        }
        self.meta.record_success("ok", 1);
        Ok("ok".into())
    }
}

pub fn registry() -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry.register::<FlakyTask>().unwrap();
    Arc::new(registry)
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.timestamp_opt(T0, 0).unwrap()))
}

pub fn fast_config() -> ConsumerConfig {
    ConsumerConfig {
        interval_ms: 10,
        max_waits: 16,
        max_process: 4,
        fetch_size: 10,
        lease_window_secs: 300,
    }
}

/// One consumer and one producer over in-memory stores, driven by a manual clock.
pub struct MemoryEnv {
    pub clock: Arc<ManualClock>,
    pub codec: TaskCodec,
    pub queue: Arc<MemoryQueue>,
    pub leases: Arc<MemoryLeaseStore>,
    pub secrets: Arc<MemorySecretStore>,
    pub log: Arc<MemoryAttemptLog>,
    pub producer: Producer,
    pub consumer: Consumer,
}

impl MemoryEnv {
    pub fn new() -> Self {
        let clock = manual_clock();
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let registry = registry();
        let codec = TaskCodec::new(registry.clone());
        let config = fast_config();

        let queue = Arc::new(MemoryQueue::new(codec.clone()));
        let leases = Arc::new(MemoryLeaseStore::new(
            codec.clone(),
            dyn_clock.clone(),
            config.lease_window(),
        ));
        let secrets = Arc::new(MemorySecretStore::new(dyn_clock.clone()));
        let log = Arc::new(MemoryAttemptLog::new(dyn_clock.clone()));

        let producer = Producer::new(
            "scenario-producer",
            queue.clone(),
            registry,
            Arc::new(UlidGenerator::new(dyn_clock.clone())),
            dyn_clock.clone(),
        );
        let consumer = ConsumerBuilder::new("scenario-consumer")
            .config(config)
            .queue(queue.clone())
            .leases(leases.clone())
            .secrets(secrets.clone())
            .attempt_log(log.clone())
            .clock(dyn_clock)
            .build()
            .unwrap();

        Self {
            clock,
            codec,
            queue,
            leases,
            secrets,
            log,
            producer,
            consumer,
        }
    }

    pub fn advance(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

/// Poll `check` every 10ms for up to 2s.
pub async fn eventually(mut check: impl AsyncFnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
