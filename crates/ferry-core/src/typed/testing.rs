//! Task variants used by unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::task::{RunContext, Task};
use crate::domain::{TaskError, TaskMeta};

/// Succeeds with its message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EchoTask {
    #[serde(flatten)]
    pub meta: TaskMeta,
    pub message: String,
}

impl EchoTask {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            meta: TaskMeta {
                app_id: "test-app".into(),
                ..TaskMeta::default()
            },
            message: message.into(),
        }
    }
}

#[async_trait]
impl Task for EchoTask {
    const TYPE: &'static str = "test.echo";

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
        self.message.clone()
    }

    async fn run(&mut self, _ctx: &RunContext) -> Result<String, TaskError> {
        self.meta.record_success(self.message.clone(), 0);
        Ok(self.message.clone())
    }
}

/// Plays back a scripted list of outcomes; `true` means success.
///
/// The remaining script is part of the snapshot, so a task re-read from a
/// store continues where the previous attempt stopped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptedTask {
    #[serde(flatten)]
    pub meta: TaskMeta,
    pub script: VecDeque<bool>,
    #[serde(default)]
    pub sleep_ms: u64,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_retry() -> u32 {
    6
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl ScriptedTask {
    pub fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            meta: TaskMeta {
                app_id: "test-app".into(),
                ..TaskMeta::default()
            },
            script: script.into_iter().collect(),
            sleep_ms: 0,
            max_retry: default_max_retry(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[async_trait]
impl Task for ScriptedTask {
    const TYPE: &'static str = "test.scripted";

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TaskMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), TaskError> {
        Ok(())
    }

    fn content(&self) -> String {
        format!("{:?}", self.script)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn max_retry_times(&self) -> u32 {
        self.max_retry
    }

    async fn run(&mut self, _ctx: &RunContext) -> Result<String, TaskError> {
        if self.sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
        }
        let ok = self.script.pop_front().unwrap_or(false);
        if ok {
            self.meta.record_success("ok", self.sleep_ms);
            Ok("ok".into())
        } else {
            self.meta.record_failure(None, "scripted failure", self.sleep_ms);
            Err(TaskError::execution("scripted failure"))
        }
    }
}

/// Returns its outcome without recording it on the meta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SilentTask {
    #[serde(flatten)]
    pub meta: TaskMeta,
    pub fail: bool,
}

impl SilentTask {
    pub fn new(fail: bool) -> Self {
        Self {
            meta: TaskMeta {
                app_id: "test-app".into(),
                ..TaskMeta::default()
            },
            fail,
        }
    }
}

#[async_trait]
impl Task for SilentTask {
    const TYPE: &'static str = "test.silent";

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TaskMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), TaskError> {
        Ok(())
    }

    fn content(&self) -> String {
        format!("fail={}", self.fail)
    }

    async fn run(&mut self, _ctx: &RunContext) -> Result<String, TaskError> {
        if self.fail {
            Err(TaskError::execution("boom"))
        } else {
            Ok("quiet".into())
        }
    }
}
