//! TaskRegistry - task_type からバリアントを復元する
//!
//! # 学習ポイント
//! - HashMap での型消去されたコンストラクタの管理
//! - Generic methods での登録と型安全性
//! - 起動時にのみ変更し、以降は `Arc` で不変共有（ロック不要）

use std::collections::HashMap;

use super::erased::{BoxTask, TypedTask};
use super::task::Task;
use crate::domain::TaskError;

type Constructor = fn(serde_json::Value) -> Result<BoxTask, TaskError>;

/// TaskRegistry は task_type → コンストラクタの対応表
///
/// # 使用例
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<HttpTask>()?;
/// let registry = Arc::new(registry);
///
/// let task = registry.construct("http", payload)?;
/// ```
#[derive(Default)]
pub struct TaskRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

/// RegistryError は TaskRegistry の登録エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

fn construct_typed<T: Task>(payload: serde_json::Value) -> Result<BoxTask, TaskError> {
    let task: T = serde_json::from_value(payload)?;
    Ok(TypedTask::boxed(task))
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register<T: Task>(&mut self) -> Result<(), RegistryError> {
        if self.constructors.contains_key(T::TYPE) {
            return Err(RegistryError::AlreadyRegistered(T::TYPE.to_string()));
        }
        self.constructors.insert(T::TYPE, construct_typed::<T>);
        Ok(())
    }

    /// Build a task of `task_type` from its JSON payload.
    pub fn construct(
        &self,
        task_type: &str,
        payload: serde_json::Value,
    ) -> Result<BoxTask, TaskError> {
        let constructor = self
            .constructors
            .get(task_type)
            .ok_or_else(|| TaskError::UnknownTaskType(task_type.to_string()))?;
        constructor(payload)
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.constructors.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().map(|t| t.to_string()).collect();
        types.sort();
        types
    }
}
