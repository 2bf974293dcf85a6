//! Typed - 型付き Task API
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait - 型安全、バリアントごとに実装
//! - **内部（Dyn）**: `DynTask` trait - object-safe, type erasure
//!
//! `TaskRegistry` が task_type → バリアントの対応を持ち、`TaskCodec` が
//! スナップショットの永続化形式を担当する。

pub mod codec;
pub mod erased;
pub mod http;
pub mod registry;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use self::codec::TaskCodec;
pub use self::erased::{BoxTask, DynTask, TypedTask};
pub use self::http::{HttpReply, HttpTask, TASK_ID_HEADER, TASK_TOKEN_HEADER};
pub use self::registry::{RegistryError, TaskRegistry};
pub use self::task::{DEFAULT_MAX_RETRY_TIMES, DEFAULT_TIMEOUT, RunContext, Task};
