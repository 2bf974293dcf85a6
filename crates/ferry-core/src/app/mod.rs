//! App - アプリケーション層
//!
//! ports を組み合わせて consumer / producer / callback 検証を実装します。
//!
//! # 主要コンポーネント
//! - **ConsumerBuilder**: consumer の構築とワイヤリング（Fail-fast）
//! - **Consumer**: admission / recovery / dispatch を回す実行エンジン
//! - **Producer**: タスクの投入
//! - **CallbackVerifier**: 単回トークンによるコールバック検証

pub mod builder;
pub mod callback;
pub mod config;
pub mod consumer;
mod pipeline;
pub mod producer;
pub mod status;

pub use self::builder::{BuildError, ConsumerBuilder};
pub use self::callback::{CallbackError, CallbackVerifier};
pub use self::config::{ConfigError, ConsumerConfig};
pub use self::consumer::{Consumer, ShutdownError};
pub use self::producer::{Producer, SubmitError};
pub use self::status::{ConsumerStatus, DrainReport};
