//! ferry-core
//!
//! Core building blocks for the ferry task queue: at-least-once execution of
//! deferred and retryable tasks across a pool of consumers.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, TaskMeta, LeaseRecord, EngineState, errors）
//! - **ports**: 抽象化レイヤー（TaskQueue, LeaseStore, SecretStore, AttemptLog, Clock, など）
//! - **typed**: 型付き Task API（Task trait, DynTask, TaskRegistry, TaskCodec, HttpTask）
//! - **impls**: 実装（in-memory と SQLite）
//! - **app**: consumer エンジン、producer、callback 検証

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;
