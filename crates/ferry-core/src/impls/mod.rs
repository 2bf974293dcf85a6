//! Impls - port の実装
//!
//! # 含まれる実装
//! - **MemoryQueue / MemoryLeaseStore / MemorySecretStore / MemoryAttemptLog**:
//!   単一プロセス用（開発・テスト）
//! - **SqliteStore**: 4 つの port をひとつの SQLite ファイルで実装。
//!   複数の consumer プロセスで共有できる

pub mod inmem_lease;
pub mod inmem_log;
pub mod inmem_queue;
pub mod inmem_secret;
pub mod sqlite;

pub use self::inmem_lease::MemoryLeaseStore;
pub use self::inmem_log::MemoryAttemptLog;
pub use self::inmem_queue::MemoryQueue;
pub use self::inmem_secret::MemorySecretStore;
pub use self::sqlite::SqliteStore;
