//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（キュー、lease 用 DB、トークン用 KV、ログ）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - engine はここにある trait だけに依存する（グローバルなデフォルト実装は持たない）
//! - 実装は `impls`（in-memory / SQLite）

pub mod attempt_log;
pub mod clock;
pub mod id_generator;
pub mod lease_store;
pub mod secret_store;
pub mod suspend;
pub mod task_queue;

pub use self::attempt_log::{AttemptLog, entry_for};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lease_store::LeaseStore;
pub use self::secret_store::{SecretStore, TOKEN_LEN, generate_token};
pub use self::suspend::{NeverSuspend, SuspendCheck, SuspendSwitch};
pub use self::task_queue::{ConfirmQueue, TaskQueue};
