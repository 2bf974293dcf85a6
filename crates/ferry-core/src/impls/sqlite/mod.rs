//! SqliteStore - ひとつの SQLite ファイルで 4 つの port をすべて実装する
//!
//! # 実装詳細
//! - 接続はひとつ（`Arc<Mutex<Connection>>`）、処理は `spawn_blocking` に逃がす
//! - 同じファイルを複数プロセスが開いても claim / pop は `BEGIN IMMEDIATE` で直列化される
//! - 各 port の実装は queue / lease / secret / log に分けている

mod lease;
mod log;
mod queue;
mod secret;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode};

use crate::domain::{StoreError, TaskId};
use crate::ports::Clock;
use crate::typed::TaskCodec;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS task_queue (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id    TEXT    NOT NULL,
    payload    BLOB    NOT NULL,
    pushed_at  INTEGER NOT NULL,
    popped_at  INTEGER
);
CREATE INDEX IF NOT EXISTS idx_task_queue_popped ON task_queue (popped_at, seq);

CREATE TABLE IF NOT EXISTS task_lease (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id      TEXT    NOT NULL UNIQUE,
    app_id       TEXT    NOT NULL,
    payload      BLOB    NOT NULL,
    content      TEXT    NOT NULL DEFAULT '',
    result       TEXT    NOT NULL DEFAULT '',
    error        TEXT    NOT NULL DEFAULT '',
    exec_ms      INTEGER NOT NULL DEFAULT 0,
    attempts     INTEGER NOT NULL,
    max_attempts INTEGER NOT NULL,
    next_time    INTEGER NOT NULL,
    owner_id     TEXT    NOT NULL,
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_task_lease_due ON task_lease (next_time, attempts);

CREATE TABLE IF NOT EXISTS task_secret (
    task_id       TEXT    PRIMARY KEY,
    token         TEXT    NOT NULL,
    expires_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS task_log (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id   TEXT    NOT NULL,
    app_id    TEXT    NOT NULL,
    task_type TEXT    NOT NULL,
    owner_id  TEXT    NOT NULL,
    content   TEXT    NOT NULL,
    result    TEXT    NOT NULL,
    error     TEXT    NOT NULL,
    exec_ms   INTEGER NOT NULL,
    times     INTEGER NOT NULL,
    next_time INTEGER NOT NULL,
    success   INTEGER NOT NULL,
    logged_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_task_log_task ON task_log (task_id, id);
";

/// SQLite-backed queue, lease store, secret store and attempt log.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    codec: TaskCodec,
    clock: Arc<dyn Clock>,
    lease_window: Duration,
}

impl SqliteStore {
    /// Open or create a database file. WAL mode is enabled so several
    /// processes can share it.
    pub fn open(
        path: impl AsRef<Path>,
        codec: TaskCodec,
        clock: Arc<dyn Clock>,
        lease_window: Duration,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            StoreError::unavailable(format!("open {}: {e}", path.as_ref().display()))
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(sql_err)?;
        Self::with_connection(conn, codec, clock, lease_window)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory(
        codec: TaskCodec,
        clock: Arc<dyn Clock>,
        lease_window: Duration,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::with_connection(conn, codec, clock, lease_window)
    }

    fn with_connection(
        conn: Connection,
        codec: TaskCodec,
        clock: Arc<dyn Clock>,
        lease_window: Duration,
    ) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(sql_err)?;
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            codec,
            clock,
            lease_window,
        })
    }

    /// Run blocking SQLite work off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::unavailable("sqlite connection lock poisoned"))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::unavailable(format!("sqlite worker: {e}")))?
    }
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::unavailable(format!("sqlite: {e}"))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

fn read_task_id(raw: String, column: usize) -> rusqlite::Result<TaskId> {
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use crate::ports::ManualClock;
    use crate::typed::TaskRegistry;
    use crate::typed::testing::{EchoTask, ScriptedTask};
    use chrono::{TimeZone, Utc};

    pub const T0: i64 = 1_700_000_000;

    pub fn codec() -> TaskCodec {
        let mut registry = TaskRegistry::new();
        registry.register::<EchoTask>().unwrap();
        registry.register::<ScriptedTask>().unwrap();
        TaskCodec::new(Arc::new(registry))
    }

    pub fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.timestamp_opt(T0, 0).unwrap()))
    }

    pub fn store(clock: Arc<ManualClock>) -> SqliteStore {
        SqliteStore::open_in_memory(codec(), clock, Duration::from_secs(300)).unwrap()
    }
}
