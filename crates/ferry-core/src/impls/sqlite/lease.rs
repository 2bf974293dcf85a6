//! LeaseStore on SQLite.
//!
//! claim は 1 文の条件付き UPDATE ... RETURNING。対象選択と owner / lease の
//! 書き換えが同じ文の中で起きるので、同じ行を 2 つの consumer が同時に得ることはない。

use async_trait::async_trait;
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};

use super::{SqliteStore, is_constraint_violation, read_task_id, sql_err};
use crate::domain::{LeaseRecord, OwnerId, StoreError, TaskId};
use crate::ports::LeaseStore;
use crate::typed::{BoxTask, DynTask};

const RECORD_COLUMNS: &str = "task_id, app_id, payload, content, result, error, exec_ms, \
     attempts, max_attempts, next_time, owner_id, created_at, updated_at";

fn read_record(r: &Row<'_>) -> rusqlite::Result<LeaseRecord> {
    Ok(LeaseRecord {
        task_id: read_task_id(r.get(0)?, 0)?,
        app_id: r.get(1)?,
        payload: r.get(2)?,
        content: r.get(3)?,
        result: r.get(4)?,
        error: r.get(5)?,
        exec_ms: r.get::<_, i64>(6)? as u64,
        attempts: r.get::<_, i64>(7)? as u32,
        max_attempts: r.get::<_, i64>(8)? as u32,
        next_time: r.get(9)?,
        owner_id: OwnerId::new(r.get::<_, String>(10)?),
        created_at: r.get(11)?,
        updated_at: r.get(12)?,
    })
}

#[async_trait]
impl LeaseStore for SqliteStore {
    async fn claim(&self, owner: &OwnerId, size: usize) -> Result<Vec<BoxTask>, StoreError> {
        let now = self.clock.now_secs();
        let lease_until = now + self.lease_window.as_secs() as i64;
        let owner = owner.as_str().to_string();
        let size = size as i64;

        let mut rows = self
            .with_conn(move |conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(sql_err)?;
                let rows = {
                    let mut stmt = tx
                        .prepare(
                            "UPDATE task_lease
                             SET owner_id = ?1, attempts = attempts + 1, next_time = ?2, updated_at = ?3
                             WHERE seq IN (SELECT seq FROM task_lease
                                           WHERE attempts < max_attempts AND next_time < ?3
                                           ORDER BY created_at ASC, seq ASC LIMIT ?4)
                             RETURNING created_at, seq, task_id, payload",
                        )
                        .map_err(sql_err)?;
                    let mapped = stmt
                        .query_map(params![owner, lease_until, now, size], |r| {
                            Ok((
                                r.get::<_, i64>(0)?,
                                r.get::<_, i64>(1)?,
                                r.get::<_, String>(2)?,
                                r.get::<_, Vec<u8>>(3)?,
                            ))
                        })
                        .map_err(sql_err)?;
                    mapped.collect::<Result<Vec<_>, _>>().map_err(sql_err)?
                };
                tx.commit().map_err(sql_err)?;
                Ok(rows)
            })
            .await?;

        // RETURNING の順序は保証されないので並べ直す
        rows.sort_by_key(|(created_at, seq, _, _)| (*created_at, *seq));

        let mut claimed = Vec::with_capacity(rows.len());
        for (_, _, task_id, payload) in rows {
            match self.codec.decode(&payload) {
                Ok(task) => claimed.push(task),
                Err(e) => {
                    tracing::error!(%task_id, error = %e, "lease claim: undecodable snapshot");
                }
            }
        }
        Ok(claimed)
    }

    async fn insert(&self, owner: &OwnerId, task: &dyn DynTask) -> Result<(), StoreError> {
        let now = self.clock.now_secs();
        let meta = task.meta();
        let payload = self.codec.encode(task)?;
        let (attempts, next_time) = if meta.is_processing() {
            (1_i64, now + 2 * task.timeout().as_secs() as i64)
        } else {
            (0_i64, meta.next_time)
        };
        let task_id = meta.id;
        let app_id = meta.app_id.clone();
        let content = task.content();
        let max_attempts = i64::from(task.max_retry_times());
        let owner = owner.as_str().to_string();

        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO task_lease
                 (task_id, app_id, payload, content, attempts, max_attempts, next_time,
                  owner_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    task_id.to_string(),
                    app_id,
                    payload,
                    content,
                    attempts,
                    max_attempts,
                    next_time,
                    owner,
                    now
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::Duplicate(task_id)),
                Err(e) => Err(sql_err(e)),
            }
        })
        .await
    }

    async fn update(&self, owner: &OwnerId, task: &dyn DynTask) -> Result<bool, StoreError> {
        let now = self.clock.now_secs();
        let meta = task.meta();
        let payload = self.codec.encode(task)?;
        let task_id = meta.id.to_string();
        let result = meta.last.result.clone().unwrap_or_default();
        let error = meta.last.error.clone().unwrap_or_default();
        let exec_ms = meta.last.exec_ms as i64;
        let next_time = meta.next_time;
        let owner = owner.as_str().to_string();

        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE task_lease
                     SET payload = ?3, result = ?4, error = ?5, exec_ms = ?6,
                         next_time = ?7, updated_at = ?8
                     WHERE task_id = ?1 AND owner_id = ?2",
                    params![task_id, owner, payload, result, error, exec_ms, next_time, now],
                )
                .map_err(sql_err)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn delete(&self, owner: &OwnerId, task_id: TaskId) -> Result<bool, StoreError> {
        let task_id = task_id.to_string();
        let owner = owner.as_str().to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "DELETE FROM task_lease WHERE task_id = ?1 AND owner_id = ?2",
                    params![task_id, owner],
                )
                .map_err(sql_err)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<LeaseRecord>, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM task_lease WHERE task_id = ?1"),
                params![task_id],
                read_record,
            )
            .optional()
            .map_err(sql_err)
        })
        .await
    }

    async fn poisoned(&self, limit: usize) -> Result<Vec<LeaseRecord>, StoreError> {
        let limit = limit as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM task_lease
                     WHERE attempts >= max_attempts
                     ORDER BY created_at ASC, seq ASC LIMIT ?1"
                ))
                .map_err(sql_err)?;
            let rows = stmt
                .query_map(params![limit], read_record)
                .map_err(sql_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_err)?;
            Ok(rows)
        })
        .await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM task_lease", [], |r| r.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(sql_err)
        })
        .await
    }
}
