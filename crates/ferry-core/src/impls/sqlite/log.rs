//! AttemptLog on SQLite.

use async_trait::async_trait;
use rusqlite::params;

use super::{SqliteStore, read_task_id, sql_err};
use crate::domain::{AttemptEntry, OwnerId, StoreError, TaskId};
use crate::ports::{AttemptLog, entry_for};
use crate::typed::DynTask;

impl SqliteStore {
    /// Every logged attempt of one task, oldest first.
    pub async fn attempts_for(&self, task_id: TaskId) -> Result<Vec<AttemptEntry>, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT task_id, app_id, task_type, owner_id, content, result, error,
                            exec_ms, times, next_time, success, logged_at
                     FROM task_log WHERE task_id = ?1 ORDER BY id ASC",
                )
                .map_err(sql_err)?;
            let entries = stmt
                .query_map(params![task_id], |r| {
                    Ok(AttemptEntry {
                        task_id: read_task_id(r.get(0)?, 0)?,
                        app_id: r.get(1)?,
                        task_type: r.get(2)?,
                        owner_id: OwnerId::new(r.get::<_, String>(3)?),
                        content: r.get(4)?,
                        result: r.get(5)?,
                        error: r.get(6)?,
                        exec_ms: r.get::<_, i64>(7)? as u64,
                        times: r.get::<_, i64>(8)? as u32,
                        next_time: r.get(9)?,
                        success: r.get(10)?,
                        logged_at: r.get(11)?,
                    })
                })
                .map_err(sql_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql_err)?;
            Ok(entries)
        })
        .await
    }
}

#[async_trait]
impl AttemptLog for SqliteStore {
    async fn append(&self, owner: &OwnerId, task: &dyn DynTask) -> Result<(), StoreError> {
        let entry = entry_for(owner, task, self.clock.now_secs());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO task_log
                 (task_id, app_id, task_type, owner_id, content, result, error,
                  exec_ms, times, next_time, success, logged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    entry.task_id.to_string(),
                    entry.app_id,
                    entry.task_type,
                    entry.owner_id.as_str(),
                    entry.content,
                    entry.result,
                    entry.error,
                    entry.exec_ms as i64,
                    i64::from(entry.times),
                    entry.next_time,
                    entry.success,
                    entry.logged_at
                ],
            )
            .map_err(sql_err)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixture::{self, T0};
    use super::*;
    use crate::typed::TypedTask;
    use crate::typed::testing::EchoTask;
    use ulid::Ulid;

    #[tokio::test]
    async fn appended_attempts_read_back_in_order() {
        let store = fixture::store(fixture::clock());
        let owner = OwnerId::new("c1");
        let mut task = TypedTask::boxed(EchoTask::new("hello"));
        task.meta_mut().init("p1", TaskId::from_ulid(Ulid::new()), T0);

        task.meta_mut().record_failure(None, "first", 5);
        store.append(&owner, task.as_ref()).await.unwrap();
        task.meta_mut().record_success("done", 3);
        store.append(&owner, task.as_ref()).await.unwrap();

        let entries = store.attempts_for(task.meta().id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].error, "first");
        assert!(!entries[0].success);
        assert_eq!(entries[1].result, "done");
        assert!(entries[1].success);
        assert_eq!(entries[1].content, "hello");
        assert_eq!(entries[1].logged_at, T0);
    }
}
