//! TaskQueue on SQLite.
//!
//! pop は行を消さずに `popped_at` を付けるだけ。confirm で削除し、
//! confirm されないまま残った行は `release_stale` で再度取り出せるようにする。

use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use super::{SqliteStore, sql_err};
use crate::domain::{StoreError, TaskId};
use crate::ports::{ConfirmQueue, TaskQueue};
use crate::typed::{BoxTask, DynTask};

impl SqliteStore {
    /// Make pops older than `older_than` that were never confirmed poppable
    /// again. They keep their original position.
    pub async fn release_stale(&self, older_than: Duration) -> Result<usize, StoreError> {
        let cutoff = self.clock.now_secs() - older_than.as_secs() as i64;
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE task_queue SET popped_at = NULL
                 WHERE popped_at IS NOT NULL AND popped_at <= ?1",
                params![cutoff],
            )
            .map_err(sql_err)
        })
        .await
    }

    /// Rows popped but not yet confirmed.
    pub async fn unconfirmed(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM task_queue WHERE popped_at IS NOT NULL",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(sql_err)
        })
        .await
    }
}

#[async_trait]
impl TaskQueue for SqliteStore {
    async fn pop(&self) -> Result<Option<BoxTask>, StoreError> {
        let now = self.clock.now_secs();
        let popped = self
            .with_conn(move |conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(sql_err)?;
                let row = tx
                    .query_row(
                        "UPDATE task_queue SET popped_at = ?1
                         WHERE seq = (SELECT seq FROM task_queue
                                      WHERE popped_at IS NULL ORDER BY seq ASC LIMIT 1)
                         RETURNING seq, payload",
                        params![now],
                        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Vec<u8>>(1)?)),
                    )
                    .optional()
                    .map_err(sql_err)?;
                tx.commit().map_err(sql_err)?;
                Ok(row)
            })
            .await?;

        let Some((seq, payload)) = popped else {
            return Ok(None);
        };
        match self.codec.decode(&payload) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                // 復元できない行は末尾へ回して失敗を返す
                self.with_conn(move |conn| {
                    conn.execute(
                        "INSERT INTO task_queue (task_id, payload, pushed_at)
                         SELECT task_id, payload, ?2 FROM task_queue WHERE seq = ?1",
                        params![seq, now],
                    )
                    .map_err(sql_err)?;
                    conn.execute("DELETE FROM task_queue WHERE seq = ?1", params![seq])
                        .map_err(sql_err)?;
                    Ok(())
                })
                .await?;
                Err(e.into())
            }
        }
    }

    async fn push(&self, task: &dyn DynTask) -> Result<bool, StoreError> {
        let payload = self.codec.encode(task)?;
        let task_id = task.meta().id.to_string();
        let now = self.clock.now_secs();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO task_queue (task_id, payload, pushed_at) VALUES (?1, ?2, ?3)",
                params![task_id, payload, now],
            )
            .map_err(sql_err)?;
            Ok(true)
        })
        .await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM task_queue WHERE popped_at IS NULL",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(sql_err)
        })
        .await
    }

    fn as_confirm(&self) -> Option<&dyn ConfirmQueue> {
        Some(self)
    }
}

#[async_trait]
impl ConfirmQueue for SqliteStore {
    async fn confirm(&self, task_id: TaskId) -> Result<(), StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM task_queue WHERE task_id = ?1 AND popped_at IS NOT NULL",
                params![task_id],
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

    fn echo(message: &str) -> BoxTask {
        let mut task = TypedTask::boxed(EchoTask::new(message));
        task.meta_mut().init("p1", TaskId::from_ulid(Ulid::new()), T0);
        task
    }

    #[tokio::test]
    async fn pop_is_fifo_and_two_phase() {
        let store = fixture::store(fixture::clock());
        let first = echo("first");
        store.push(first.as_ref()).await.unwrap();
        store.push(echo("second").as_ref()).await.unwrap();

        let popped = store.pop().await.unwrap().unwrap();
        assert_eq!(popped.meta().id, first.meta().id);
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.unconfirmed().await.unwrap(), 1);

        store
            .as_confirm()
            .unwrap()
            .confirm(popped.meta().id)
            .await
            .unwrap();
        assert_eq!(store.unconfirmed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_pops_come_back_in_order() {
        let clock = fixture::clock();
        let store = fixture::store(clock.clone());
        let a = echo("a");
        store.push(a.as_ref()).await.unwrap();
        store.push(echo("b").as_ref()).await.unwrap();

        store.pop().await.unwrap().unwrap();
        assert_eq!(store.release_stale(Duration::from_secs(60)).await.unwrap(), 0);

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(store.release_stale(Duration::from_secs(60)).await.unwrap(), 1);
        let again = store.pop().await.unwrap().unwrap();
        assert_eq!(again.meta().id, a.meta().id);
    }

    #[tokio::test]
    async fn empty_queue_pops_none() {
        let store = fixture::store(fixture::clock());
        assert!(store.pop().await.unwrap().is_none());
    }
}
