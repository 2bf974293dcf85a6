//! SecretStore on SQLite.

use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};

use super::{SqliteStore, sql_err};
use crate::domain::{StoreError, TaskId};
use crate::ports::{SecretStore, generate_token};

#[async_trait]
impl SecretStore for SqliteStore {
    async fn issue(&self, task_id: TaskId, ttl: Duration) -> Result<String, StoreError> {
        let token = generate_token();
        let now_ms = self.clock.now().timestamp_millis();
        let expires_at_ms = now_ms + ttl.as_millis() as i64;
        let task_id = task_id.to_string();
        let stored = token.clone();
        self.with_conn(move |conn| {
            // 期限切れのまま検証されなかったトークンを掃除する
            conn.execute(
                "DELETE FROM task_secret WHERE expires_at_ms <= ?1",
                params![now_ms],
            )
            .map_err(sql_err)?;
            conn.execute(
                "INSERT INTO task_secret (task_id, token, expires_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(task_id) DO UPDATE SET token = excluded.token,
                                                    expires_at_ms = excluded.expires_at_ms",
                params![task_id, stored, expires_at_ms],
            )
            .map_err(sql_err)?;
            Ok(())
        })
        .await?;
        Ok(token)
    }

    async fn check(&self, task_id: TaskId, token: &str) -> Result<bool, StoreError> {
        let now_ms = self.clock.now().timestamp_millis();
        let task_id = task_id.to_string();
        // 読み出しと削除を 1 文で行う。比較の結果に関係なく消える
        let stored = self
            .with_conn(move |conn| {
                conn.query_row(
                    "DELETE FROM task_secret WHERE task_id = ?1 RETURNING token, expires_at_ms",
                    params![task_id],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
                )
                .optional()
                .map_err(sql_err)
            })
            .await?;

        Ok(match stored {
            Some((stored, expires_at_ms)) => {
                expires_at_ms > now_ms && !token.is_empty() && stored == token
            }
            None => false,
        })
    }
}
