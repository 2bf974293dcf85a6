//! SecretStore port - 単回トークンの発行と検証
//!
//! 実行ごとにタスク ID に紐づくトークンを発行し、コールバック側が
//! `check` で一度だけ検証できるようにする。

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::domain::{StoreError, TaskId};

pub const TOKEN_LEN: usize = 32;

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Issue a fresh token for `task_id`, replacing any previous one.
    async fn issue(&self, task_id: TaskId, ttl: Duration) -> Result<String, StoreError>;

    /// Read-and-clear the stored token in one atomic step, then compare.
    ///
    /// Any call consumes the stored token, so a token validates at most once.
    /// Expired or unknown tokens never validate.
    async fn check(&self, task_id: TaskId, token: &str) -> Result<bool, StoreError>;
}

/// Random alphanumeric token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_random_alphanumerics() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
