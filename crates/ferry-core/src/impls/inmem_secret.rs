//! MemorySecretStore - 単回トークンのメモリ実装

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{StoreError, TaskId};
use crate::ports::{Clock, SecretStore, generate_token};

struct Secret {
    token: String,
    expires_at_ms: i64,
}

pub struct MemorySecretStore {
    clock: Arc<dyn Clock>,
    secrets: Mutex<HashMap<TaskId, Secret>>,
}

impl MemorySecretStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            secrets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.secrets.lock().await.len()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn issue(&self, task_id: TaskId, ttl: Duration) -> Result<String, StoreError> {
        let token = generate_token();
        let now_ms = self.clock.now().timestamp_millis();
        let expires_at_ms = now_ms + ttl.as_millis() as i64;
        let mut secrets = self.secrets.lock().await;
        secrets.retain(|_, secret| secret.expires_at_ms > now_ms);
        secrets.insert(
            task_id,
            Secret {
                token: token.clone(),
                expires_at_ms,
            },
        );
        Ok(token)
    }

    async fn check(&self, task_id: TaskId, token: &str) -> Result<bool, StoreError> {
        let Some(secret) = self.secrets.lock().await.remove(&task_id) else {
            return Ok(false);
        };
        if secret.expires_at_ms <= self.clock.now().timestamp_millis() {
            return Ok(false);
        }
        Ok(!token.is_empty() && secret.token == token)
    }
}
