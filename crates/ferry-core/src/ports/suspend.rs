//! SuspendCheck port - 一時停止の判定
//!
//! engine は interval ごとに問い合わせ、結果で Running / Suspended を切り替える。

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::domain::StoreError;

#[async_trait]
pub trait SuspendCheck: Send + Sync {
    async fn is_suspended(&self) -> Result<bool, StoreError>;
}

/// Never suspends.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSuspend;

#[async_trait]
impl SuspendCheck for NeverSuspend {
    async fn is_suspended(&self) -> Result<bool, StoreError> {
        Ok(false)
    }
}

/// Operator-controlled switch.
#[derive(Debug, Default)]
pub struct SuspendSwitch {
    suspended: AtomicBool,
}

impl SuspendSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
    }
}

#[async_trait]
impl SuspendCheck for SuspendSwitch {
    async fn is_suspended(&self) -> Result<bool, StoreError> {
        Ok(self.suspended.load(Ordering::SeqCst))
    }
}
