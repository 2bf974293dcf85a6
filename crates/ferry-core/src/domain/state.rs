//! Consumer engine state.

use serde::{Deserialize, Serialize};

/// Lifecycle of a consumer.
///
/// State transitions:
/// - Running <-> Suspended (suspend check, re-evaluated every interval)
/// - Running | Suspended -> Stopped (terminal, at most once)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    Running,
    Suspended,
    Stopped,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Stopped)
    }

    /// Does this state admit, recover and dispatch work?
    pub fn is_active(self) -> bool {
        matches!(self, EngineState::Running)
    }
}
