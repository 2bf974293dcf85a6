//! Domain model (ids, task metadata, lease records, errors, engine state).

pub mod errors;
pub mod ids;
pub mod lease;
pub mod meta;
pub mod state;

pub use self::errors::{ErrorKind, StoreError, TaskError};
pub use self::ids::{OwnerId, TaskId};
pub use self::lease::{AttemptEntry, LeaseRecord};
pub use self::meta::{LastAttempt, RELATIVE_EXPECT_LIMIT_SECS, TaskMeta};
pub use self::state::EngineState;
