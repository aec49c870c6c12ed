//! Offline mutation queue and the engine that replays it.

mod engine;
mod queue;
mod status;

pub use engine::{ForceSyncReport, Submission, SyncEngine, SyncSettings};
pub use queue::{FailureOutcome, PendingIndex, PendingSyncItem, SyncOperation, SyncQueue};
pub use status::{SyncError, SyncState, SyncStatus};
