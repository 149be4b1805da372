// Module declarations
pub(crate) mod conflict_detector;
pub(crate) mod ledger_repository;
pub(crate) mod queue_model;
pub(crate) mod queue_repository;
pub(crate) mod sync_errors;
pub(crate) mod sync_model;
pub(crate) mod sync_service;

// Re-export the public interface
pub use conflict_detector::{build_conflict, classify, ChangeClassification};
pub use ledger_repository::LedgerRepository;
pub use queue_model::{
    backoff_delay, NewQueueItem, QueueItem, QueueStatus, DEFAULT_MAX_RETRIES, DRAIN_BATCH_SIZE,
};
pub use queue_repository::QueueRepository;
pub use sync_errors::{Result, SyncError};
pub use sync_model::{
    ConflictInfo, EventSync, LedgerUpsert, PullOutcome, QueuePayload, SyncOperation, SyncResult,
    SyncStatus,
};
pub use sync_service::SyncService;
