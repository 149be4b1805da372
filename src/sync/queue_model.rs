use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::sync_model::{QueuePayload, SyncOperation};
use crate::sync::SyncError;

/// Default retry bound for queued operations
pub const DEFAULT_MAX_RETRIES: i32 = 3;
/// How many due items one drain invocation processes
pub const DRAIN_BATCH_SIZE: i64 = 10;

pub const QUEUE_STATUS_PENDING: &str = "pending";
pub const QUEUE_STATUS_PROCESSING: &str = "processing";
pub const QUEUE_STATUS_COMPLETED: &str = "completed";
pub const QUEUE_STATUS_ABANDONED: &str = "abandoned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Abandoned,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => QUEUE_STATUS_PENDING,
            QueueStatus::Processing => QUEUE_STATUS_PROCESSING,
            QueueStatus::Completed => QUEUE_STATUS_COMPLETED,
            QueueStatus::Abandoned => QUEUE_STATUS_ABANDONED,
        }
    }
}

impl From<&str> for QueueStatus {
    fn from(s: &str) -> Self {
        match s {
            QUEUE_STATUS_PROCESSING => QueueStatus::Processing,
            QUEUE_STATUS_COMPLETED => QueueStatus::Completed,
            QUEUE_STATUS_ABANDONED => QueueStatus::Abandoned,
            _ => QueueStatus::Pending,
        }
    }
}

/// Exponential backoff: 2^retry_count minutes. The implicit cap is
/// `max_retries`; an abandoned item never schedules again.
pub fn backoff_delay(retry_count: i32) -> Duration {
    Duration::minutes(1i64 << retry_count.clamp(0, 16))
}

/// Domain model for one deferred sync operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub operation: SyncOperation,
    pub event_id: String,
    pub integration_id: String,
    pub payload: String,
    pub priority: i32,
    pub status: QueueStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn parse_payload(&self) -> Result<QueuePayload, SyncError> {
        serde_json::from_str(&self.payload).map_err(SyncError::from)
    }
}

/// Input model for enqueueing a failed operation
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub operation: SyncOperation,
    pub event_id: String,
    pub integration_id: String,
    pub payload: QueuePayload,
    pub priority: i32,
    pub last_error: Option<String>,
}

/// Database model for queue items
#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::sync_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QueueItemDB {
    pub id: String,
    pub operation: String,
    pub event_id: String,
    pub integration_id: String,
    pub payload: String,
    pub priority: i32,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<QueueItemDB> for QueueItem {
    fn from(db: QueueItemDB) -> Self {
        QueueItem {
            id: db.id,
            operation: SyncOperation::from(db.operation.as_str()),
            event_id: db.event_id,
            integration_id: db.integration_id,
            payload: db.payload,
            priority: db.priority,
            status: QueueStatus::from(db.status.as_str()),
            retry_count: db.retry_count,
            max_retries: db.max_retries,
            last_error: db.last_error,
            next_run_at: db.next_run_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        assert_eq!(backoff_delay(0), Duration::minutes(1));
        assert_eq!(backoff_delay(1), Duration::minutes(2));
        assert_eq!(backoff_delay(2), Duration::minutes(4));
        assert_eq!(backoff_delay(3), Duration::minutes(8));
    }

    #[test]
    fn backoff_is_monotonic() {
        for n in 0..10 {
            assert!(backoff_delay(n + 1) > backoff_delay(n));
        }
    }
}
