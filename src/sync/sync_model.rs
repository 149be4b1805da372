use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::events::UnifiedEvent;
use crate::integrations::ProviderKind;
use crate::sync::SyncError;

pub const SYNC_STATUS_SYNCED: &str = "synced";
pub const SYNC_STATUS_ERROR: &str = "error";
pub const SYNC_STATUS_PENDING: &str = "pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Error,
    Pending,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => SYNC_STATUS_SYNCED,
            SyncStatus::Error => SYNC_STATUS_ERROR,
            SyncStatus::Pending => SYNC_STATUS_PENDING,
        }
    }
}

impl From<&str> for SyncStatus {
    fn from(s: &str) -> Self {
        match s {
            SYNC_STATUS_SYNCED => SyncStatus::Synced,
            SYNC_STATUS_ERROR => SyncStatus::Error,
            _ => SyncStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl From<&str> for SyncOperation {
    fn from(s: &str) -> Self {
        match s {
            "update" => SyncOperation::Update,
            "delete" => SyncOperation::Delete,
            _ => SyncOperation::Create,
        }
    }
}

/// Domain model for one ledger row: the sync relationship between one
/// local event and one integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSync {
    pub event_id: String,
    pub integration_id: String,
    pub provider: ProviderKind,
    pub external_id: Option<String>,
    pub sync_status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub local_modified_at: Option<DateTime<Utc>>,
    pub remote_modified_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub retry_count: i32,
}

/// Database model for ledger rows
#[derive(Queryable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::event_sync)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventSyncDB {
    pub event_id: String,
    pub integration_id: String,
    pub provider: String,
    pub external_id: Option<String>,
    pub sync_status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub local_modified_at: Option<DateTime<Utc>>,
    pub remote_modified_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub retry_count: i32,
}

impl TryFrom<EventSyncDB> for EventSync {
    type Error = SyncError;

    fn try_from(db: EventSyncDB) -> Result<Self, Self::Error> {
        Ok(EventSync {
            provider: ProviderKind::from_str(&db.provider)?,
            event_id: db.event_id,
            integration_id: db.integration_id,
            external_id: db.external_id,
            sync_status: SyncStatus::from(db.sync_status.as_str()),
            last_synced_at: db.last_synced_at,
            last_attempt_at: db.last_attempt_at,
            local_modified_at: db.local_modified_at,
            remote_modified_at: db.remote_modified_at,
            last_error: db.last_error,
            retry_count: db.retry_count,
        })
    }
}

impl From<EventSync> for EventSyncDB {
    fn from(domain: EventSync) -> Self {
        EventSyncDB {
            event_id: domain.event_id,
            integration_id: domain.integration_id,
            provider: domain.provider.as_str().to_string(),
            external_id: domain.external_id,
            sync_status: domain.sync_status.as_str().to_string(),
            last_synced_at: domain.last_synced_at,
            last_attempt_at: domain.last_attempt_at,
            local_modified_at: domain.local_modified_at,
            remote_modified_at: domain.remote_modified_at,
            last_error: domain.last_error,
            retry_count: domain.retry_count,
        }
    }
}

/// Input for the atomic ledger upsert
#[derive(Debug, Clone)]
pub struct LedgerUpsert {
    pub event_id: String,
    pub integration_id: String,
    pub provider: ProviderKind,
    pub external_id: Option<String>,
    pub sync_status: SyncStatus,
    pub local_modified_at: Option<DateTime<Utc>>,
    pub remote_modified_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Per-integration outcome of one push fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub provider: ProviderKind,
    pub integration_id: String,
    pub external_id: Option<String>,
    pub operation: Option<SyncOperation>,
    pub error: Option<String>,
}

/// A detected disagreement between the local and remote copies of an
/// event. Never resolved here; the CRM layer decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub event_id: String,
    pub integration_id: String,
    pub local_modified_at: DateTime<Utc>,
    pub remote_modified_at: DateTime<Utc>,
    pub local_fields: Vec<String>,
    pub remote_fields: Vec<String>,
    /// Always false: conflicts require human resolution
    pub auto_resolvable: bool,
}

/// What a pull cycle returns to the CRM layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullOutcome {
    pub events: Vec<UnifiedEvent>,
    pub conflicts: Vec<ConflictInfo>,
}

/// Snapshot of a deferred sync operation, serialized into the queue so a
/// replay does not depend on the original event still existing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePayload {
    pub operation: SyncOperation,
    pub integration_id: String,
    pub event: UnifiedEvent,
    pub external_id: Option<String>,
}
