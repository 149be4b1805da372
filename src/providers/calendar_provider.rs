use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::RemoteChanges;
use crate::events::UnifiedEvent;
use crate::sync::SyncError;

/// Credentials returned by a provider's token endpoint
#[derive(Clone)]
pub struct RefreshedCredential {
    pub access: String,
    pub refresh: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Persists refreshed credentials before the provider call that triggered
/// the refresh returns. Adapters await this so a persisted token can never
/// lag behind the one in use.
#[async_trait]
pub trait TokenPersister: Send + Sync {
    async fn persist(
        &self,
        integration_id: &str,
        credential: &RefreshedCredential,
    ) -> Result<(), SyncError>;
}

/// Capability interface for one external calendar system.
///
/// Implementations own the entire field mapping between the unified event
/// and their native representation; callers never see provider payloads.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    fn kind(&self) -> crate::integrations::ProviderKind;

    /// Creates the event remotely and returns its external id
    async fn create_event(&self, event: &UnifiedEvent) -> Result<String, SyncError>;

    /// Updates the remote event; returns the (possibly new) external id.
    /// An unknown id surfaces as `AlreadyDeleted` so the orchestrator can
    /// self-heal by re-creating.
    async fn update_event(
        &self,
        external_id: &str,
        event: &UnifiedEvent,
    ) -> Result<String, SyncError>;

    /// Deletes the remote event. "Already gone" surfaces as
    /// `AlreadyDeleted`, which callers treat as success plus ledger cleanup.
    async fn delete_event(&self, external_id: &str) -> Result<(), SyncError>;

    /// Lists remote changes, incrementally when a checkpoint is given,
    /// otherwise as a full scan of the window. A provider-rejected
    /// checkpoint surfaces as `InvalidCheckpoint`.
    async fn list_events(
        &self,
        checkpoint: Option<&str>,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<RemoteChanges, SyncError>;
}
