use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::events::{EventError, EventRepository, UnifiedEvent};
use crate::integrations::{Integration, IntegrationRepository};
use crate::providers::AdapterFactory;
use crate::sync::{Result, SyncError};

use super::conflict_detector::{build_conflict, classify, ChangeClassification};
use super::ledger_repository::LedgerRepository;
use super::queue_model::{NewQueueItem, QueueStatus, DRAIN_BATCH_SIZE};
use super::queue_repository::QueueRepository;
use super::sync_model::{
    LedgerUpsert, PullOutcome, QueuePayload, SyncOperation, SyncResult, SyncStatus,
};

/// Default pull window when no checkpoint constrains the listing
const PULL_WINDOW_PAST_DAYS: i64 = 30;
const PULL_WINDOW_FUTURE_DAYS: i64 = 365;

/// Orchestrates pushes, pulls and queue drains across all integrations.
///
/// One failing integration never blocks the others: pushes fan out
/// concurrently and collect per-integration results, pulls tolerate
/// per-item and per-integration failures and keep going.
pub struct SyncService {
    events: Arc<EventRepository>,
    integrations: Arc<IntegrationRepository>,
    ledger: Arc<LedgerRepository>,
    queue: Arc<QueueRepository>,
    adapters: Arc<dyn AdapterFactory>,
}

impl SyncService {
    pub fn new(
        events: Arc<EventRepository>,
        integrations: Arc<IntegrationRepository>,
        ledger: Arc<LedgerRepository>,
        queue: Arc<QueueRepository>,
        adapters: Arc<dyn AdapterFactory>,
    ) -> Self {
        Self {
            events,
            integrations,
            ledger,
            queue,
            adapters,
        }
    }

    /// Pushes one local change to every active, export-eligible
    /// integration concurrently. Always returns one result per eligible
    /// integration; a failure on one never short-circuits the rest.
    pub async fn push_event(
        &self,
        event: &UnifiedEvent,
        operation: SyncOperation,
    ) -> Result<Vec<SyncResult>> {
        let targets: Vec<Integration> = self
            .integrations
            .list_active()
            .map_err(SyncError::from)?
            .into_iter()
            .filter(|integration| integration.sync_direction.allows_export())
            .collect();

        debug!(
            "Pushing {} of event {} to {} integration(s)",
            operation.as_str(),
            event.id,
            targets.len()
        );

        let pushes = targets
            .into_iter()
            .map(|integration| self.push_to_integration(event.clone(), integration, operation));

        Ok(join_all(pushes).await)
    }

    async fn push_to_integration(
        &self,
        event: UnifiedEvent,
        integration: Integration,
        operation: SyncOperation,
    ) -> SyncResult {
        match self
            .execute_push(&event, &integration, operation, None)
            .await
        {
            Ok(external_id) => {
                if let Err(e) = self.integrations.record_sync_outcome(&integration.id, None) {
                    warn!(
                        "Failed to record sync outcome for integration {}: {}",
                        integration.id, e
                    );
                }
                SyncResult {
                    success: true,
                    provider: integration.provider,
                    integration_id: integration.id,
                    external_id,
                    operation: Some(operation),
                    error: None,
                }
            }
            Err(e) => self.handle_push_failure(&event, &integration, operation, e),
        }
    }

    /// Runs one push against one integration's adapter, owning the ledger
    /// bookkeeping for the pair. `known_external_id` carries the id from a
    /// queued snapshot when the ledger row may be gone.
    async fn execute_push(
        &self,
        event: &UnifiedEvent,
        integration: &Integration,
        operation: SyncOperation,
        known_external_id: Option<&str>,
    ) -> Result<Option<String>> {
        let adapter = self.adapters.adapter_for(integration)?;

        let ledger_external_id = self
            .ledger
            .get(&event.id, &integration.id)?
            .and_then(|row| row.external_id);
        let external_id = known_external_id
            .map(str::to_string)
            .or(ledger_external_id);

        match operation {
            SyncOperation::Create => {
                let created_id = adapter.create_event(event).await?;
                self.record_synced(event, integration, Some(created_id.clone()))?;
                Ok(Some(created_id))
            }
            SyncOperation::Update => {
                let remote_id = match external_id {
                    // No remote counterpart known: heal by creating one.
                    None => {
                        let created_id = adapter.create_event(event).await?;
                        self.record_synced(event, integration, Some(created_id.clone()))?;
                        return Ok(Some(created_id));
                    }
                    Some(remote_id) => remote_id,
                };

                match adapter.update_event(&remote_id, event).await {
                    Ok(updated_id) => {
                        self.record_synced(event, integration, Some(updated_id.clone()))?;
                        Ok(Some(updated_id))
                    }
                    // The remote object vanished underneath us. Drop the
                    // stale mapping and re-create in the same push.
                    Err(SyncError::AlreadyDeleted) => {
                        info!(
                            "Remote copy of event {} gone from integration {}, re-creating",
                            event.id, integration.id
                        );
                        self.ledger.delete(&event.id, &integration.id)?;
                        let created_id = adapter.create_event(event).await?;
                        self.record_synced(event, integration, Some(created_id.clone()))?;
                        Ok(Some(created_id))
                    }
                    Err(e) => Err(e),
                }
            }
            SyncOperation::Delete => {
                let remote_id = match external_id {
                    // Nothing was ever created remotely; deletion is done.
                    None => return Ok(None),
                    Some(remote_id) => remote_id,
                };

                match adapter.delete_event(&remote_id).await {
                    // Already gone is the outcome we wanted.
                    Ok(()) | Err(SyncError::AlreadyDeleted) => {
                        self.ledger.delete(&event.id, &integration.id)?;
                        Ok(Some(remote_id))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn record_synced(
        &self,
        event: &UnifiedEvent,
        integration: &Integration,
        external_id: Option<String>,
    ) -> Result<()> {
        // A push says nothing about the remote clock; keep whatever the
        // last pull recorded.
        let remote_modified_at = self
            .ledger
            .get(&event.id, &integration.id)?
            .and_then(|row| row.remote_modified_at);
        self.ledger.upsert(LedgerUpsert {
            event_id: event.id.clone(),
            integration_id: integration.id.clone(),
            provider: integration.provider,
            external_id,
            sync_status: SyncStatus::Synced,
            local_modified_at: Some(event.updated_at),
            remote_modified_at,
            error: None,
        })?;
        Ok(())
    }

    /// Retryable failures get a queue entry with a payload snapshot;
    /// terminal ones only get recorded. Either way the ledger row flips to
    /// error with its external id preserved.
    fn handle_push_failure(
        &self,
        event: &UnifiedEvent,
        integration: &Integration,
        operation: SyncOperation,
        error: SyncError,
    ) -> SyncResult {
        let message = error.to_string();
        warn!(
            "Push of event {} to integration {} failed: {}",
            event.id, integration.id, message
        );

        let existing = self.ledger.get(&event.id, &integration.id).ok().flatten();
        let existing_external_id = existing.as_ref().and_then(|row| row.external_id.clone());
        let existing_remote_modified_at = existing.and_then(|row| row.remote_modified_at);

        if let Err(e) = self.ledger.upsert(LedgerUpsert {
            event_id: event.id.clone(),
            integration_id: integration.id.clone(),
            provider: integration.provider,
            external_id: existing_external_id.clone(),
            sync_status: SyncStatus::Error,
            local_modified_at: Some(event.updated_at),
            remote_modified_at: existing_remote_modified_at,
            error: Some(message.clone()),
        }) {
            warn!("Failed to record ledger error for event {}: {}", event.id, e);
        }

        if error.is_retryable() {
            let enqueued = self.queue.enqueue(NewQueueItem {
                operation,
                event_id: event.id.clone(),
                integration_id: integration.id.clone(),
                payload: QueuePayload {
                    operation,
                    integration_id: integration.id.clone(),
                    event: event.clone(),
                    external_id: existing_external_id,
                },
                priority: 0,
                last_error: Some(message.clone()),
            });
            if let Err(e) = enqueued {
                warn!("Failed to enqueue retry for event {}: {}", event.id, e);
            }
        }

        if let Err(e) = self
            .integrations
            .record_sync_outcome(&integration.id, Some(&message))
        {
            warn!(
                "Failed to record sync outcome for integration {}: {}",
                integration.id, e
            );
        }

        SyncResult {
            success: false,
            provider: integration.provider,
            integration_id: integration.id.clone(),
            external_id: None,
            operation: Some(operation),
            error: Some(message),
        }
    }

    /// Pulls remote changes from every active, import-eligible integration
    /// sequentially. Per-item and per-integration failures are logged and
    /// skipped so one bad apple never aborts the cycle.
    ///
    /// `window` bounds full scans; when omitted it defaults to 30 days back
    /// and a year ahead. Incremental listings ignore it.
    pub async fn pull_events(
        &self,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<PullOutcome> {
        let mut outcome = PullOutcome::default();

        let now = Utc::now();
        let window = window.unwrap_or((
            now - Duration::days(PULL_WINDOW_PAST_DAYS),
            now + Duration::days(PULL_WINDOW_FUTURE_DAYS),
        ));

        let sources: Vec<Integration> = self
            .integrations
            .list_active()
            .map_err(SyncError::from)?
            .into_iter()
            .filter(|integration| integration.sync_direction.allows_import())
            .collect();

        for integration in sources {
            match self
                .pull_from_integration(&integration, window, &mut outcome)
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.integrations.record_sync_outcome(&integration.id, None) {
                        warn!(
                            "Failed to record sync outcome for integration {}: {}",
                            integration.id, e
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        "Pull from integration {} failed: {}",
                        integration.id, e
                    );
                    if let Err(record_err) = self
                        .integrations
                        .record_sync_outcome(&integration.id, Some(&e.to_string()))
                    {
                        warn!(
                            "Failed to record sync outcome for integration {}: {}",
                            integration.id, record_err
                        );
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn pull_from_integration(
        &self,
        integration: &Integration,
        window: (DateTime<Utc>, DateTime<Utc>),
        outcome: &mut PullOutcome,
    ) -> Result<()> {
        let adapter = self.adapters.adapter_for(integration)?;

        let changes = match adapter
            .list_events(integration.sync_checkpoint.as_deref(), Some(window))
            .await
        {
            // A rejected checkpoint costs one full scan, nothing more.
            Err(SyncError::InvalidCheckpoint) => {
                info!(
                    "Checkpoint rejected for integration {}, falling back to full scan",
                    integration.id
                );
                self.integrations.clear_checkpoint(&integration.id)?;
                adapter.list_events(None, Some(window)).await?
            }
            other => other?,
        };

        debug!(
            "Pulled {} change(s) from integration {}",
            changes.items.len(),
            integration.id
        );

        for item in &changes.items {
            if let Err(e) = self.apply_remote_item(integration, item, outcome) {
                warn!(
                    "Skipping remote item {} from integration {}: {}",
                    item.external_id, integration.id, e
                );
            }
        }

        self.integrations
            .update_checkpoint(&integration.id, changes.next_checkpoint.as_deref())?;

        Ok(())
    }

    fn apply_remote_item(
        &self,
        integration: &Integration,
        item: &crate::providers::RemoteEvent,
        outcome: &mut PullOutcome,
    ) -> Result<()> {
        let ledger_row = self
            .ledger
            .get_by_external_id(&integration.id, &item.external_id)?;

        if item.deleted {
            if let Some(row) = ledger_row {
                match self.events.mark_cancelled(&row.event_id) {
                    Ok(()) | Err(EventError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                self.ledger.delete(&row.event_id, &integration.id)?;
            }
            return Ok(());
        }

        let row = match ledger_row {
            None => return self.create_from_remote(integration, item, outcome),
            Some(row) => row,
        };

        let local = match self.events.get_by_id(&row.event_id) {
            Ok(local) => local,
            // Ledger points at an event that no longer exists locally;
            // drop the mapping and treat the remote item as new.
            Err(EventError::NotFound(_)) => {
                self.ledger.delete(&row.event_id, &integration.id)?;
                return self.create_from_remote(integration, item, outcome);
            }
            Err(e) => return Err(e.into()),
        };

        match classify(Some(&row), local.updated_at, item.remote_updated_at) {
            ChangeClassification::New => self.create_from_remote(integration, item, outcome),
            ChangeClassification::Unchanged | ChangeClassification::LocalOnly => Ok(()),
            ChangeClassification::RemoteOnly => {
                let mut updated = local;
                item.apply_to(&mut updated);
                updated.updated_at = Utc::now();
                let updated = self.events.upsert_pulled(updated)?;
                self.ledger.upsert(LedgerUpsert {
                    event_id: updated.id.clone(),
                    integration_id: integration.id.clone(),
                    provider: integration.provider,
                    external_id: Some(item.external_id.clone()),
                    sync_status: SyncStatus::Synced,
                    local_modified_at: Some(updated.updated_at),
                    remote_modified_at: Some(item.remote_updated_at),
                    error: None,
                })?;
                outcome.events.push(updated);
                Ok(())
            }
            // Neither side wins automatically; surface the disagreement
            // and leave both copies untouched.
            ChangeClassification::Conflict => {
                let conflict = build_conflict(&integration.id, &local, item);
                self.ledger.upsert(LedgerUpsert {
                    event_id: local.id.clone(),
                    integration_id: integration.id.clone(),
                    provider: integration.provider,
                    external_id: Some(item.external_id.clone()),
                    sync_status: SyncStatus::Pending,
                    local_modified_at: Some(local.updated_at),
                    remote_modified_at: Some(item.remote_updated_at),
                    error: None,
                })?;
                outcome.conflicts.push(conflict);
                Ok(())
            }
        }
    }

    fn create_from_remote(
        &self,
        integration: &Integration,
        item: &crate::providers::RemoteEvent,
        outcome: &mut PullOutcome,
    ) -> Result<()> {
        let created = self.events.create(item.to_new_event())?;
        self.ledger.upsert(LedgerUpsert {
            event_id: created.id.clone(),
            integration_id: integration.id.clone(),
            provider: integration.provider,
            external_id: Some(item.external_id.clone()),
            sync_status: SyncStatus::Synced,
            local_modified_at: Some(created.updated_at),
            remote_modified_at: Some(item.remote_updated_at),
            error: None,
        })?;
        outcome.events.push(created);
        Ok(())
    }

    /// Drains one batch of due queue items, replaying each against its
    /// integration. Still-failing retryable items are rescheduled with
    /// backoff; terminal failures and unusable items are abandoned.
    pub async fn process_queue(&self) -> Result<Vec<SyncResult>> {
        let claimed = self.queue.claim_due(Utc::now(), DRAIN_BATCH_SIZE)?;
        let mut results = Vec::with_capacity(claimed.len());

        for item in claimed {
            let payload = match item.parse_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Abandoning queue item {} with unreadable payload: {}", item.id, e);
                    self.queue.abandon(&item.id, &e.to_string())?;
                    continue;
                }
            };

            let integration = match self.integrations.get_by_id(&item.integration_id) {
                Ok(integration) if integration.is_active => integration,
                Ok(_) => {
                    info!(
                        "Abandoning queue item {}: integration {} is no longer active",
                        item.id, item.integration_id
                    );
                    self.queue.abandon(&item.id, "integration disconnected")?;
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Abandoning queue item {}: integration {} unavailable: {}",
                        item.id, item.integration_id, e
                    );
                    self.queue.abandon(&item.id, &e.to_string())?;
                    continue;
                }
            };

            match self
                .execute_push(
                    &payload.event,
                    &integration,
                    payload.operation,
                    payload.external_id.as_deref(),
                )
                .await
            {
                Ok(external_id) => {
                    self.queue.mark_completed(&item.id)?;
                    if let Err(e) = self.integrations.record_sync_outcome(&integration.id, None) {
                        warn!(
                            "Failed to record sync outcome for integration {}: {}",
                            integration.id, e
                        );
                    }
                    results.push(SyncResult {
                        success: true,
                        provider: integration.provider,
                        integration_id: integration.id,
                        external_id,
                        operation: Some(payload.operation),
                        error: None,
                    });
                }
                Err(e) if e.is_retryable() => {
                    let message = e.to_string();
                    let status = self.queue.record_failure(&item.id, &message)?;
                    if status == QueueStatus::Abandoned {
                        warn!(
                            "Queue item {} exhausted its retries and was abandoned",
                            item.id
                        );
                    }
                    results.push(SyncResult {
                        success: false,
                        provider: integration.provider,
                        integration_id: integration.id,
                        external_id: None,
                        operation: Some(payload.operation),
                        error: Some(message),
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(
                        "Abandoning queue item {} on terminal failure: {}",
                        item.id, message
                    );
                    self.queue.abandon(&item.id, &message)?;
                    results.push(SyncResult {
                        success: false,
                        provider: integration.provider,
                        integration_id: integration.id,
                        external_id: None,
                        operation: Some(payload.operation),
                        error: Some(message),
                    });
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, DbPool};
    use crate::events::NewEvent;
    use crate::integrations::{NewIntegration, ProviderKind, SyncDirection};
    use crate::providers::{CalendarProvider, RemoteChanges, RemoteEvent};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use diesel::r2d2::{ConnectionManager, Pool};
    use diesel::sqlite::SqliteConnection;
    use diesel_migrations::MigrationHarness;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Copy, PartialEq)]
    enum Failure {
        None,
        Unavailable,
        Rejected,
        Gone,
    }

    struct FakeProvider {
        kind: ProviderKind,
        create_failure: Mutex<Failure>,
        update_failure: Mutex<Failure>,
        delete_failure: Mutex<Failure>,
        created: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        changes: Mutex<RemoteChanges>,
        reject_checkpoint: Mutex<bool>,
        seen_checkpoints: Mutex<Vec<Option<String>>>,
    }

    impl FakeProvider {
        fn new(kind: ProviderKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                create_failure: Mutex::new(Failure::None),
                update_failure: Mutex::new(Failure::None),
                delete_failure: Mutex::new(Failure::None),
                created: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
                changes: Mutex::new(RemoteChanges::default()),
                reject_checkpoint: Mutex::new(false),
                seen_checkpoints: Mutex::new(Vec::new()),
            })
        }

        fn set_create_failure(&self, failure: Failure) {
            *self.create_failure.lock().unwrap() = failure;
        }

        fn set_update_failure(&self, failure: Failure) {
            *self.update_failure.lock().unwrap() = failure;
        }

        fn set_delete_failure(&self, failure: Failure) {
            *self.delete_failure.lock().unwrap() = failure;
        }

        fn set_changes(&self, changes: RemoteChanges) {
            *self.changes.lock().unwrap() = changes;
        }

        fn fail(failure: Failure) -> Option<SyncError> {
            match failure {
                Failure::None => None,
                Failure::Unavailable => {
                    Some(SyncError::ProviderUnavailable("connection timed out".to_string()))
                }
                Failure::Rejected => {
                    Some(SyncError::ProviderRejected("invalid field".to_string()))
                }
                Failure::Gone => Some(SyncError::AlreadyDeleted),
            }
        }
    }

    #[async_trait]
    impl CalendarProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn create_event(&self, event: &UnifiedEvent) -> Result<String> {
            if let Some(e) = Self::fail(*self.create_failure.lock().unwrap()) {
                return Err(e);
            }
            let external_id = format!("ext-{}", event.id);
            self.created.lock().unwrap().push(event.id.clone());
            Ok(external_id)
        }

        async fn update_event(&self, external_id: &str, _event: &UnifiedEvent) -> Result<String> {
            if let Some(e) = Self::fail(*self.update_failure.lock().unwrap()) {
                return Err(e);
            }
            Ok(external_id.to_string())
        }

        async fn delete_event(&self, external_id: &str) -> Result<()> {
            if let Some(e) = Self::fail(*self.delete_failure.lock().unwrap()) {
                return Err(e);
            }
            self.deleted.lock().unwrap().push(external_id.to_string());
            Ok(())
        }

        async fn list_events(
            &self,
            checkpoint: Option<&str>,
            _window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        ) -> Result<RemoteChanges> {
            self.seen_checkpoints
                .lock()
                .unwrap()
                .push(checkpoint.map(str::to_string));
            if checkpoint.is_some() && *self.reject_checkpoint.lock().unwrap() {
                return Err(SyncError::InvalidCheckpoint);
            }
            Ok(self.changes.lock().unwrap().clone())
        }
    }

    struct FakeFactory {
        providers: Mutex<HashMap<String, Arc<FakeProvider>>>,
    }

    impl FakeFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                providers: Mutex::new(HashMap::new()),
            })
        }

        fn register(&self, integration_id: &str, provider: Arc<FakeProvider>) {
            self.providers
                .lock()
                .unwrap()
                .insert(integration_id.to_string(), provider);
        }
    }

    impl AdapterFactory for FakeFactory {
        fn adapter_for(&self, integration: &Integration) -> Result<Arc<dyn CalendarProvider>> {
            let provider = self
                .providers
                .lock()
                .unwrap()
                .get(&integration.id)
                .cloned()
                .ok_or_else(|| SyncError::NotFound(integration.id.clone()))?;
            Ok(provider)
        }
    }

    struct Harness {
        service: SyncService,
        events: Arc<EventRepository>,
        integrations: Arc<IntegrationRepository>,
        ledger: Arc<LedgerRepository>,
        queue: Arc<QueueRepository>,
        factory: Arc<FakeFactory>,
    }

    fn create_test_pool() -> Arc<DbPool> {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("Failed to create test pool");
        pool.get()
            .unwrap()
            .run_pending_migrations(db::MIGRATIONS)
            .expect("Failed to run migrations");
        Arc::new(pool)
    }

    fn harness() -> Harness {
        let pool = create_test_pool();
        let events = Arc::new(EventRepository::new(pool.clone()));
        let integrations = Arc::new(IntegrationRepository::new(pool.clone()));
        let ledger = Arc::new(LedgerRepository::new(pool.clone()));
        let queue = Arc::new(QueueRepository::new(pool));
        let factory = FakeFactory::new();
        let service = SyncService::new(
            events.clone(),
            integrations.clone(),
            ledger.clone(),
            queue.clone(),
            factory.clone(),
        );
        Harness {
            service,
            events,
            integrations,
            ledger,
            queue,
            factory,
        }
    }

    fn add_integration(
        h: &Harness,
        kind: ProviderKind,
        direction: SyncDirection,
    ) -> (Integration, Arc<FakeProvider>) {
        let integration = h
            .integrations
            .create(NewIntegration {
                provider: kind,
                access_credential: vec![1, 2, 3],
                refresh_credential: None,
                credential_expires_at: None,
                external_calendar_id: "primary".to_string(),
                sync_direction: direction,
            })
            .unwrap();
        let provider = FakeProvider::new(kind);
        h.factory.register(&integration.id, provider.clone());
        (integration, provider)
    }

    fn add_event(h: &Harness, title: &str) -> UnifiedEvent {
        let start = Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap();
        h.events
            .create(NewEvent {
                kind: crate::events::EventKind::Event,
                title: title.to_string(),
                description: None,
                start_at: start,
                end_at: start + Duration::hours(1),
                all_day: false,
                location: None,
                attendees: vec![],
                is_recurring: false,
                client_id: None,
            })
            .unwrap()
    }

    fn remote_item(external_id: &str, title: &str, updated_at: DateTime<Utc>) -> RemoteEvent {
        let start = Utc.with_ymd_and_hms(2025, 7, 2, 9, 0, 0).unwrap();
        RemoteEvent {
            external_id: external_id.to_string(),
            title: title.to_string(),
            description: None,
            start_at: start,
            end_at: start + Duration::hours(1),
            all_day: false,
            location: None,
            attendees: vec![],
            status: crate::events::EventStatus::Scheduled,
            is_recurring: false,
            remote_updated_at: updated_at,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn push_fans_out_and_one_failure_does_not_block_the_other() {
        let h = harness();
        let (good, _good_provider) =
            add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);
        let (bad, bad_provider) =
            add_integration(&h, ProviderKind::Notion, SyncDirection::Bidirectional);
        bad_provider.set_create_failure(Failure::Unavailable);

        let event = add_event(&h, "Kickoff meeting");
        let results = h
            .service
            .push_event(&event, SyncOperation::Create)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let ok = results.iter().find(|r| r.integration_id == good.id).unwrap();
        let failed = results.iter().find(|r| r.integration_id == bad.id).unwrap();
        assert!(ok.success);
        assert_eq!(ok.external_id.as_deref(), Some(format!("ext-{}", event.id).as_str()));
        assert!(!failed.success);

        let good_row = h.ledger.get(&event.id, &good.id).unwrap().unwrap();
        assert_eq!(good_row.sync_status, SyncStatus::Synced);
        assert!(good_row.last_synced_at.is_some());

        let bad_row = h.ledger.get(&event.id, &bad.id).unwrap().unwrap();
        assert_eq!(bad_row.sync_status, SyncStatus::Error);
        assert!(bad_row.last_error.is_some());

        // The retryable failure landed on the queue; once the provider
        // recovers, one drain resolves it.
        bad_provider.set_create_failure(Failure::None);
        let drained = h.service.process_queue().await.unwrap();
        assert_eq!(drained.len(), 1);
        assert!(drained[0].success);

        let healed = h.ledger.get(&event.id, &bad.id).unwrap().unwrap();
        assert_eq!(healed.sync_status, SyncStatus::Synced);
        assert!(h.queue.claim_due(Utc::now(), 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_only_integrations_are_skipped_on_push() {
        let h = harness();
        add_integration(&h, ProviderKind::Google, SyncDirection::ImportOnly);
        let event = add_event(&h, "Internal review");

        let results = h
            .service
            .push_event(&event, SyncOperation::Create)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn terminal_failures_are_not_queued() {
        let h = harness();
        let (_integration, provider) =
            add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);
        provider.set_create_failure(Failure::Rejected);

        let event = add_event(&h, "Bad payload");
        let results = h
            .service
            .push_event(&event, SyncOperation::Create)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(h.queue.claim_due(Utc::now(), 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_an_already_gone_remote_counts_as_success() {
        let h = harness();
        let (integration, provider) =
            add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);
        let event = add_event(&h, "Old appointment");

        h.service
            .push_event(&event, SyncOperation::Create)
            .await
            .unwrap();
        provider.set_delete_failure(Failure::Gone);

        let results = h
            .service
            .push_event(&event, SyncOperation::Delete)
            .await
            .unwrap();
        assert!(results[0].success);
        assert!(h.ledger.get(&event.id, &integration.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_without_remote_counterpart_is_a_noop_success() {
        let h = harness();
        add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);
        let event = add_event(&h, "Never synced");

        let results = h
            .service
            .push_event(&event, SyncOperation::Delete)
            .await
            .unwrap();
        assert!(results[0].success);
        assert!(results[0].external_id.is_none());
    }

    #[tokio::test]
    async fn push_accepts_an_event_not_yet_visible_in_the_store() {
        let h = harness();
        add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);

        // Callers hand the event over directly; nothing is re-read from
        // the event store on the way out.
        let mut event = add_event(&h, "Draft appointment");
        event.id = "not-persisted".to_string();

        let results = h
            .service
            .push_event(&event, SyncOperation::Delete)
            .await
            .unwrap();
        assert!(results[0].success);
        assert!(results[0].external_id.is_none());
    }

    #[tokio::test]
    async fn push_preserves_the_remote_timestamp_on_the_ledger() {
        let h = harness();
        let (integration, _provider) =
            add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);
        let event = add_event(&h, "Recurring checkup");

        let remote_seen = Utc.with_ymd_and_hms(2025, 7, 4, 11, 0, 0).unwrap();
        h.ledger
            .upsert(LedgerUpsert {
                event_id: event.id.clone(),
                integration_id: integration.id.clone(),
                provider: integration.provider,
                external_id: Some("ext-known".to_string()),
                sync_status: SyncStatus::Synced,
                local_modified_at: Some(event.updated_at),
                remote_modified_at: Some(remote_seen),
                error: None,
            })
            .unwrap();

        let results = h
            .service
            .push_event(&event, SyncOperation::Update)
            .await
            .unwrap();
        assert!(results[0].success);

        let row = h.ledger.get(&event.id, &integration.id).unwrap().unwrap();
        assert_eq!(row.remote_modified_at, Some(remote_seen));
        assert_eq!(row.external_id.as_deref(), Some("ext-known"));
    }

    #[tokio::test]
    async fn update_without_ledger_row_falls_back_to_create() {
        let h = harness();
        let (integration, provider) =
            add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);
        let event = add_event(&h, "Rescheduled visit");

        let results = h
            .service
            .push_event(&event, SyncOperation::Update)
            .await
            .unwrap();

        assert!(results[0].success);
        assert_eq!(provider.created.lock().unwrap().len(), 1);
        let row = h.ledger.get(&event.id, &integration.id).unwrap().unwrap();
        assert_eq!(row.external_id.as_deref(), Some(format!("ext-{}", event.id).as_str()));
        assert_eq!(row.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn update_recreates_when_remote_copy_vanished() {
        let h = harness();
        let (integration, provider) =
            add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);
        let event = add_event(&h, "Moved meeting");

        h.service
            .push_event(&event, SyncOperation::Create)
            .await
            .unwrap();
        provider.set_update_failure(Failure::Gone);

        let results = h
            .service
            .push_event(&event, SyncOperation::Update)
            .await
            .unwrap();
        assert!(results[0].success);

        // The re-create path went through create_event a second time.
        assert_eq!(provider.created.lock().unwrap().len(), 2);
        let row = h.ledger.get(&event.id, &integration.id).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(row.external_id.as_deref(), Some(format!("ext-{}", event.id).as_str()));
    }

    #[tokio::test]
    async fn pull_creates_new_events_and_reports_conflicts() {
        let h = harness();
        let (integration, provider) =
            add_integration(&h, ProviderKind::Notion, SyncDirection::Bidirectional);

        // One already-synced event whose both copies moved afterwards.
        let local = add_event(&h, "Quarterly planning");
        h.service
            .push_event(&local, SyncOperation::Create)
            .await
            .unwrap();
        let mut touched = h.events.get_by_id(&local.id).unwrap();
        touched.title = "Quarterly planning (moved)".to_string();
        let touched = h.events.update(touched).unwrap();

        let remote_conflict = remote_item(
            &format!("ext-{}", local.id),
            "Quarterly planning (rescheduled)",
            touched.updated_at + Duration::minutes(5),
        );
        let brand_new = remote_item(
            "ext-new",
            "Supplier call",
            Utc.with_ymd_and_hms(2025, 7, 3, 8, 0, 0).unwrap(),
        );
        provider.set_changes(RemoteChanges {
            items: vec![brand_new, remote_conflict],
            next_checkpoint: Some("chk-1".to_string()),
        });

        let outcome = h.service.pull_events(None).await.unwrap();

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].title, "Supplier call");
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].event_id, local.id);
        assert!(!outcome.conflicts[0].auto_resolvable);

        // Neither copy of the conflicted event was overwritten.
        let still_local = h.events.get_by_id(&local.id).unwrap();
        assert_eq!(still_local.title, "Quarterly planning (moved)");
        let row = h.ledger.get(&local.id, &integration.id).unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Pending);

        let refreshed = h.integrations.get_by_id(&integration.id).unwrap();
        assert_eq!(refreshed.sync_checkpoint.as_deref(), Some("chk-1"));
    }

    #[tokio::test]
    async fn pull_applies_remote_only_changes() {
        let h = harness();
        let (integration, provider) =
            add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);

        let local = add_event(&h, "Site walkthrough");
        h.service
            .push_event(&local, SyncOperation::Create)
            .await
            .unwrap();

        let row = h.ledger.get(&local.id, &integration.id).unwrap().unwrap();
        let after_sync = row.last_synced_at.unwrap() + Duration::minutes(10);
        provider.set_changes(RemoteChanges {
            items: vec![remote_item(
                &format!("ext-{}", local.id),
                "Site walkthrough (new venue)",
                after_sync,
            )],
            next_checkpoint: None,
        });

        let outcome = h.service.pull_events(None).await.unwrap();
        assert_eq!(outcome.conflicts.len(), 0);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(
            h.events.get_by_id(&local.id).unwrap().title,
            "Site walkthrough (new venue)"
        );
    }

    #[tokio::test]
    async fn pull_tombstone_cancels_local_event() {
        let h = harness();
        let (integration, provider) =
            add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);

        let local = add_event(&h, "Cancelled by client");
        h.service
            .push_event(&local, SyncOperation::Create)
            .await
            .unwrap();

        let mut tombstone = remote_item(
            &format!("ext-{}", local.id),
            "Cancelled by client",
            Utc::now(),
        );
        tombstone.deleted = true;
        provider.set_changes(RemoteChanges {
            items: vec![tombstone],
            next_checkpoint: None,
        });

        h.service.pull_events(None).await.unwrap();

        let event = h.events.get_by_id(&local.id).unwrap();
        assert_eq!(event.status, crate::events::EventStatus::Cancelled);
        assert!(h.ledger.get(&local.id, &integration.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_checkpoint_triggers_exactly_one_full_scan() {
        let h = harness();
        let (integration, provider) =
            add_integration(&h, ProviderKind::Google, SyncDirection::Bidirectional);
        h.integrations
            .update_checkpoint(&integration.id, Some("stale-token"))
            .unwrap();
        *provider.reject_checkpoint.lock().unwrap() = true;
        provider.set_changes(RemoteChanges {
            items: vec![],
            next_checkpoint: Some("fresh-token".to_string()),
        });

        h.service.pull_events(None).await.unwrap();

        let seen = provider.seen_checkpoints.lock().unwrap().clone();
        assert_eq!(seen, vec![Some("stale-token".to_string()), None]);

        let refreshed = h.integrations.get_by_id(&integration.id).unwrap();
        assert_eq!(refreshed.sync_checkpoint.as_deref(), Some("fresh-token"));
    }

    #[tokio::test]
    async fn queue_items_for_disconnected_integrations_are_abandoned() {
        let h = harness();
        let (integration, provider) =
            add_integration(&h, ProviderKind::Notion, SyncDirection::Bidirectional);
        provider.set_create_failure(Failure::Unavailable);

        let event = add_event(&h, "Orphaned work");
        h.service
            .push_event(&event, SyncOperation::Create)
            .await
            .unwrap();
        h.integrations.deactivate(&integration.id).unwrap();

        let results = h.service.process_queue().await.unwrap();
        assert!(results.is_empty());
        let abandoned = h.queue.list_by_status(QueueStatus::Abandoned).unwrap();
        assert_eq!(abandoned.len(), 1);
    }
}
