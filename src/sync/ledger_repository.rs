use chrono::Utc;
use diesel::prelude::*;
use std::sync::Arc;

use crate::db::{get_connection, DbPool};
use crate::schema::event_sync;
use crate::schema::event_sync::dsl::*;
use crate::sync::{Result, SyncError};

use super::sync_model::{EventSync, EventSyncDB, LedgerUpsert, SyncStatus};

/// Repository for the sync ledger: one row per (event, integration) pair.
pub struct LedgerRepository {
    pool: Arc<DbPool>,
}

impl LedgerRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Inserts or updates the ledger row for a pair in one statement.
    ///
    /// The `ON CONFLICT` upsert is what serializes concurrent writers on
    /// the same pair, including a second orchestrator instance; callers
    /// hold no lock across this.
    pub fn upsert(&self, entry: LedgerUpsert) -> Result<EventSync> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let now = Utc::now();
        let row = EventSyncDB {
            event_id: entry.event_id,
            integration_id: entry.integration_id,
            provider: entry.provider.as_str().to_string(),
            external_id: entry.external_id,
            sync_status: entry.sync_status.as_str().to_string(),
            last_synced_at: if entry.sync_status == SyncStatus::Synced {
                Some(now)
            } else {
                None
            },
            last_attempt_at: Some(now),
            local_modified_at: entry.local_modified_at,
            remote_modified_at: entry.remote_modified_at,
            last_error: entry.error,
            retry_count: 0,
        };

        diesel::insert_into(event_sync::table)
            .values(&row)
            .on_conflict((event_id, integration_id))
            .do_update()
            .set((
                external_id.eq(row.external_id.clone()),
                sync_status.eq(row.sync_status.clone()),
                last_attempt_at.eq(row.last_attempt_at),
                local_modified_at.eq(row.local_modified_at),
                remote_modified_at.eq(row.remote_modified_at),
                last_error.eq(row.last_error.clone()),
            ))
            .execute(&mut conn)?;

        // last_synced_at only moves forward on success; an error attempt
        // must not erase the last good sync time.
        if entry.sync_status == SyncStatus::Synced {
            diesel::update(
                event_sync
                    .filter(event_id.eq(&row.event_id))
                    .filter(integration_id.eq(&row.integration_id)),
            )
            .set(last_synced_at.eq(Some(now)))
            .execute(&mut conn)?;
        }

        // Release the pooled connection before the final read; `get`
        // acquires its own and would deadlock on a single-connection pool.
        drop(conn);

        self.get(&row.event_id, &row.integration_id)?
            .ok_or_else(|| SyncError::DatabaseError("upserted ledger row vanished".to_string()))
    }

    /// Fetches the ledger row for a pair, if any
    pub fn get(&self, event_id_val: &str, integration_id_val: &str) -> Result<Option<EventSync>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let row = event_sync
            .filter(event_id.eq(event_id_val))
            .filter(integration_id.eq(integration_id_val))
            .first::<EventSyncDB>(&mut conn)
            .optional()?;

        row.map(EventSync::try_from).transpose()
    }

    /// Looks up the pair owning an external object id within an integration
    pub fn get_by_external_id(
        &self,
        integration_id_val: &str,
        external_id_val: &str,
    ) -> Result<Option<EventSync>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let row = event_sync
            .filter(integration_id.eq(integration_id_val))
            .filter(external_id.eq(external_id_val))
            .first::<EventSyncDB>(&mut conn)
            .optional()?;

        row.map(EventSync::try_from).transpose()
    }

    /// Removes the ledger row once the external object is confirmed gone.
    /// Deleting an absent row is a no-op, so cleanup stays idempotent.
    pub fn delete(&self, event_id_val: &str, integration_id_val: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        diesel::delete(
            event_sync
                .filter(event_id.eq(event_id_val))
                .filter(integration_id.eq(integration_id_val)),
        )
        .execute(&mut conn)?;

        Ok(())
    }

    /// Lists all ledger rows for one local event
    pub fn list_for_event(&self, event_id_val: &str) -> Result<Vec<EventSync>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let rows = event_sync
            .filter(event_id.eq(event_id_val))
            .load::<EventSyncDB>(&mut conn)?;

        rows.into_iter().map(EventSync::try_from).collect()
    }
}
