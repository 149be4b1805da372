use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::sync::Arc;

use crate::db::{get_connection, DbPool};
use crate::integrations::{IntegrationError, Result};
use crate::schema::calendar_integrations;
use crate::schema::calendar_integrations::dsl::*;

use super::integrations_model::{Integration, IntegrationDB, NewIntegration};

/// Repository for managing calendar integration records
pub struct IntegrationRepository {
    pool: Arc<DbPool>,
}

impl IntegrationRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Creates a new integration after a completed provider authorization
    pub fn create(&self, new_integration: NewIntegration) -> Result<Integration> {
        new_integration.validate()?;

        let now = Utc::now();
        let integration_db = IntegrationDB {
            id: uuid::Uuid::new_v4().to_string(),
            provider: new_integration.provider.as_str().to_string(),
            access_credential: new_integration.access_credential,
            refresh_credential: new_integration.refresh_credential,
            credential_expires_at: new_integration.credential_expires_at,
            external_calendar_id: new_integration.external_calendar_id,
            sync_direction: new_integration.sync_direction.as_str().to_string(),
            is_active: true,
            sync_checkpoint: None,
            last_synced_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let mut conn = get_connection(&self.pool)
            .map_err(|e| IntegrationError::DatabaseError(e.to_string()))?;

        diesel::insert_into(calendar_integrations::table)
            .values(&integration_db)
            .execute(&mut conn)?;

        Integration::try_from(integration_db)
    }

    /// Retrieves an integration by its ID
    pub fn get_by_id(&self, integration_id: &str) -> Result<Integration> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| IntegrationError::DatabaseError(e.to_string()))?;

        let integration = calendar_integrations
            .find(integration_id)
            .first::<IntegrationDB>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => IntegrationError::NotFound(format!(
                    "Integration with id {} not found",
                    integration_id
                )),
                _ => IntegrationError::DatabaseError(e.to_string()),
            })?;

        Integration::try_from(integration)
    }

    /// Lists all active integrations
    pub fn list_active(&self) -> Result<Vec<Integration>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| IntegrationError::DatabaseError(e.to_string()))?;

        let rows = calendar_integrations
            .filter(is_active.eq(true))
            .order(created_at.asc())
            .load::<IntegrationDB>(&mut conn)
            .map_err(|e| IntegrationError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(Integration::try_from).collect()
    }

    /// Overwrites the stored credentials after a token refresh.
    /// Values are vault-encrypted blobs; the write is a single statement.
    pub fn update_credentials(
        &self,
        integration_id: &str,
        encrypted_access: Vec<u8>,
        encrypted_refresh: Option<Vec<u8>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| IntegrationError::DatabaseError(e.to_string()))?;

        let affected = diesel::update(calendar_integrations.find(integration_id))
            .set((
                access_credential.eq(encrypted_access),
                refresh_credential.eq(encrypted_refresh),
                credential_expires_at.eq(expires_at),
                updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        if affected == 0 {
            return Err(IntegrationError::NotFound(format!(
                "Integration with id {} not found",
                integration_id
            )));
        }

        Ok(())
    }

    /// Stores a new incremental-sync checkpoint token
    pub fn update_checkpoint(&self, integration_id: &str, checkpoint: Option<&str>) -> Result<()> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| IntegrationError::DatabaseError(e.to_string()))?;

        diesel::update(calendar_integrations.find(integration_id))
            .set((sync_checkpoint.eq(checkpoint), updated_at.eq(Utc::now())))
            .execute(&mut conn)?;

        Ok(())
    }

    /// Drops a checkpoint the provider rejected, forcing a full scan next pull
    pub fn clear_checkpoint(&self, integration_id: &str) -> Result<()> {
        self.update_checkpoint(integration_id, None)
    }

    /// Records the outcome of a sync attempt on the integration row
    pub fn record_sync_outcome(
        &self,
        integration_id: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| IntegrationError::DatabaseError(e.to_string()))?;

        let now = Utc::now();
        match error_message {
            None => {
                diesel::update(calendar_integrations.find(integration_id))
                    .set((
                        last_synced_at.eq(Some(now)),
                        last_error.eq(None::<String>),
                        updated_at.eq(now),
                    ))
                    .execute(&mut conn)?;
            }
            Some(message) => {
                diesel::update(calendar_integrations.find(integration_id))
                    .set((last_error.eq(Some(message)), updated_at.eq(now)))
                    .execute(&mut conn)?;
            }
        }

        Ok(())
    }

    /// Deactivates an integration on disconnect; history is retained
    pub fn deactivate(&self, integration_id: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| IntegrationError::DatabaseError(e.to_string()))?;

        let affected = diesel::update(calendar_integrations.find(integration_id))
            .set((is_active.eq(false), updated_at.eq(Utc::now())))
            .execute(&mut conn)?;

        if affected == 0 {
            return Err(IntegrationError::NotFound(format!(
                "Integration with id {} not found",
                integration_id
            )));
        }

        Ok(())
    }
}
