use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use super::calendar_provider::{CalendarProvider, RefreshedCredential, TokenPersister};
use super::google_provider::GoogleCalendarProvider;
use super::notion_provider::NotionCalendarProvider;
use crate::credentials::CredentialVault;
use crate::integrations::{Integration, IntegrationRepository, ProviderKind};
use crate::sync::SyncError;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Persists refreshed provider credentials as vault-encrypted blobs on the
/// integration row. Adapters await this before using a new token, so the
/// stored credential is never behind the one in flight.
pub struct VaultTokenPersister {
    vault: Arc<CredentialVault>,
    integrations: Arc<IntegrationRepository>,
}

impl VaultTokenPersister {
    pub fn new(vault: Arc<CredentialVault>, integrations: Arc<IntegrationRepository>) -> Self {
        Self { vault, integrations }
    }
}

#[async_trait]
impl TokenPersister for VaultTokenPersister {
    async fn persist(
        &self,
        integration_id: &str,
        credential: &RefreshedCredential,
    ) -> Result<(), SyncError> {
        let encrypted_access = self.vault.encrypt(&credential.access)?;
        let encrypted_refresh = credential
            .refresh
            .as_deref()
            .map(|token| self.vault.encrypt(token))
            .transpose()?;

        debug!("Persisting refreshed credentials for integration {}", integration_id);
        self.integrations.update_credentials(
            integration_id,
            encrypted_access,
            encrypted_refresh,
            credential.expires_at,
        )?;
        Ok(())
    }
}

/// Seam between the orchestrator and adapter construction
pub trait AdapterFactory: Send + Sync {
    fn adapter_for(&self, integration: &Integration)
        -> Result<Arc<dyn CalendarProvider>, SyncError>;
}

/// Builds the provider adapter for an integration.
///
/// Selection is a closed match on `ProviderKind`; all adapters share one
/// pooled HTTP client with a request timeout, so a hung provider call
/// surfaces as a retryable `ProviderUnavailable` instead of blocking a
/// sync cycle forever.
pub struct ProviderRegistry {
    client: Client,
    vault: Arc<CredentialVault>,
    persister: Arc<dyn TokenPersister>,
}

impl ProviderRegistry {
    pub fn new(
        vault: Arc<CredentialVault>,
        persister: Arc<dyn TokenPersister>,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SyncError::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            vault,
            persister,
        })
    }
}

impl AdapterFactory for ProviderRegistry {
    fn adapter_for(
        &self,
        integration: &Integration,
    ) -> Result<Arc<dyn CalendarProvider>, SyncError> {
        // Decryption failure here is CredentialCorrupt: terminal and
        // user-actionable, never queued for retry.
        let credentials = self.vault.credentials_for(integration)?;

        let adapter: Arc<dyn CalendarProvider> = match integration.provider {
            ProviderKind::Google => Arc::new(GoogleCalendarProvider::new(
                self.client.clone(),
                integration.id.clone(),
                integration.external_calendar_id.clone(),
                credentials.access,
                credentials.refresh,
                self.persister.clone(),
            )),
            ProviderKind::Notion => Arc::new(NotionCalendarProvider::new(
                self.client.clone(),
                integration.id.clone(),
                integration.external_calendar_id.clone(),
                credentials.access,
                credentials.refresh,
                self.persister.clone(),
            )),
        };

        Ok(adapter)
    }
}
