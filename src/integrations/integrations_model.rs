use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::integrations_errors::IntegrationError;

pub const PROVIDER_GOOGLE: &str = "google";
pub const PROVIDER_NOTION: &str = "notion";

/// The closed set of supported external calendar systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Notion,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => PROVIDER_GOOGLE,
            ProviderKind::Notion => PROVIDER_NOTION,
        }
    }
}

impl FromStr for ProviderKind {
    type Err = IntegrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            PROVIDER_GOOGLE => Ok(ProviderKind::Google),
            PROVIDER_NOTION => Ok(ProviderKind::Notion),
            other => Err(IntegrationError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    ImportOnly,
    ExportOnly,
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::ImportOnly => "import-only",
            SyncDirection::ExportOnly => "export-only",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }

    pub fn allows_export(&self) -> bool {
        matches!(self, SyncDirection::ExportOnly | SyncDirection::Bidirectional)
    }

    pub fn allows_import(&self) -> bool {
        matches!(self, SyncDirection::ImportOnly | SyncDirection::Bidirectional)
    }
}

impl From<&str> for SyncDirection {
    fn from(s: &str) -> Self {
        match s {
            "import-only" => SyncDirection::ImportOnly,
            "export-only" => SyncDirection::ExportOnly,
            _ => SyncDirection::Bidirectional,
        }
    }
}

/// Domain model for one configured connection to an external calendar.
///
/// Credentials are stored encrypted; only the vault can read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: String,
    pub provider: ProviderKind,
    #[serde(skip)]
    pub access_credential: Vec<u8>,
    #[serde(skip)]
    pub refresh_credential: Option<Vec<u8>>,
    pub credential_expires_at: Option<DateTime<Utc>>,
    pub external_calendar_id: String,
    pub sync_direction: SyncDirection,
    pub is_active: bool,
    pub sync_checkpoint: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input model for creating an integration after the OAuth flow completed.
/// Credential fields carry vault-encrypted blobs, never plaintext.
#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub provider: ProviderKind,
    pub access_credential: Vec<u8>,
    pub refresh_credential: Option<Vec<u8>>,
    pub credential_expires_at: Option<DateTime<Utc>>,
    pub external_calendar_id: String,
    pub sync_direction: SyncDirection,
}

impl NewIntegration {
    pub fn validate(&self) -> Result<(), IntegrationError> {
        if self.access_credential.is_empty() {
            return Err(IntegrationError::InvalidData(
                "access credential must not be empty".to_string(),
            ));
        }
        if self.external_calendar_id.trim().is_empty() {
            return Err(IntegrationError::InvalidData(
                "external calendar id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Database model for calendar integrations
#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::calendar_integrations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IntegrationDB {
    pub id: String,
    pub provider: String,
    pub access_credential: Vec<u8>,
    pub refresh_credential: Option<Vec<u8>>,
    pub credential_expires_at: Option<DateTime<Utc>>,
    pub external_calendar_id: String,
    pub sync_direction: String,
    pub is_active: bool,
    pub sync_checkpoint: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<IntegrationDB> for Integration {
    type Error = IntegrationError;

    fn try_from(db: IntegrationDB) -> Result<Self, Self::Error> {
        Ok(Integration {
            provider: ProviderKind::from_str(&db.provider)?,
            id: db.id,
            access_credential: db.access_credential,
            refresh_credential: db.refresh_credential,
            credential_expires_at: db.credential_expires_at,
            external_calendar_id: db.external_calendar_id,
            sync_direction: SyncDirection::from(db.sync_direction.as_str()),
            is_active: db.is_active,
            sync_checkpoint: db.sync_checkpoint,
            last_synced_at: db.last_synced_at,
            last_error: db.last_error,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

impl From<Integration> for IntegrationDB {
    fn from(domain: Integration) -> Self {
        IntegrationDB {
            id: domain.id,
            provider: domain.provider.as_str().to_string(),
            access_credential: domain.access_credential,
            refresh_credential: domain.refresh_credential,
            credential_expires_at: domain.credential_expires_at,
            external_calendar_id: domain.external_calendar_id,
            sync_direction: domain.sync_direction.as_str().to_string(),
            is_active: domain.is_active,
            sync_checkpoint: domain.sync_checkpoint,
            last_synced_at: domain.last_synced_at,
            last_error: domain.last_error,
            created_at: domain.created_at,
            updated_at: domain.updated_at,
        }
    }
}
