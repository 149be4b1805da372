use diesel::result::Error as DieselError;
use thiserror::Error;

use crate::credentials::VaultError;
use crate::events::EventError;
use crate::integrations::IntegrationError;

/// Error taxonomy for sync operations.
///
/// The variants fall into three groups: terminal, user-actionable failures
/// (`CredentialCorrupt`, `CredentialExpired`, `ProviderRejected`),
/// retryable failures that belong on the retry queue
/// (`ProviderUnavailable`), and control-flow signals the orchestrator
/// handles itself (`AlreadyDeleted`, `InvalidCheckpoint`).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Stored credential could not be decrypted, reconnect this integration: {0}")]
    CredentialCorrupt(String),

    #[error("Provider rejected the credential and refresh failed, reconnect this integration: {0}")]
    CredentialExpired(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("Object no longer exists on the provider")]
    AlreadyDeleted,

    #[error("Incremental sync checkpoint was rejected by the provider")]
    InvalidCheckpoint,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SyncError {
    /// Whether a later retry of the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::ProviderUnavailable(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            SyncError::ProviderUnavailable(e.to_string())
        } else if e.is_decode() {
            SyncError::ProviderRejected(format!("malformed provider response: {}", e))
        } else {
            SyncError::ProviderUnavailable(e.to_string())
        }
    }
}

impl From<VaultError> for SyncError {
    fn from(e: VaultError) -> Self {
        SyncError::CredentialCorrupt(e.to_string())
    }
}

impl From<DieselError> for SyncError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => SyncError::NotFound("Record not found".to_string()),
            _ => SyncError::DatabaseError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::SerializationError(e.to_string())
    }
}

impl From<EventError> for SyncError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::NotFound(msg) => SyncError::NotFound(msg),
            EventError::InvalidData(msg) => SyncError::InvalidData(msg),
            EventError::DatabaseError(msg) => SyncError::DatabaseError(msg),
        }
    }
}

impl From<IntegrationError> for SyncError {
    fn from(e: IntegrationError) -> Self {
        match e {
            IntegrationError::NotFound(msg) => SyncError::NotFound(msg),
            IntegrationError::UnsupportedProvider(msg) => {
                SyncError::InvalidData(format!("unsupported provider: {}", msg))
            }
            IntegrationError::InvalidData(msg) => SyncError::InvalidData(msg),
            IntegrationError::DatabaseError(msg) => SyncError::DatabaseError(msg),
        }
    }
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(SyncError::ProviderUnavailable("timeout".to_string()).is_retryable());
        assert!(!SyncError::ProviderRejected("bad field".to_string()).is_retryable());
        assert!(!SyncError::CredentialCorrupt("bad key".to_string()).is_retryable());
        assert!(!SyncError::CredentialExpired("no refresh".to_string()).is_retryable());
        assert!(!SyncError::AlreadyDeleted.is_retryable());
        assert!(!SyncError::InvalidCheckpoint.is_retryable());
    }
}
