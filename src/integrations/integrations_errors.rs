use diesel::result::Error as DieselError;
use thiserror::Error;

/// Custom error type for integration-related operations
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<DieselError> for IntegrationError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => IntegrationError::NotFound("Record not found".to_string()),
            _ => IntegrationError::DatabaseError(err.to_string()),
        }
    }
}

/// Result type for integration operations
pub type Result<T> = std::result::Result<T, IntegrationError>;
