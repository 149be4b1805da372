use diesel::result::Error as DieselError;
use thiserror::Error;

/// Custom error type for calendar event operations
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<DieselError> for EventError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => EventError::NotFound("Record not found".to_string()),
            _ => EventError::DatabaseError(err.to_string()),
        }
    }
}

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventError>;
