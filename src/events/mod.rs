// Module declarations
pub(crate) mod events_errors;
pub(crate) mod events_model;
pub(crate) mod events_repository;

// Re-export the public interface
pub use events_model::{
    CalendarEventDB, EventKind, EventStatus, NewEvent, UnifiedEvent,
};
pub use events_repository::EventRepository;

// Re-export error types for convenience
pub use events_errors::{EventError, Result};
