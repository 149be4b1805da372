// Module declarations
pub(crate) mod integrations_errors;
pub(crate) mod integrations_model;
pub(crate) mod integrations_repository;

// Re-export the public interface
pub use integrations_model::{
    Integration, IntegrationDB, NewIntegration, ProviderKind, SyncDirection, PROVIDER_GOOGLE,
    PROVIDER_NOTION,
};
pub use integrations_repository::IntegrationRepository;

// Re-export error types for convenience
pub use integrations_errors::{IntegrationError, Result};
