// Module declarations
pub(crate) mod calendar_provider;
pub(crate) mod google_provider;
pub(crate) mod models;
pub(crate) mod notion_provider;
pub(crate) mod provider_registry;

#[cfg(test)]
pub(crate) mod http_stub;

// Re-export the public interface
pub use calendar_provider::{CalendarProvider, RefreshedCredential, TokenPersister};
pub use google_provider::GoogleCalendarProvider;
pub use models::{RemoteChanges, RemoteEvent};
pub use notion_provider::NotionCalendarProvider;
pub use provider_registry::{AdapterFactory, ProviderRegistry, VaultTokenPersister};
