pub mod db;

pub mod credentials;
pub mod events;
pub mod integrations;
pub mod providers;
pub mod sync;

pub mod errors;
pub mod schema;

pub use errors::{Error, Result};
