// Module declarations
pub(crate) mod vault;

// Re-export the public interface
pub use vault::{CredentialVault, DecryptedCredentials, VaultError, ENCRYPTION_KEY_ENV, KEY_LEN};
