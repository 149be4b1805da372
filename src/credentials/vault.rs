use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use thiserror::Error;

use crate::integrations::Integration;

const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

pub const ENCRYPTION_KEY_ENV: &str = "CLIENTDESK_ENCRYPTION_KEY";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Stored credential could not be decrypted: {0}")]
    Corrupt(String),
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

/// OAuth credentials decrypted for a single provider call.
/// Debug output is redacted so tokens never reach the logs.
#[derive(Clone)]
pub struct DecryptedCredentials {
    pub access: String,
    pub refresh: Option<String>,
}

impl std::fmt::Debug for DecryptedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedCredentials")
            .field("access", &"<redacted>")
            .field("refresh", &self.refresh.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Encrypts and decrypts stored OAuth credentials with AES-256-GCM.
///
/// The ciphertext layout is a random 12-byte nonce followed by the sealed
/// payload. Encrypt/decrypt are pure over the ciphertext and the
/// process-wide key; the backing store's row locking is the only locking
/// involved.
#[derive(Clone)]
pub struct CredentialVault {
    key: [u8; KEY_LEN],
}

impl CredentialVault {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    pub fn from_key_bytes(key: &[u8]) -> Result<Self, VaultError> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| {
            VaultError::InvalidKey(format!("key must be exactly {} bytes", KEY_LEN))
        })?;
        Ok(Self::new(key))
    }

    /// Builds a vault from the `CLIENTDESK_ENCRYPTION_KEY` environment
    /// variable, which must hold exactly 32 bytes.
    pub fn from_env() -> Result<Self, VaultError> {
        let raw = std::env::var(ENCRYPTION_KEY_ENV)
            .map_err(|_| VaultError::InvalidKey(format!("{} is not set", ENCRYPTION_KEY_ENV)))?;
        Self::from_key_bytes(raw.as_bytes())
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, VaultError> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Corrupt(format!("encryption failed: {}", e)))?;

        let mut result = nonce_bytes.to_vec();
        result.extend(ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, encrypted: &[u8]) -> Result<String, VaultError> {
        if encrypted.len() < NONCE_LEN {
            return Err(VaultError::Corrupt("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));

        let decrypted = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::Corrupt("authentication failed".to_string()))?;

        String::from_utf8(decrypted)
            .map_err(|_| VaultError::Corrupt("decrypted payload is not valid UTF-8".to_string()))
    }

    /// Decrypts the stored credentials of an integration.
    ///
    /// Failure here means the stored ciphertext is unreadable (corrupt or
    /// encrypted under another key) and the user has to reconnect the
    /// integration; it is unrelated to provider-side token expiry.
    pub fn credentials_for(
        &self,
        integration: &Integration,
    ) -> Result<DecryptedCredentials, VaultError> {
        let access = self.decrypt(&integration.access_credential)?;
        let refresh = integration
            .refresh_credential
            .as_deref()
            .map(|blob| self.decrypt(blob))
            .transpose()?;

        Ok(DecryptedCredentials { access, refresh })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> CredentialVault {
        CredentialVault::new([7u8; KEY_LEN])
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let vault = test_vault();
        let encrypted = vault.encrypt("ya29.access-token").unwrap();
        assert_ne!(encrypted.as_slice(), b"ya29.access-token".as_slice());
        assert_eq!(vault.decrypt(&encrypted).unwrap(), "ya29.access-token");
    }

    #[test]
    fn nonce_makes_ciphertexts_differ() {
        let vault = test_vault();
        let a = vault.encrypt("same-secret").unwrap();
        let b = vault.encrypt("same-secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_is_corrupt() {
        let vault = test_vault();
        let mut encrypted = vault.encrypt("secret").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xff;
        assert!(matches!(vault.decrypt(&encrypted), Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn wrong_key_is_corrupt_not_panic() {
        let vault = test_vault();
        let other = CredentialVault::new([9u8; KEY_LEN]);
        let encrypted = vault.encrypt("secret").unwrap();
        assert!(matches!(other.decrypt(&encrypted), Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn short_ciphertext_is_corrupt() {
        let vault = test_vault();
        assert!(matches!(vault.decrypt(&[1, 2, 3]), Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let creds = DecryptedCredentials {
            access: "top-secret".to_string(),
            refresh: Some("also-secret".to_string()),
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("top-secret"));
        assert!(!rendered.contains("also-secret"));
    }
}
