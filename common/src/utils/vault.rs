use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;

use crate::error::AppError;

/// AES-256-GCM nonce length in bytes, prepended to every ciphertext.
const NONCE_LEN: usize = 12;
/// Raw key length in bytes before base64 encoding.
const KEY_LEN: usize = 32;

/// Symmetric vault for per-tenant provider keys at rest.
///
/// One process-wide key is loaded once at startup. Decryption failures are
/// fatal for the request that needs the credential, never for the process.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Loads base64 key material from disk. Missing or malformed material
    /// aborts startup; a fabricated fallback key would defeat the feature.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let encoded = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!(
                "vault key material missing at {}: {e}",
                path.display()
            ))
        })?;
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| AppError::Config(format!("vault key material is not base64: {e}")))?;

        Self::from_key_bytes(&raw)
    }

    /// Builds a vault from raw key bytes. Used by `load` and by tests.
    pub fn from_key_bytes(raw: &[u8]) -> Result<Self, AppError> {
        if raw.len() != KEY_LEN {
            return Err(AppError::Config(format!(
                "vault key material must be {KEY_LEN} bytes, got {}",
                raw.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(raw);

        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Emits fresh base64 key material for operator bootstrap.
    pub fn generate_key_material() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        STANDARD.encode(key)
    }

    /// Encrypts a plaintext credential into `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AppError::Config(format!("credential encryption failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(payload))
    }

    /// Decrypts vault ciphertext. Any decode, authentication, or UTF-8
    /// failure surfaces as `CorruptCredential`.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, AppError> {
        let payload = STANDARD
            .decode(ciphertext)
            .map_err(|e| AppError::CorruptCredential(format!("not base64: {e}")))?;

        if payload.len() <= NONCE_LEN {
            return Err(AppError::CorruptCredential(
                "ciphertext shorter than nonce".into(),
            ));
        }

        let (nonce_bytes, encrypted) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, encrypted)
            .map_err(|_| AppError::CorruptCredential("authentication failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::CorruptCredential(format!("not utf-8: {e}")))
    }
}
