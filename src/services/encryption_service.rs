///! AES-256-GCM sealing of ERP credentials at rest
///!
///! Sealed format: base64(nonce(12) || ciphertext || tag(16)).
///! A fresh random nonce is drawn for every seal.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key: expected 32 bytes, base64 encoded")]
    InvalidKey,

    #[error("Invalid ciphertext format")]
    InvalidFormat,
}

pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Thread-safe, cheap to clone
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    pub fn new(base64_key: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(base64_key.trim())
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let combined = BASE64
            .decode(sealed.trim())
            .map_err(|_| EncryptionError::InvalidFormat)?;

        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(EncryptionError::InvalidFormat);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|_| EncryptionError::DecryptionFailed("Invalid UTF-8".to_string()))
    }

    /// Random 256-bit key, base64 encoded for ENCRYPTION_KEY
    pub fn generate_key() -> String {
        let mut key_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        BASE64.encode(key_bytes)
    }

    /// Stable, non-reversible lookup key (hex SHA-256)
    pub fn hash_for_lookup(plaintext: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(plaintext.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
