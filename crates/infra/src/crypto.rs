//! Symmetric encryption for secrets stored at rest.
//!
//! Ciphertexts are `base64(nonce || aes-256-gcm(plaintext))` with a fresh
//! 96-bit nonce per call.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption key is empty")]
    EmptyKey,

    #[error("encryption failed")]
    Encrypt,

    /// Wrong key, tampered data or truncated input.
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// AES-256-GCM cipher for credential fields.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Accepts a base64-encoded 32-byte key; anything else is treated as a
    /// passphrase and hashed with SHA-256.
    pub fn from_key_material(material: &str) -> Result<Self, CryptoError> {
        let material = material.trim();
        if material.is_empty() {
            return Err(CryptoError::EmptyKey);
        }

        if let Ok(bytes) = STANDARD.decode(material) {
            if let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice()) {
                return Ok(Self::new(key));
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        Ok(Self::new(hasher.finalize().into()))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Decrypt(format!("base64: {e}")))?;
        if data.len() <= NONCE_LEN {
            return Err(CryptoError::Decrypt("input too short".into()));
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt("authentication failed".into()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(format!("utf-8: {e}")))
    }

    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, CryptoError> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    pub fn decrypt_opt(&self, encoded: Option<&str>) -> Result<Option<String>, CryptoError> {
        encoded.map(|e| self.decrypt(e)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let cipher = CredentialCipher::from_key_material("correct horse battery staple").unwrap();
        let token = "eyJhbGciOiJIUzI1NiJ9.payload.sig";
        let sealed = cipher.encrypt(token).unwrap();
        assert_ne!(sealed, token);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), token);
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let cipher = CredentialCipher::new([7u8; 32]);
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = CredentialCipher::new([1u8; 32]).encrypt("secret").unwrap();
        let err = CredentialCipher::new([2u8; 32]).decrypt(&sealed).unwrap_err();
        assert!(matches!(err, CryptoError::Decrypt(_)));
    }

    #[test]
    fn base64_key_is_used_verbatim() {
        let raw = [9u8; 32];
        let encoded = STANDARD.encode(raw);
        let sealed = CredentialCipher::from_key_material(&encoded).unwrap().encrypt("x").unwrap();
        assert_eq!(CredentialCipher::new(raw).decrypt(&sealed).unwrap(), "x");
    }

    #[test]
    fn rejects_garbage_and_empty_keys() {
        let cipher = CredentialCipher::new([3u8; 32]);
        assert!(cipher.decrypt("not base64!").is_err());
        assert!(cipher.decrypt(&STANDARD.encode([0u8; 8])).is_err());
        assert_eq!(CredentialCipher::from_key_material("  ").unwrap_err(), CryptoError::EmptyKey);
    }
}
