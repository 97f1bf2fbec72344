//! Payload encryption for remote objects.
//!
//! Blobs are base64 text of `nonce (12 bytes) || AES-256-GCM ciphertext`,
//! keyed by the SHA-256 digest of the user's passphrase.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use histsync_core::{Error, Result};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String>;

    fn decrypt(&self, blob: &str) -> Result<Vec<u8>>;

    /// False when no key is configured; callers then store plain JSON.
    fn has_key(&self) -> bool;
}

/// Cipher used when encryption is off. Refuses to encrypt or decrypt.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCipher;

impl Cipher for NoCipher {
    fn encrypt(&self, _plaintext: &[u8]) -> Result<String> {
        Err(Error::Encryption("no encryption key configured".to_string()))
    }

    fn decrypt(&self, _blob: &str) -> Result<Vec<u8>> {
        Err(Error::Encryption("no encryption key configured".to_string()))
    }

    fn has_key(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct AesGcmCipher {
    key: [u8; 32],
}

impl AesGcmCipher {
    pub fn new(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = Aes256Gcm::new(&self.key.into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Encryption(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(out))
    }

    fn decrypt(&self, blob: &str) -> Result<Vec<u8>> {
        let raw = general_purpose::STANDARD
            .decode(blob.trim())
            .map_err(|e| Error::Encryption(format!("not a base64 blob: {}", e)))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::Encryption("ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key.into());
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Encryption("decryption failed (wrong key or corrupt data)".to_string()))
    }

    fn has_key(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = AesGcmCipher::new("correct horse battery");
        let blob = cipher.encrypt(b"[{\"url\":\"https://a.com\"}]").unwrap();
        assert!(!blob.contains("a.com"));
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"[{\"url\":\"https://a.com\"}]");
    }

    #[test]
    fn test_nonce_is_random() {
        let cipher = AesGcmCipher::new("k");
        assert_ne!(cipher.encrypt(b"same").unwrap(), cipher.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = AesGcmCipher::new("one").encrypt(b"data").unwrap();
        assert!(matches!(
            AesGcmCipher::new("two").decrypt(&blob),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_garbage_input() {
        let cipher = AesGcmCipher::new("k");
        assert!(cipher.decrypt("[1,2,3]").is_err());
        assert!(cipher.decrypt("AAAA").is_err());
    }

    #[test]
    fn test_no_cipher() {
        assert!(!NoCipher.has_key());
        assert!(NoCipher.encrypt(b"x").is_err());
    }
}
