//! AES-256-GCM sealing for tokens at rest.
//!
//! A sealed token is `base64(nonce || ciphertext)`, so each column holds one
//! self-contained value. Every seal draws a fresh random nonce.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Symmetric cipher holding the master key in memory only.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Build from a base64-encoded 32-byte master key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .context("Failed to decode base64 encryption key")?;

        if key_bytes.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Fails on a wrong key, truncated input, or any tampering.
    pub fn open(&self, sealed: &str) -> Result<String> {
        let bytes = BASE64.decode(sealed).context("Failed to decode sealed token")?;
        if bytes.len() <= NONCE_SIZE {
            return Err(anyhow!("Sealed token too short ({} bytes)", bytes.len()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted token is not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(byte: u8) -> TokenCipher {
        TokenCipher::from_base64_key(&BASE64.encode([byte; 32])).unwrap()
    }

    #[test]
    fn test_key_validation() {
        assert!(TokenCipher::from_base64_key(&BASE64.encode([0u8; 32])).is_ok());
        assert!(TokenCipher::from_base64_key(&BASE64.encode([0u8; 16])).is_err());
        assert!(TokenCipher::from_base64_key(&BASE64.encode([0u8; 64])).is_err());
        assert!(TokenCipher::from_base64_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_seal_open() {
        let c = cipher(0);
        let sealed = c.seal("xoxb-secret").unwrap();
        assert!(!sealed.contains("xoxb-secret"));
        assert_eq!(c.open(&sealed).unwrap(), "xoxb-secret");
    }

    #[test]
    fn test_same_plaintext_seals_differently() {
        let c = cipher(0);
        let a = c.seal("same").unwrap();
        let b = c.seal("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher(0).seal("secret").unwrap();
        assert!(cipher(1).open(&sealed).is_err());
    }

    #[test]
    fn test_tampered_or_truncated_fails() {
        let c = cipher(0);
        let sealed = c.seal("secret").unwrap();

        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(c.open(&BASE64.encode(&bytes)).is_err());

        assert!(c.open(&BASE64.encode([0u8; 8])).is_err());
    }
}
