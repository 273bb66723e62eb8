//! Encryption at rest for stored CRM credentials, plus random token and
//! password generation.

use std::fmt;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

use ad_domain::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher.  Output is `base64(nonce || ciphertext || tag)`.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialCipher(..)")
    }
}

impl CredentialCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Parse a 32-byte key given as 64 hex characters or standard base64.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let bytes = if encoded.len() == 64 && encoded.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(encoded).map_err(|e| Error::Config(format!("credentials key: {e}")))?
        } else {
            STANDARD
                .decode(encoded)
                .map_err(|e| Error::Config(format!("credentials key: {e}")))?
        };
        let key: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::Config(format!("credentials key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::new(key))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("AES-GCM encrypt: {e}")))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let combined = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("base64 decode: {e}")))?;
        if combined.len() <= NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| Error::Crypto(format!("AES-GCM decrypt: {e}")))
    }
}

/// URL-safe random token carrying `bytes` bytes of entropy.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789-_!@#%";

/// Random password drawn from an unambiguous charset.
pub fn generate_password(len: usize) -> String {
    // Largest multiple of the charset size that fits in a byte; rejecting
    // bytes above it keeps the distribution uniform.
    let zone = 256 - (256 % PASSWORD_CHARSET.len());
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];
    while out.len() < len {
        OsRng.fill_bytes(&mut buf);
        for &b in &buf {
            if (b as usize) < zone && out.len() < len {
                out.push(PASSWORD_CHARSET[b as usize % PASSWORD_CHARSET.len()] as char);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_with_same_key() {
        let cipher = CredentialCipher::new([7u8; 32]);
        let sealed = cipher.encrypt(b"crm-secret").unwrap();
        assert_ne!(sealed, "crm-secret");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"crm-secret");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = CredentialCipher::new([1u8; 32]).encrypt(b"x").unwrap();
        assert!(CredentialCipher::new([2u8; 32]).decrypt(&sealed).is_err());
    }

    #[test]
    fn nonce_differs_per_call() {
        let cipher = CredentialCipher::new([3u8; 32]);
        assert_ne!(cipher.encrypt(b"x").unwrap(), cipher.encrypt(b"x").unwrap());
    }

    #[test]
    fn key_parses_from_hex_and_base64() {
        let hex_key = "00".repeat(32);
        assert!(CredentialCipher::from_encoded(&hex_key).is_ok());
        let b64 = STANDARD.encode([9u8; 32]);
        assert!(CredentialCipher::from_encoded(&b64).is_ok());
        let short = STANDARD.encode([9u8; 16]);
        assert!(matches!(
            CredentialCipher::from_encoded(&short),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn generated_passwords_have_requested_length() {
        let pw = generate_password(20);
        assert_eq!(pw.chars().count(), 20);
        assert!(pw.bytes().all(|b| PASSWORD_CHARSET.contains(&b)));
        assert_ne!(generate_password(20), pw);
    }

    #[test]
    fn tokens_are_url_safe() {
        let t = random_token(32);
        assert_eq!(t.len(), 43);
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
