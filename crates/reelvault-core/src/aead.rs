//! One-shot ChaCha20-Poly1305.
//!
//! Used for small documents (manifest payload, ledger, key envelope). Large
//! media goes through [`crate::stream`] instead, which produces identical
//! bytes without holding the whole file in memory.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::SecretKey;
use crate::error::{CoreError, Result};

/// Nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// A 96-bit nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce(pub [u8; NONCE_LEN]);

impl Nonce {
    /// Generate a fresh random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from a slice that must be exactly 12 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; NONCE_LEN] = bytes
            .try_into()
            .map_err(|_| CoreError::DecodingError(format!("nonce length {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

/// A 128-bit authentication tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag(pub [u8; TAG_LEN]);

impl Tag {
    /// Create from a slice that must be exactly 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; TAG_LEN] = bytes
            .try_into()
            .map_err(|_| CoreError::DecodingError(format!("tag length {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }
}

/// Output of [`seal`]: detached nonce, ciphertext and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: Nonce,
    pub ciphertext: Vec<u8>,
    pub tag: Tag,
}

/// Encrypt `plaintext` under a fresh random nonce.
pub fn seal(key: &SecretKey, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    seal_with_nonce(key, Nonce::generate(), plaintext, aad)
}

/// Encrypt with a caller-chosen nonce. The caller guarantees uniqueness.
pub fn seal_with_nonce(key: &SecretKey, nonce: Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce.as_bytes().into(), aad, &mut buffer)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(Sealed {
        nonce,
        ciphertext: buffer,
        tag: Tag::from_slice(tag.as_slice())?,
    })
}

/// Decrypt and authenticate. On tag mismatch nothing is returned.
pub fn open(key: &SecretKey, sealed: &Sealed, aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CoreError::AuthenticationFailed)?;
    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            sealed.nonce.as_bytes().into(),
            aad,
            &mut buffer,
            sealed.tag.as_bytes().into(),
        )
        .map_err(|_| CoreError::AuthenticationFailed)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = SecretKey::generate();
        let sealed = seal(&key, b"catalog payload", b"hdr").unwrap();
        assert_eq!(sealed.ciphertext.len(), b"catalog payload".len());
        assert_eq!(open(&key, &sealed, b"hdr").unwrap(), b"catalog payload");
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = SecretKey::generate();
        let a = seal(&key, b"x", b"").unwrap();
        let b = seal(&key, b"x", b"").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&SecretKey::generate(), b"secret", b"").unwrap();
        assert!(matches!(
            open(&SecretKey::generate(), &sealed, b""),
            Err(CoreError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampering_fails() {
        let key = SecretKey::generate();
        let sealed = seal(&key, b"secret", b"aad").unwrap();

        let mut bad_tag = sealed.clone();
        bad_tag.tag.0[0] ^= 1;
        assert!(open(&key, &bad_tag, b"aad").is_err());

        let mut bad_ct = sealed.clone();
        bad_ct.ciphertext[0] ^= 1;
        assert!(open(&key, &bad_ct, b"aad").is_err());

        assert!(open(&key, &sealed, b"AAD").is_err());
    }
}
