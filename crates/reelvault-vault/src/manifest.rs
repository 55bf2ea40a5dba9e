//! The signed, encrypted catalog manifest.
//!
//! ## Layout (little-endian)
//!
//! ```text
//! b"RVMF"
//! version:u16 | kdf_id:u16
//! salt_len:u32  | salt
//! nonce_len:u32 | nonce
//! ct_len:u32    | ciphertext
//! tag_len:u32   | tag
//! sig_algo:u16  | sig_len:u32 | signature
//! ```
//!
//! The signature covers every byte after the magic up to, not including,
//! `sig_algo`. The payload key is `HKDF(manifest key, salt, manifest label)`.

use chrono::{DateTime, Utc};
use reelvault_core::aead::{self, Nonce, Sealed, Tag, NONCE_LEN, TAG_LEN};
use reelvault_core::wire::{WireReader, WireWriter};
use reelvault_core::{derive_sub_key, Ed25519PublicKey, Ed25519Signature, Keypair, KeyPurpose, SecretKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};

pub const MANIFEST_MAGIC: &[u8; 4] = b"RVMF";
pub const MANIFEST_VERSION: u16 = 1;
/// HKDF-SHA256 payload key.
pub const KDF_HKDF_SHA256: u16 = 1;
pub const SIG_ALGO_ED25519: u16 = 1;

const SALT_LEN: usize = 16;
const MAX_SALT_LEN: usize = 64;
const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMeta {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Hex SHA-256 of the plaintext.
    pub content_hash: String,
    /// Plaintext size in bytes.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Original file extension, without the dot.
    pub extension: String,
}

/// Decrypted manifest payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPayload {
    pub version: u16,
    pub sealed_at: DateTime<Utc>,
    pub items: Vec<MediaMeta>,
}

/// A parsed but not yet verified manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    kdf_id: u16,
    salt: Vec<u8>,
    sealed: Sealed,
    signed_range: std::ops::Range<usize>,
    signature: Ed25519Signature,
}

impl Manifest {
    /// Parse the binary layout. Does not verify or decrypt.
    pub fn parse(bytes: &[u8]) -> CatalogResult<Self> {
        let mut r = WireReader::new(bytes);
        if r.take(4)? != MANIFEST_MAGIC {
            return Err(CatalogError::Malformed("bad magic".into()));
        }
        let version = r.u16_le()?;
        if version != MANIFEST_VERSION {
            return Err(CatalogError::Malformed(format!("unsupported version {version}")));
        }
        let kdf_id = r.u16_le()?;
        if kdf_id != KDF_HKDF_SHA256 {
            return Err(CatalogError::Malformed(format!("unsupported kdf {kdf_id}")));
        }
        let salt = r.len_prefixed("salt", MAX_SALT_LEN)?.to_vec();
        if salt.is_empty() {
            return Err(CatalogError::Malformed("empty salt".into()));
        }
        let nonce = Nonce::from_slice(r.len_prefixed("nonce", NONCE_LEN)?)?;
        let ciphertext = r.len_prefixed("ciphertext", MAX_PAYLOAD_LEN)?.to_vec();
        let tag = Tag::from_slice(r.len_prefixed("tag", TAG_LEN)?)?;

        let signed_end = r.position();
        let sig_algo = r.u16_le()?;
        if sig_algo != SIG_ALGO_ED25519 {
            return Err(CatalogError::Malformed(format!("unsupported signature algorithm {sig_algo}")));
        }
        let signature = Ed25519Signature::from_slice(r.len_prefixed("signature", 64)?)?;
        r.finish()?;

        Ok(Self {
            kdf_id,
            salt,
            sealed: Sealed {
                nonce,
                ciphertext,
                tag,
            },
            signed_range: 4..signed_end,
            signature,
        })
    }

    /// Verify the signature over the original bytes this manifest was parsed from.
    pub fn verify(&self, bytes: &[u8], key: &Ed25519PublicKey) -> CatalogResult<()> {
        let signed = bytes
            .get(self.signed_range.clone())
            .ok_or_else(|| CatalogError::Malformed("signed range out of bounds".into()))?;
        key.verify(signed, &self.signature)
            .map_err(|_| CatalogError::SignatureInvalid)
    }

    /// Decrypt and parse the payload.
    pub fn decrypt(&self, manifest_key: &SecretKey) -> CatalogResult<ManifestPayload> {
        debug_assert_eq!(self.kdf_id, KDF_HKDF_SHA256);
        let payload_key = derive_sub_key(manifest_key, &self.salt, KeyPurpose::Manifest)?;
        let plain = aead::open(&payload_key, &self.sealed, &[])
            .map_err(|_| CatalogError::DecryptionFailed)?;
        serde_json::from_slice(&plain).map_err(|e| CatalogError::Malformed(e.to_string()))
    }

    /// Issuer side: encrypt and sign a payload.
    pub fn seal(payload: &ManifestPayload, manifest_key: &SecretKey, signer: &Keypair) -> CatalogResult<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let payload_key = derive_sub_key(manifest_key, &salt, KeyPurpose::Manifest)?;
        let json = serde_json::to_vec(payload).map_err(|e| CatalogError::Malformed(e.to_string()))?;
        let sealed = aead::seal(&payload_key, &json, &[])?;

        let mut w = WireWriter::new();
        w.bytes(MANIFEST_MAGIC)
            .u16_le(MANIFEST_VERSION)
            .u16_le(KDF_HKDF_SHA256);
        w.len_prefixed(&salt)?
            .len_prefixed(sealed.nonce.as_bytes())?
            .len_prefixed(&sealed.ciphertext)?
            .len_prefixed(sealed.tag.as_bytes())?;
        let mut bytes = w.into_bytes();

        let signature = signer.sign(&bytes[4..]);
        let mut tail = WireWriter::new();
        tail.u16_le(SIG_ALGO_ED25519);
        tail.len_prefixed(signature.as_bytes())?;
        bytes.extend_from_slice(&tail.into_bytes());
        Ok(bytes)
    }
}
