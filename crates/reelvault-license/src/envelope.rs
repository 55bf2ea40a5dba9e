//! Passphrase key envelope.
//!
//! Layout: `b"RVKE" | version:u8 | nonce(12) | ciphertext(32) | tag(16)`.
//!
//! The ciphertext is the vault master key sealed under a key-encryption key
//! derived from the passphrase, the device salt and
//! the license id. The header is bound as AAD.

use reelvault_core::aead::{self, Nonce, Sealed, Tag, NONCE_LEN, TAG_LEN};
use reelvault_core::wire::{WireReader, WireWriter};
use reelvault_core::{CoreError, SecretKey, KEY_LEN};

use crate::error::{LicenseError, Result};

pub const ENVELOPE_MAGIC: &[u8; 4] = b"RVKE";
pub const ENVELOPE_VERSION: u8 = 1;
pub const ENVELOPE_LEN: usize = 4 + 1 + NONCE_LEN + KEY_LEN + TAG_LEN;

/// Why an envelope failed to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeOpenError {
    /// Wrong passphrase, wrong device, or a modified file.
    WrongKey,
}

/// A sealed master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEnvelope {
    sealed: Sealed,
}

impl KeyEnvelope {
    fn header() -> [u8; 5] {
        let mut h = [0u8; 5];
        h[..4].copy_from_slice(ENVELOPE_MAGIC);
        h[4] = ENVELOPE_VERSION;
        h
    }

    /// Seal `master` under `kek`.
    pub fn seal(master: &SecretKey, kek: &SecretKey) -> Result<Self> {
        let sealed = aead::seal(kek, master.as_bytes(), &Self::header())?;
        Ok(Self { sealed })
    }

    /// Recover the master key. Every failure looks the same.
    pub fn open(&self, kek: &SecretKey) -> std::result::Result<SecretKey, EnvelopeOpenError> {
        let plain = aead::open(kek, &self.sealed, &Self::header())
            .map_err(|_| EnvelopeOpenError::WrongKey)?;
        SecretKey::from_slice(&plain).map_err(|_| EnvelopeOpenError::WrongKey)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.bytes(ENVELOPE_MAGIC)
            .u8(ENVELOPE_VERSION)
            .bytes(self.sealed.nonce.as_bytes())
            .bytes(&self.sealed.ciphertext)
            .bytes(self.sealed.tag.as_bytes());
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENVELOPE_LEN {
            return Err(LicenseError::MalformedEnvelope(format!(
                "expected {ENVELOPE_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let parse = || -> std::result::Result<Sealed, CoreError> {
            let mut r = WireReader::new(bytes);
            if r.take(4)? != ENVELOPE_MAGIC {
                return Err(CoreError::DecodingError("bad magic".into()));
            }
            let version = r.u8()?;
            if version != ENVELOPE_VERSION {
                return Err(CoreError::DecodingError(format!("version {version}")));
            }
            let nonce = Nonce::from_slice(r.take(NONCE_LEN)?)?;
            let ciphertext = r.take(KEY_LEN)?.to_vec();
            let tag = Tag::from_slice(r.take(TAG_LEN)?)?;
            r.finish()?;
            Ok(Sealed {
                nonce,
                ciphertext,
                tag,
            })
        };
        let sealed = parse().map_err(|e| LicenseError::MalformedEnvelope(e.to_string()))?;
        Ok(Self { sealed })
    }
}
