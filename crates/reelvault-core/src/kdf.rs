//! Key derivation.
//!
//! Two levels:
//!
//! - [`derive_master_key`]: memory-hard scrypt over a secret (license binding
//!   string or passphrase) and a salt. Slow by construction.
//! - [`derive_sub_key`]: HKDF-SHA256 extract-then-expand from a master key,
//!   scoped by a [`KeyPurpose`]. Sibling sub-keys are independent, so a leaked
//!   manifest key says nothing about the media key.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::crypto::{SecretKey, KEY_LEN};
use crate::error::{CoreError, Result};

/// Lowest scrypt cost accepted outside tests (N = 2^15).
pub const MIN_LOG_N: u8 = 15;

/// scrypt parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N.
    pub log_n: u8,
    /// Block size.
    pub r: u32,
    /// Parallelism.
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: MIN_LOG_N,
            r: 8,
            p: 1,
        }
    }
}

impl KdfParams {
    /// Create parameters, enforcing the minimum cost.
    pub fn new(log_n: u8, r: u32, p: u32) -> Result<Self> {
        if log_n < MIN_LOG_N {
            return Err(CoreError::InvalidKdfParams(format!(
                "log_n {log_n} below minimum {MIN_LOG_N}"
            )));
        }
        let params = Self { log_n, r, p };
        params.to_scrypt()?;
        Ok(params)
    }

    /// Cheap parameters for fixtures and unit tests. Never use for real vaults.
    pub fn insecure_for_tests() -> Self {
        Self {
            log_n: 4,
            r: 8,
            p: 1,
        }
    }

    fn to_scrypt(self) -> Result<scrypt::Params> {
        scrypt::Params::new(self.log_n, self.r, self.p, KEY_LEN)
            .map_err(|e| CoreError::InvalidKdfParams(e.to_string()))
    }
}

/// What a sub-key is for. Each purpose has its own HKDF info label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Decrypts the catalog manifest.
    Manifest,
    /// Root of per-file media keys.
    Media,
    /// A single media container, salted by the container header.
    MediaFile,
    /// Encrypts the usage ledger.
    Ledger,
    /// Wraps the vault master key under a passphrase.
    KeyEnvelope,
}

impl KeyPurpose {
    /// The HKDF info label.
    pub const fn label(self) -> &'static [u8] {
        match self {
            KeyPurpose::Manifest => b"reelvault/manifest/v1",
            KeyPurpose::Media => b"reelvault/media/v1",
            KeyPurpose::MediaFile => b"reelvault/media-file/v1",
            KeyPurpose::Ledger => b"reelvault/ledger/v1",
            KeyPurpose::KeyEnvelope => b"reelvault/key-envelope/v1",
        }
    }
}

/// Derive a 32-byte master key with scrypt.
///
/// Blocking and deliberately expensive. Async callers should run it on a
/// blocking thread.
pub fn derive_master_key(secret: &[u8], salt: &[u8], params: &KdfParams) -> Result<SecretKey> {
    let scrypt_params = params.to_scrypt()?;
    let mut out = [0u8; KEY_LEN];
    scrypt::scrypt(secret, salt, &scrypt_params, &mut out)
        .map_err(|e| CoreError::KeyDerivation(e.to_string()))?;
    let key = SecretKey::from_bytes(out);
    zeroize::Zeroize::zeroize(&mut out);
    Ok(key)
}

/// Derive a purpose-scoped sub-key with HKDF-SHA256.
///
/// `context` is the HKDF salt (a license id, a container salt). The purpose
/// label is the HKDF info.
pub fn derive_sub_key(master: &SecretKey, context: &[u8], purpose: KeyPurpose) -> Result<SecretKey> {
    let hk = Hkdf::<Sha256>::new(Some(context), master.as_bytes());
    let mut out = [0u8; KEY_LEN];
    hk.expand(purpose.label(), &mut out)
        .map_err(|e| CoreError::KeyDerivation(e.to_string()))?;
    let key = SecretKey::from_bytes(out);
    zeroize::Zeroize::zeroize(&mut out);
    Ok(key)
}
