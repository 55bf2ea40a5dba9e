//! Error types for the vault crate.

use reelvault_core::CoreError;
use thiserror::Error;

/// Catalog errors. Any of them leaves the catalog empty.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog is locked")]
    Locked,

    #[error("manifest not found")]
    NotFound,

    #[error("malformed manifest: {0}")]
    Malformed(String),

    /// Carries no detail on purpose.
    #[error("manifest signature invalid")]
    SignatureInvalid,

    #[error("manifest decryption failed")]
    DecryptionFailed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for CatalogError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => CatalogError::SignatureInvalid,
            CoreError::AuthenticationFailed => CatalogError::DecryptionFailed,
            CoreError::Io(io) => CatalogError::Io(io),
            other => CatalogError::Malformed(other.to_string()),
        }
    }
}

/// Media decryption errors. Fatal for the one resource only.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The session was locked while the stream was open.
    #[error("session locked")]
    SessionLocked,

    #[error("media not found: {0}")]
    NotFound(String),

    #[error("invalid media id: {0}")]
    InvalidId(String),

    #[error("malformed container: {0}")]
    Malformed(String),

    /// Tag mismatch. No plaintext was released for this pass.
    #[error("media authentication failed")]
    AuthenticationFailed,

    #[error("requested range starts at {start}, media length is {len}")]
    RangeNotSatisfiable { start: u64, len: u64 },

    #[error("content hash mismatch for {0}")]
    ContentHashMismatch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for CodecError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::AuthenticationFailed => CodecError::AuthenticationFailed,
            CoreError::Io(io) => CodecError::Io(io),
            other => CodecError::Malformed(other.to_string()),
        }
    }
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
pub type CodecResult<T> = std::result::Result<T, CodecError>;
