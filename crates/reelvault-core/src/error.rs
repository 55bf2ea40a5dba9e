//! Error types for ReelVault Core.

use thiserror::Error;

/// Errors raised by the core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    /// AEAD tag mismatch. Carries no detail on purpose.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid KDF parameters: {0}")]
    InvalidKdfParams(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("length field {field} out of bounds: {value}")]
    LengthOutOfBounds { field: &'static str, value: u64 },

    #[error("stage already finished")]
    StageFinished,

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
