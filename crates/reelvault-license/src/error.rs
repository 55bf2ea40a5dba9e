//! Error types for the licensing crate.
//!
//! These are hard faults. An ordinary "this license does not unlock this
//! device" outcome is a [`crate::RejectionReason`], not an error.

use thiserror::Error;

/// Licensing faults.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// The embedded trusted-key table failed its self-check.
    #[error("trusted key table integrity compromised: {0}")]
    IntegrityCompromised(String),

    /// License blob could not be decoded.
    #[error("malformed license: {0}")]
    MalformedLicense(String),

    /// Revocation document could not be decoded.
    #[error("malformed revocation list: {0}")]
    MalformedRevocationList(String),

    /// Revocation entry names neither a license nor a key.
    #[error("invalid revocation entry: {0}")]
    InvalidRevocationEntry(String),

    /// Only the issuer named in the list may re-sign it.
    #[error("revocation list issuer mismatch: list is {list}, signer is {signer}")]
    IssuerMismatch { list: String, signer: String },

    /// Passphrase key envelope could not be decoded.
    #[error("malformed key envelope: {0}")]
    MalformedEnvelope(String),

    /// Watermark file exists but is unreadable.
    #[error("clock watermark corrupted: {0}")]
    WatermarkCorrupted(String),

    /// Vault or device salt missing or wrong size.
    #[error("invalid salt at {0}")]
    InvalidSalt(String),

    /// Operation needs an unlocked session.
    #[error("license engine is locked")]
    Locked,

    /// Blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    #[error("core error: {0}")]
    Core(#[from] reelvault_core::CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for licensing operations.
pub type Result<T> = std::result::Result<T, LicenseError>;
