//! Error types for the trust core facade.

use reelvault_ledger::LedgerError;
use reelvault_license::{LicenseError, RejectionReason};
use reelvault_vault::{CatalogError, CodecError};
use thiserror::Error;

/// Errors surfaced by [`crate::TrustCore`].
#[derive(Debug, Error)]
pub enum TrustError {
    /// Licensing fault, including trusted-key tampering.
    #[error("license error: {0}")]
    License(#[from] LicenseError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("media error: {0}")]
    Codec(#[from] CodecError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("configuration error: {0}")]
    Config(String),

    /// The operation needs an unlocked session.
    #[error("vault is locked")]
    Locked,

    #[error("unknown media id: {0}")]
    UnknownMedia(String),

    /// Production startup refuses to continue without a license.
    #[error("startup halted: {0}")]
    StartupHalted(RejectionReason),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, TrustError>;
