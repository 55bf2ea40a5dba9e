//! Error types for the usage ledger.

use reelvault_core::CoreError;
use thiserror::Error;

use crate::anomaly::AnomalyRecord;

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The event claims a time too far ahead of the clock. Nothing was written.
    #[error("event timestamp {timestamp} is more than {tolerance_ms} ms in the future")]
    FutureTimestamp { timestamp: i64, tolerance_ms: i64 },

    /// A high-severity anomaly stopped the write.
    #[error("write blocked by anomaly: {}", .0.details)]
    AnomalyBlocked(AnomalyRecord),

    #[error("ledger decryption failed")]
    DecryptionFailed,

    #[error("malformed ledger: {0}")]
    Malformed(String),

    #[error("no anomaly at index {0}")]
    UnknownAnomaly(usize),

    /// The writer task is gone.
    #[error("ledger writer closed")]
    WriterClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for LedgerError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::AuthenticationFailed => LedgerError::DecryptionFailed,
            CoreError::Io(io) => LedgerError::Io(io),
            other => LedgerError::Malformed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
