//! # ReelVault Ledger
//!
//! A tamper-evident record of finished playbacks.
//!
//! Each media item has its own hash chain: an entry's `prev_hash` is the
//! `current_hash` of the item's previous entry, or the item anchor for the
//! first one. A global sequence orders entries across items. Per-item and
//! global checksums catch removal or reordering that the links alone would
//! not.
//!
//! The whole document is encrypted under the ledger key and rewritten on
//! every mutation. Concurrent callers go through [`LedgerWriter`], which owns
//! the ledger on a single task.

pub mod anomaly;
pub mod document;
pub mod entry;
pub mod error;
pub mod ledger;
pub mod writer;

pub use anomaly::{AnomalyKind, AnomalyRecord, Severity};
pub use document::{
    open_document, seal_document, IntegrityIssue, IntegrityReport, IssueKind, ItemChain, LedgerDocument,
    LEDGER_MAGIC,
};
pub use entry::{LedgerEntry, PlayEvent, ENTRY_HASH_CONTEXT};
pub use error::{LedgerError, Result};
pub use ledger::{LedgerConfig, LedgerExport, RecordOutcome, UsageLedger};
pub use writer::{LedgerHandle, LedgerWriter};
