//! # ReelVault
//!
//! The trust core of an offline media player. It decides whether the vault
//! on this removable media may be opened on this machine at this time, then
//! serves decrypted media and records what was played.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reelvault::{StreamRange, SystemClock, SystemProbe, TrustCore, TrustedKeyTable, VaultConfig};
//! use std::sync::Arc;
//!
//! let config = VaultConfig::load("/etc/reelvault.toml".as_ref()).await?;
//! let mut core = TrustCore::new(config, &SystemProbe, Arc::new(SystemClock), TrustedKeyTable::embedded())?;
//! core.startup().await?;
//!
//! for item in core.list_catalog() {
//!     println!("{} ({})", item.title, item.id);
//! }
//! let mut stream = core.open_decrypted_stream("ep01", StreamRange::full()).await?;
//! while let Some(chunk) = stream.next_chunk().await? {
//!     // hand to the decoder
//! }
//! core.record_play("ep01", 1_200_000, "session-1").await?;
//! ```
//!
//! ## Crates
//!
//! - [`reelvault_core`] - keys, AEAD, signatures, the chunk pipeline
//! - [`reelvault_license`] - device identity, licenses, revocation, the engine
//! - [`reelvault_vault`] - catalog manifest and media containers
//! - [`reelvault_ledger`] - the hash-chained usage ledger
//!
//! [`TrustCore`] wires them together around one unlocked session.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod trust_core;

pub use config::{RevocationConfig, VaultConfig};
pub use error::{Result, TrustError};
pub use telemetry::{init_test_tracing, init_tracing};
pub use trust_core::TrustCore;

pub use reelvault_core::{Clock, KdfParams, KeyPurpose, ManualClock, SystemClock};
pub use reelvault_ledger::{
    AnomalyKind, AnomalyRecord, IntegrityReport, LedgerExport, LedgerHandle, RecordOutcome, Severity,
};
pub use reelvault_license::{
    DeviceFingerprint, EngineState, HardwareAttributes, HardwareProbe, RejectionReason, RevocationEntry,
    RevocationReason, StaticProbe, SystemProbe, TrustedKeyTable, Verdict,
};
pub use reelvault_vault::{DecryptStream, MediaMeta, Posture, StreamRange};

