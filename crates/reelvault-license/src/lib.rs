//! # ReelVault License
//!
//! Decides whether this machine, with this removable media, at this time,
//! may decrypt the vault.
//!
//! ## Components
//!
//! - [`device`] - hardware fingerprint and removable media serial
//! - [`trust`] - the embedded trusted issuer key table
//! - [`license`] - signed license records and their blob encodings
//! - [`revocation`] - the signed revocation list
//! - [`watermark`] - persisted clock watermark
//! - [`envelope`] - passphrase-sealed master key
//! - [`engine`] - the unlock state machine tying it together

pub mod device;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod license;
pub mod revocation;
pub mod trust;
pub mod verdict;
pub mod watermark;

pub use device::{DeviceFingerprint, DeviceIdentity, HardwareAttributes, HardwareProbe, StaticProbe, SystemProbe};
pub use engine::{EngineConfig, EngineState, LicenseEngine};
pub use envelope::KeyEnvelope;
pub use error::{LicenseError, Result};
pub use license::{LicenseEncoding, LicenseRecord, SignedLicense};
pub use revocation::{
    CrlSource, CrlStatus, FileCrlSource, MemoryCrlSource, RevocationDocument, RevocationEntry,
    RevocationList, RevocationReason,
};
pub use trust::{TrustedKeyTable, EMBEDDED_TRUSTED_KEYS};
pub use verdict::{RejectionReason, Verdict};
pub use watermark::WatermarkStore;
