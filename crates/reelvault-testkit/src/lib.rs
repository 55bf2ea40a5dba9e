//! # ReelVault Testkit
//!
//! Testing utilities for the ReelVault trust core.
//!
//! ## Overview
//!
//! - **Fixtures**: a complete vault on disk, laid out the way an issuer would
//! - **Generators**: proptest strategies for licenses, events and mutations
//! - **Golden vectors**: pinned fingerprints and derived keys for issuer tooling
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use reelvault_testkit::VaultFixture;
//!
//! let fx = VaultFixture::new().await;
//! let items = fx.publish(&[("ep01", "Pilot", b"...")]).await;
//! // point a trust core at fx.root() / fx.state_dir() with fx.probe and fx.clock
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use reelvault_testkit::generators::{byte_flip, flip};
//!
//! proptest! {
//!     #[test]
//!     fn tampered_blob_rejected(m in byte_flip(BLOB.len())) {
//!         prop_assert!(verify(&flip(BLOB, m)).is_err());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    fixture_epoch, media_meta, other_machine_probe, sample_media, test_attributes, test_probe, IssuerFixture,
    VaultFixture, TEST_KID, TEST_LICENSE_ID, TEST_SERIAL,
};
pub use generators::{byte_flip, flip, license_from_params, LicenseParams};
pub use vectors::{fingerprint_vectors, master_key_vectors, sub_key_vectors, verify_all_vectors};
