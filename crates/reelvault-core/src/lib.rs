//! # ReelVault Core
//!
//! Primitives shared by every part of the ReelVault trust core.
//!
//! Nothing in here knows about licenses, catalogs or ledgers. It is the
//! cryptographic vocabulary the other crates speak.
//!
//! ## Key Types
//!
//! - [`SecretKey`] - 256-bit symmetric key, zeroized on drop
//! - [`KdfParams`] / [`KeyPurpose`] - master and sub-key derivation
//! - [`Sealed`] - one-shot ChaCha20-Poly1305 output (nonce, ciphertext, tag)
//! - [`stream::ChunkStage`] - composable transforms over chunked byte streams
//! - [`Ed25519PublicKey`] / [`Ed25519Signature`] / [`Keypair`] - signatures
//! - [`Clock`] - injectable wall clock
//!
//! ## Canonicalization
//!
//! Signed JSON documents are verified over their canonical form. See the
//! [`canonical`] module.

pub mod aead;
pub mod canonical;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod fsutil;
pub mod kdf;
pub mod stream;
pub mod wire;

pub use aead::{open, seal, Nonce, Sealed, Tag, NONCE_LEN, TAG_LEN};
pub use canonical::{canonical_json, canonical_json_without, to_canonical_json};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair, SecretKey, KEY_LEN};
pub use error::{CoreError, Result};
pub use kdf::{derive_master_key, derive_sub_key, KdfParams, KeyPurpose};
