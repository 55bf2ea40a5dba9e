//! # ReelVault Vault
//!
//! The encrypted side of the vault: the signed catalog manifest and the
//! per-item media containers.
//!
//! ## Components
//!
//! - [`manifest`] - `RVMF` manifest layout, sealing and verification
//! - [`catalog`] - the in-memory index built from a verified manifest
//! - [`container`] - `RVMC` and legacy container layouts
//! - [`codec`] - media resolution and lazy decrypt streams
//!
//! Keys come from the license engine. Nothing here derives a master key.

pub mod catalog;
pub mod codec;
pub mod container;
pub mod error;
pub mod manifest;

pub use catalog::VaultCatalog;
pub use codec::{
    CodecConfig, DecryptStream, MediaCodec, MediaKind, Posture, ResolvedMedia, StreamRange,
    CONTAINER_EXTENSION, DEFAULT_CHUNK_SIZE,
};
pub use container::{
    parse_legacy, seal_container, seal_container_bytes, seal_legacy, ContainerFormat,
    ContainerHeader, CONTAINER_MAGIC, CONTAINER_VERSION,
};
pub use error::{CatalogError, CatalogResult, CodecError, CodecResult};
pub use manifest::{Manifest, ManifestPayload, MediaMeta, MANIFEST_MAGIC, MANIFEST_VERSION};
