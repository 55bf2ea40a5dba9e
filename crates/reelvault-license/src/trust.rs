//! The trusted issuer key table.
//!
//! Licenses, revocation lists and manifests name the key that signed them by
//! key-id (`kid`). Only keys in this table are ever used for verification.
//!
//! The production table is a compile-time constant. At construction the
//! table records a digest of its contents, and [`TrustedKeyTable::self_check`]
//! re-validates structure and digest before every unlock attempt.

use reelvault_core::Ed25519PublicKey;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{LicenseError, Result};

/// Issuer keys compiled into the player.
pub const EMBEDDED_TRUSTED_KEYS: &[(&str, [u8; 32])] = &[
    (
        "reelvault-issuer-2025",
        [
            0x48, 0x7c, 0x9a, 0x8d, 0x32, 0x98, 0x49, 0xef, 0x12, 0xb0, 0xb5, 0x57, 0x07, 0xcb,
            0x0b, 0x53, 0xa7, 0x37, 0x52, 0xc6, 0x68, 0x47, 0x38, 0x3c, 0xae, 0x8b, 0xd4, 0x6d,
            0x6f, 0x4b, 0xed, 0x79,
        ],
    ),
    (
        "reelvault-issuer-2026",
        [
            0xcd, 0x94, 0xc5, 0x04, 0x63, 0x60, 0xcf, 0x06, 0x50, 0x6d, 0xc7, 0x71, 0x45, 0xb5,
            0x86, 0xda, 0xb7, 0x79, 0x59, 0xbb, 0x41, 0x37, 0x35, 0xb2, 0x41, 0x91, 0x81, 0x9e,
            0x96, 0x37, 0x03, 0x4d,
        ],
    ),
];

/// An immutable `kid -> public key` table.
///
/// Cheap to clone; clones share the same entries.
#[derive(Debug, Clone)]
pub struct TrustedKeyTable {
    entries: Arc<Vec<(String, Ed25519PublicKey)>>,
    digest: [u8; 32],
}

impl TrustedKeyTable {
    /// The table compiled into this build.
    pub fn embedded() -> Self {
        Self::from_entries(
            EMBEDDED_TRUSTED_KEYS
                .iter()
                .map(|(kid, key)| (kid.to_string(), Ed25519PublicKey::from_bytes(*key))),
        )
    }

    /// Build a table from explicit entries. Order is preserved.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Ed25519PublicKey)>) -> Self {
        let entries: Vec<_> = entries.into_iter().collect();
        let digest = digest_of(&entries);
        Self {
            entries: Arc::new(entries),
            digest,
        }
    }

    /// Look up the key for a key-id.
    pub fn get(&self, kid: &str) -> Option<&Ed25519PublicKey> {
        self.entries
            .iter()
            .find(|(k, _)| k == kid)
            .map(|(_, key)| key)
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hex digest recorded at construction.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Verify the table is non-empty, well-formed and unchanged.
    ///
    /// Failure means the engine itself was tampered with and is reported as
    /// [`LicenseError::IntegrityCompromised`], never as a license rejection.
    pub fn self_check(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(LicenseError::IntegrityCompromised(
                "trusted key table is empty".into(),
            ));
        }

        let mut seen = BTreeMap::new();
        for (kid, key) in self.entries.iter() {
            if kid.trim().is_empty() {
                return Err(LicenseError::IntegrityCompromised("empty key id".into()));
            }
            if seen.insert(kid.as_str(), ()).is_some() {
                return Err(LicenseError::IntegrityCompromised(format!(
                    "duplicate key id {kid}"
                )));
            }
            if !key.is_valid_point() {
                return Err(LicenseError::IntegrityCompromised(format!(
                    "key {kid} is not a valid Ed25519 point"
                )));
            }
        }

        if digest_of(&self.entries) != self.digest {
            return Err(LicenseError::IntegrityCompromised(
                "trusted key table digest changed".into(),
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    fn tamper(&mut self, kid: &str, key: Ed25519PublicKey) {
        let mut entries = (*self.entries).clone();
        entries.push((kid.to_string(), key));
        self.entries = Arc::new(entries);
    }
}

fn digest_of(entries: &[(String, Ed25519PublicKey)]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for (kid, key) in entries {
        hasher.update((kid.len() as u32).to_le_bytes());
        hasher.update(kid.as_bytes());
        hasher.update(key.as_bytes());
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelvault_core::Keypair;

    #[test]
    fn test_embedded_table_passes_self_check() {
        let table = TrustedKeyTable::embedded();
        table.self_check().unwrap();
        assert_eq!(table.len(), EMBEDDED_TRUSTED_KEYS.len());
        assert!(table.get("reelvault-issuer-2025").is_some());
        assert!(table.get("nope").is_none());
    }

    #[test]
    fn test_empty_table_is_integrity_failure() {
        let table = TrustedKeyTable::from_entries(Vec::new());
        assert!(matches!(
            table.self_check(),
            Err(LicenseError::IntegrityCompromised(_))
        ));
    }

    #[test]
    fn test_duplicate_kid_rejected() {
        let key = Keypair::generate().public_key();
        let table = TrustedKeyTable::from_entries(vec![
            ("a".to_string(), key),
            ("a".to_string(), key),
        ]);
        assert!(table.self_check().is_err());
    }

    #[test]
    fn test_invalid_point_rejected() {
        // y = 2 does not decompress to a curve point.
        let mut bad = [0u8; 32];
        bad[0] = 2;
        let table =
            TrustedKeyTable::from_entries(vec![("k".to_string(), Ed25519PublicKey::from_bytes(bad))]);
        assert!(table.self_check().is_err());
    }

    #[test]
    fn test_post_construction_change_detected() {
        let mut table = TrustedKeyTable::from_entries(vec![(
            "k1".to_string(),
            Keypair::generate().public_key(),
        )]);
        table.self_check().unwrap();
        table.tamper("rogue", Keypair::generate().public_key());
        assert!(matches!(
            table.self_check(),
            Err(LicenseError::IntegrityCompromised(msg)) if msg.contains("digest")
        ));
    }
}
