//! Ledger entries and their chain hashes.

use reelvault_core::Blake3Hash;
use serde::{Deserialize, Serialize};

/// BLAKE3 key-derivation context for entry hashes.
pub const ENTRY_HASH_CONTEXT: &str = "reelvault ledger entry v1";

/// A finished playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayEvent {
    pub media_id: String,
    pub played_ms: u64,
    pub session_id: String,
}

impl PlayEvent {
    pub fn new(media_id: impl Into<String>, played_ms: u64, session_id: impl Into<String>) -> Self {
        Self {
            media_id: media_id.into(),
            played_ms,
            session_id: session_id.into(),
        }
    }

    /// Length-prefixed encoding fed into the entry hash.
    fn write_to(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&(self.media_id.len() as u32).to_le_bytes());
        hasher.update(self.media_id.as_bytes());
        hasher.update(&self.played_ms.to_le_bytes());
        hasher.update(&(self.session_id.len() as u32).to_le_bytes());
        hasher.update(self.session_id.as_bytes());
    }
}

/// One link in a media item's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unix milliseconds.
    pub timestamp: i64,
    pub prev_hash: Blake3Hash,
    pub current_hash: Blake3Hash,
    /// Global sequence number, shared by every item.
    pub sequence: u64,
    pub event: PlayEvent,
}

impl LedgerEntry {
    /// Build an entry and compute its hash.
    pub fn new(timestamp: i64, prev_hash: Blake3Hash, sequence: u64, event: PlayEvent) -> Self {
        let current_hash = Self::compute_hash(timestamp, &prev_hash, sequence, &event);
        Self {
            timestamp,
            prev_hash,
            current_hash,
            sequence,
            event,
        }
    }

    pub fn compute_hash(timestamp: i64, prev_hash: &Blake3Hash, sequence: u64, event: &PlayEvent) -> Blake3Hash {
        let mut hasher = blake3::Hasher::new_derive_key(ENTRY_HASH_CONTEXT);
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(prev_hash.as_bytes());
        hasher.update(&sequence.to_le_bytes());
        event.write_to(&mut hasher);
        Blake3Hash::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Whether `current_hash` matches the other fields.
    pub fn hash_is_valid(&self) -> bool {
        Self::compute_hash(self.timestamp, &self.prev_hash, self.sequence, &self.event) == self.current_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_covers_every_field() {
        let event = PlayEvent::new("ep1", 1_000, "s1");
        let base = LedgerEntry::new(10, Blake3Hash::ZERO, 1, event.clone());
        assert!(base.hash_is_valid());

        let variants = [
            LedgerEntry::new(11, Blake3Hash::ZERO, 1, event.clone()),
            LedgerEntry::new(10, Blake3Hash::hash(b"x"), 1, event.clone()),
            LedgerEntry::new(10, Blake3Hash::ZERO, 2, event.clone()),
            LedgerEntry::new(10, Blake3Hash::ZERO, 1, PlayEvent::new("ep2", 1_000, "s1")),
            LedgerEntry::new(10, Blake3Hash::ZERO, 1, PlayEvent::new("ep1", 1_001, "s1")),
            LedgerEntry::new(10, Blake3Hash::ZERO, 1, PlayEvent::new("ep1", 1_000, "s2")),
        ];
        for v in variants {
            assert_ne!(v.current_hash, base.current_hash);
        }
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = LedgerEntry::new(0, Blake3Hash::ZERO, 1, PlayEvent::new("ab", 0, "c"));
        let b = LedgerEntry::new(0, Blake3Hash::ZERO, 1, PlayEvent::new("a", 0, "bc"));
        assert_ne!(a.current_hash, b.current_hash);
    }

    #[test]
    fn test_tampered_entry_detected() {
        let mut entry = LedgerEntry::new(5, Blake3Hash::ZERO, 3, PlayEvent::new("ep1", 42, "s"));
        entry.event.played_ms = 43;
        assert!(!entry.hash_is_valid());
    }
}
