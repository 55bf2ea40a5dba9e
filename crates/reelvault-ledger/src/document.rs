//! The ledger document, its checksums, and the encrypted file around it.
//!
//! ## File layout
//!
//! ```text
//! b"RVLG" | version:u8 | nonce(12) | ciphertext | tag(16)
//! ```
//!
//! The plaintext is the CBOR-encoded [`LedgerDocument`]. The five header bytes
//! are the AEAD associated data. The file is rewritten whole on every mutation.

use reelvault_core::aead::{self, Nonce, Sealed, Tag, NONCE_LEN, TAG_LEN};
use reelvault_core::{Blake3Hash, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::anomaly::AnomalyRecord;
use crate::entry::LedgerEntry;
use crate::error::{LedgerError, Result};

pub const LEDGER_MAGIC: &[u8; 4] = b"RVLG";
pub const LEDGER_FILE_VERSION: u8 = 1;
pub const DOCUMENT_VERSION: u8 = 1;

const ITEM_CHECKSUM_CONTEXT: &str = "reelvault ledger item v1";
const GLOBAL_CHECKSUM_CONTEXT: &str = "reelvault ledger global v1";
const HEADER_LEN: usize = 5;

/// The chain of one media item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemChain {
    /// `prev_hash` of the first retained entry. Zero until the first prune.
    pub anchor: Blake3Hash,
    pub entries: Vec<LedgerEntry>,
    pub checksum: Blake3Hash,
}

impl ItemChain {
    /// Hash the next entry must link to.
    pub fn head(&self) -> Blake3Hash {
        self.entries.last().map_or(self.anchor, |e| e.current_hash)
    }

    pub fn compute_checksum(&self, media_id: &str) -> Blake3Hash {
        let mut hasher = blake3::Hasher::new_derive_key(ITEM_CHECKSUM_CONTEXT);
        hasher.update(&(media_id.len() as u32).to_le_bytes());
        hasher.update(media_id.as_bytes());
        hasher.update(self.anchor.as_bytes());
        hasher.update(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            hasher.update(entry.current_hash.as_bytes());
        }
        Blake3Hash::from_bytes(*hasher.finalize().as_bytes())
    }
}

/// Everything the ledger persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub version: u8,
    /// Last sequence number handed out.
    pub global_sequence: u64,
    /// Unix milliseconds of the last recorded event.
    pub last_timestamp: Option<i64>,
    pub items: BTreeMap<String, ItemChain>,
    pub anomalies: Vec<AnomalyRecord>,
    pub global_checksum: Blake3Hash,
}

impl Default for LedgerDocument {
    fn default() -> Self {
        let mut doc = Self {
            version: DOCUMENT_VERSION,
            global_sequence: 0,
            last_timestamp: None,
            items: BTreeMap::new(),
            anomalies: Vec::new(),
            global_checksum: Blake3Hash::ZERO,
        };
        doc.global_checksum = doc.compute_global_checksum();
        doc
    }
}

impl LedgerDocument {
    pub fn compute_global_checksum(&self) -> Blake3Hash {
        let mut hasher = blake3::Hasher::new_derive_key(GLOBAL_CHECKSUM_CONTEXT);
        hasher.update(&[self.version]);
        hasher.update(&self.global_sequence.to_le_bytes());
        match self.last_timestamp {
            Some(t) => {
                hasher.update(&[1]);
                hasher.update(&t.to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        hasher.update(&(self.items.len() as u64).to_le_bytes());
        for (id, item) in &self.items {
            hasher.update(&(id.len() as u32).to_le_bytes());
            hasher.update(id.as_bytes());
            hasher.update(item.checksum.as_bytes());
        }
        hasher.update(&(self.anomalies.len() as u64).to_le_bytes());
        for anomaly in &self.anomalies {
            anomaly.write_to(&mut hasher);
        }
        Blake3Hash::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Recompute the checksum of one item and the global checksum.
    pub(crate) fn reseal_item(&mut self, media_id: &str) {
        if let Some(item) = self.items.get_mut(media_id) {
            item.checksum = item.compute_checksum(media_id);
        }
        self.global_checksum = self.compute_global_checksum();
    }

    /// Recompute every checksum.
    pub(crate) fn reseal_all(&mut self) {
        for (id, item) in self.items.iter_mut() {
            item.checksum = item.compute_checksum(id);
        }
        self.global_checksum = self.compute_global_checksum();
    }

    pub fn entry_count(&self) -> usize {
        self.items.values().map(|i| i.entries.len()).sum()
    }

    /// Recheck every hash, link and checksum. Never mutates.
    pub fn validate(&self) -> IntegrityReport {
        let mut issues = Vec::new();
        let mut seen_sequences = std::collections::BTreeSet::new();
        let mut max_timestamp: Option<i64> = None;

        for (id, item) in &self.items {
            let mut prev = item.anchor;
            let mut last_seq = 0u64;
            for entry in &item.entries {
                if !entry.hash_is_valid() {
                    issues.push(IntegrityIssue::entry(IssueKind::EntryHash, id, entry, "hash does not match fields"));
                }
                if entry.prev_hash != prev {
                    issues.push(IntegrityIssue::entry(IssueKind::BrokenLink, id, entry, "prev hash does not match predecessor"));
                }
                if entry.event.media_id != *id {
                    issues.push(IntegrityIssue::entry(IssueKind::MisfiledEntry, id, entry, "entry filed under another item"));
                }
                if entry.sequence <= last_seq || entry.sequence > self.global_sequence {
                    issues.push(IntegrityIssue::entry(IssueKind::Sequence, id, entry, "sequence out of order"));
                }
                if !seen_sequences.insert(entry.sequence) {
                    issues.push(IntegrityIssue::entry(IssueKind::Sequence, id, entry, "sequence reused"));
                }
                max_timestamp = max_timestamp.max(Some(entry.timestamp));
                last_seq = entry.sequence;
                prev = entry.current_hash;
            }
            if item.compute_checksum(id) != item.checksum {
                issues.push(IntegrityIssue {
                    kind: IssueKind::ItemChecksum,
                    media_id: Some(id.clone()),
                    sequence: None,
                    details: "item checksum mismatch".into(),
                });
            }
        }

        if let (Some(max), Some(last)) = (max_timestamp, self.last_timestamp) {
            if max > last {
                issues.push(IntegrityIssue::global(IssueKind::Timestamp, "entry newer than last recorded timestamp"));
            }
        } else if max_timestamp.is_some() {
            issues.push(IntegrityIssue::global(IssueKind::Timestamp, "entries present but no last timestamp"));
        }

        if self
            .anomalies
            .windows(2)
            .any(|w| w[1].timestamp < w[0].timestamp)
        {
            issues.push(IntegrityIssue::global(IssueKind::AnomalyOrder, "anomalies out of order"));
        }

        if self.compute_global_checksum() != self.global_checksum {
            issues.push(IntegrityIssue::global(IssueKind::GlobalChecksum, "global checksum mismatch"));
        }

        IntegrityReport {
            entries_checked: self.entry_count(),
            issues,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueKind {
    EntryHash,
    BrokenLink,
    MisfiledEntry,
    Sequence,
    Timestamp,
    ItemChecksum,
    GlobalChecksum,
    AnomalyOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub kind: IssueKind,
    pub media_id: Option<String>,
    pub sequence: Option<u64>,
    pub details: String,
}

impl IntegrityIssue {
    fn entry(kind: IssueKind, media_id: &str, entry: &LedgerEntry, details: &str) -> Self {
        Self {
            kind,
            media_id: Some(media_id.to_string()),
            sequence: Some(entry.sequence),
            details: details.to_string(),
        }
    }

    fn global(kind: IssueKind, details: &str) -> Self {
        Self {
            kind,
            media_id: None,
            sequence: None,
            details: details.to_string(),
        }
    }
}

/// Result of [`LedgerDocument::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub entries_checked: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Encrypt a document into the on-disk layout.
pub fn seal_document(doc: &LedgerDocument, key: &SecretKey) -> Result<Vec<u8>> {
    let mut plain = Vec::new();
    ciborium::into_writer(doc, &mut plain).map_err(|e| LedgerError::Malformed(e.to_string()))?;

    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(LEDGER_MAGIC);
    header[4] = LEDGER_FILE_VERSION;
    let sealed = aead::seal(key, &plain, &header)?;

    let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + sealed.ciphertext.len() + TAG_LEN);
    out.extend_from_slice(&header);
    out.extend_from_slice(sealed.nonce.as_bytes());
    out.extend_from_slice(&sealed.ciphertext);
    out.extend_from_slice(sealed.tag.as_bytes());
    Ok(out)
}

/// Decrypt and decode a ledger file.
pub fn open_document(bytes: &[u8], key: &SecretKey) -> Result<LedgerDocument> {
    if bytes.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
        return Err(LedgerError::Malformed("ledger file too short".into()));
    }
    let (header, rest) = bytes.split_at(HEADER_LEN);
    if &header[..4] != LEDGER_MAGIC {
        return Err(LedgerError::Malformed("bad magic".into()));
    }
    if header[4] != LEDGER_FILE_VERSION {
        return Err(LedgerError::Malformed(format!("unsupported version {}", header[4])));
    }
    let (nonce, rest) = rest.split_at(NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
    let sealed = Sealed {
        nonce: Nonce::from_slice(nonce)?,
        ciphertext: ciphertext.to_vec(),
        tag: Tag::from_slice(tag)?,
    };
    let plain = aead::open(key, &sealed, header)?;
    let doc: LedgerDocument =
        ciborium::from_reader(plain.as_slice()).map_err(|e| LedgerError::Malformed(e.to_string()))?;
    if doc.version != DOCUMENT_VERSION {
        return Err(LedgerError::Malformed(format!("unsupported document version {}", doc.version)));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PlayEvent;
    use proptest::prelude::*;

    fn doc_with_chain(n: u64) -> LedgerDocument {
        let mut doc = LedgerDocument::default();
        let mut item = ItemChain::default();
        for seq in 1..=n {
            let entry = LedgerEntry::new(seq as i64 * 1_000, item.head(), seq, PlayEvent::new("ep1", 500, "s"));
            item.entries.push(entry);
        }
        doc.items.insert("ep1".into(), item);
        doc.global_sequence = n;
        doc.last_timestamp = Some(n as i64 * 1_000);
        doc.reseal_all();
        doc
    }

    #[test]
    fn test_empty_document_is_clean() {
        assert!(LedgerDocument::default().validate().is_clean());
    }

    #[test]
    fn test_chain_is_clean_and_linked() {
        let doc = doc_with_chain(5);
        let report = doc.validate();
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.entries_checked, 5);
        let entries = &doc.items["ep1"].entries;
        for w in entries.windows(2) {
            assert_eq!(w[1].prev_hash, w[0].current_hash);
        }
        assert_eq!(entries[0].prev_hash, Blake3Hash::ZERO);
    }

    #[test]
    fn test_field_mutation_reported() {
        let mut doc = doc_with_chain(3);
        doc.items.get_mut("ep1").unwrap().entries[1].event.played_ms += 1;
        let report = doc.validate();
        assert!(report.issues.iter().any(|i| i.kind == IssueKind::EntryHash));
    }

    #[test]
    fn test_deleted_entry_reported() {
        let mut doc = doc_with_chain(4);
        doc.items.get_mut("ep1").unwrap().entries.remove(1);
        let report = doc.validate();
        assert!(report.issues.iter().any(|i| i.kind == IssueKind::BrokenLink));
        assert!(report.issues.iter().any(|i| i.kind == IssueKind::ItemChecksum));
    }

    #[test]
    fn test_global_field_mutation_reported() {
        let mut doc = doc_with_chain(2);
        doc.global_sequence += 1;
        assert!(doc
            .validate()
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::GlobalChecksum));
    }

    #[test]
    fn test_file_seal_open() {
        let key = SecretKey::generate();
        let doc = doc_with_chain(3);
        let bytes = seal_document(&doc, &key).unwrap();
        assert_eq!(&bytes[..4], LEDGER_MAGIC);
        assert_eq!(bytes[4], LEDGER_FILE_VERSION);
        assert_eq!(open_document(&bytes, &key).unwrap(), doc);

        assert!(matches!(
            open_document(&bytes, &SecretKey::generate()),
            Err(LedgerError::DecryptionFailed)
        ));

        let mut tampered = bytes.clone();
        tampered[4] = 2;
        assert!(matches!(open_document(&tampered, &key), Err(LedgerError::Malformed(_))));

        let mut flipped = bytes;
        let mid = flipped.len() / 2;
        flipped[mid] ^= 1;
        assert!(matches!(open_document(&flipped, &key), Err(LedgerError::DecryptionFailed)));
    }

    proptest! {
        #[test]
        fn test_any_entry_field_mutation_detected(
            len in 1u64..12,
            pick in any::<prop::sample::Index>(),
            field in 0u8..5,
            delta in 1u64..1_000,
        ) {
            let mut doc = doc_with_chain(len);
            let entries = &mut doc.items.get_mut("ep1").unwrap().entries;
            let entry = &mut entries[pick.index(len as usize)];
            match field {
                0 => entry.timestamp += delta as i64,
                1 => entry.sequence += delta,
                2 => entry.event.played_ms += delta,
                3 => entry.event.session_id.push('x'),
                _ => entry.prev_hash = Blake3Hash::hash(&delta.to_le_bytes()),
            }
            prop_assert!(!doc.validate().is_clean());
        }
    }
}
