//! Signed certificate revocation list (CRL).
//!
//! The document is JSON:
//!
//! ```json
//! {"issuer": "<kid>", "issuedAt": "...", "nextUpdate": "...",
//!  "revokedLicenses": [{"licenseId": "...", "revokedAt": "...", "reason": "refund"}],
//!  "signature": "<base64 ed25519>"}
//! ```
//!
//! `issuer` is also the key-id of the signing key. The signature covers the
//! canonical JSON of the document with the `signature` field removed.
//!
//! ## Failure policy
//!
//! The device is offline most of the time, so freshness fails open and a
//! positive match fails closed:
//!
//! - A document with a bad signature is treated as absent.
//! - A stale document is still consulted, with a warning.
//! - A document that verified once is never dropped because a later reload
//!   failed, so a known revocation cannot be unlearned.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use reelvault_core::{canonical_json_without, fsutil, Ed25519Signature, Keypair};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{LicenseError, Result};
use crate::trust::TrustedKeyTable;

/// Why an id was revoked. Carried through to the user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    KeyCompromise,
    Refund,
    Chargeback,
    Fraud,
    Superseded,
    AdministrativeHold,
    Other,
}

impl RevocationReason {
    /// Stable identifier for support tooling.
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::KeyCompromise => "key_compromise",
            RevocationReason::Refund => "refund",
            RevocationReason::Chargeback => "chargeback",
            RevocationReason::Fraud => "fraud",
            RevocationReason::Superseded => "superseded",
            RevocationReason::AdministrativeHold => "administrative_hold",
            RevocationReason::Other => "other",
        }
    }
}

/// One revoked license or key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    pub revoked_at: DateTime<Utc>,
    pub reason: RevocationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

impl RevocationEntry {
    /// Revoke a single license.
    pub fn license(license_id: impl Into<String>, reason: RevocationReason, at: DateTime<Utc>) -> Self {
        Self {
            license_id: Some(license_id.into()),
            kid: None,
            revoked_at: at,
            reason,
            serial: None,
        }
    }

    /// Revoke every license signed by a key.
    pub fn key(kid: impl Into<String>, reason: RevocationReason, at: DateTime<Utc>) -> Self {
        Self {
            license_id: None,
            kid: Some(kid.into()),
            revoked_at: at,
            reason,
            serial: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.license_id.is_none() && self.kid.is_none() {
            return Err(LicenseError::InvalidRevocationEntry(
                "entry names neither licenseId nor kid".into(),
            ));
        }
        Ok(())
    }

    fn matches(&self, license_id: &str, kid: &str) -> bool {
        self.license_id.as_deref() == Some(license_id) || self.kid.as_deref() == Some(kid)
    }
}

/// The revocation document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationDocument {
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    #[serde(default)]
    pub revoked_licenses: Vec<RevocationEntry>,
    #[serde(default)]
    pub signature: String,
}

impl RevocationDocument {
    /// An empty, unsigned document.
    pub fn empty(issuer: impl Into<String>, issued_at: DateTime<Utc>, validity: Duration) -> Self {
        Self {
            issuer: issuer.into(),
            issued_at,
            next_update: issued_at + validity,
            revoked_licenses: Vec::new(),
            signature: String::new(),
        }
    }

    /// Sign in place with the issuer keypair.
    pub fn sign(&mut self, keypair: &Keypair) -> Result<()> {
        for entry in &self.revoked_licenses {
            entry.validate()?;
        }
        let value = serde_json::to_value(&*self)?;
        let sig = keypair.sign(&canonical_json_without(&value, "signature"));
        self.signature = BASE64.encode(sig.as_bytes());
        Ok(())
    }

    /// Serialize for storage. Compact, so every stored byte is covered by
    /// the signature.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and verify against the trusted table.
    pub fn verify(bytes: &[u8], trusted: &TrustedKeyTable) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| LicenseError::MalformedRevocationList(e.to_string()))?;

        let issuer = value
            .get("issuer")
            .and_then(Value::as_str)
            .ok_or_else(|| LicenseError::MalformedRevocationList("missing issuer".into()))?;
        let key = trusted.get(issuer).ok_or_else(|| {
            LicenseError::MalformedRevocationList(format!("unknown issuer {issuer}"))
        })?;

        let sig_b64 = value
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| LicenseError::MalformedRevocationList("missing signature".into()))?;
        let sig_bytes = BASE64
            .decode(sig_b64)
            .map_err(|e| LicenseError::MalformedRevocationList(format!("signature: {e}")))?;
        let signature = Ed25519Signature::from_slice(&sig_bytes)?;

        key.verify(&canonical_json_without(&value, "signature"), &signature)?;

        let doc: RevocationDocument = serde_json::from_value(value)
            .map_err(|e| LicenseError::MalformedRevocationList(e.to_string()))?;
        for entry in &doc.revoked_licenses {
            entry.validate()?;
        }
        Ok(doc)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

/// Where the revocation document is read from and written to.
#[async_trait]
pub trait CrlSource: Send + Sync {
    /// Fetch the current bytes. `Ok(None)` means no document exists.
    async fn fetch(&self) -> Result<Option<Vec<u8>>>;

    /// Persist a new document.
    async fn store(&self, bytes: &[u8]) -> Result<()>;
}

/// A document on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileCrlSource {
    path: PathBuf,
}

impl FileCrlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CrlSource for FileCrlSource {
    async fn fetch(&self) -> Result<Option<Vec<u8>>> {
        Ok(fsutil::read_optional(&self.path).await?)
    }

    async fn store(&self, bytes: &[u8]) -> Result<()> {
        fsutil::write_atomic(&self.path, bytes).await?;
        Ok(())
    }
}

/// In-memory source that can be switched offline.
#[derive(Debug, Default)]
pub struct MemoryCrlSource {
    bytes: RwLock<Option<Vec<u8>>>,
    unreachable: std::sync::atomic::AtomicBool,
}

impl MemoryCrlSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(Some(bytes)),
            unreachable: Default::default(),
        }
    }

    /// Make every fetch fail with an I/O error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable
            .store(unreachable, std::sync::atomic::Ordering::SeqCst);
    }

    /// Overwrite the stored bytes directly, bypassing signing.
    pub async fn replace(&self, bytes: Option<Vec<u8>>) {
        *self.bytes.write().await = bytes;
    }
}

#[async_trait]
impl CrlSource for MemoryCrlSource {
    async fn fetch(&self) -> Result<Option<Vec<u8>>> {
        if self.unreachable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "revocation source unreachable",
            )
            .into());
        }
        Ok(self.bytes.read().await.clone())
    }

    async fn store(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.write().await = Some(bytes.to_vec());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Revocation list
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a load attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrlStatus {
    /// A freshly verified document is in use.
    Verified,
    /// No document exists and none was known before.
    Absent,
    /// The fetched document failed verification; the previous one (if any) stays.
    Rejected,
    /// The source was unreachable; the previous one (if any) stays.
    Unreachable,
}

#[derive(Debug, Clone)]
struct Loaded {
    doc: RevocationDocument,
    loaded_at: DateTime<Utc>,
}

/// Verified view of the revocation document.
pub struct RevocationList {
    source: Arc<dyn CrlSource>,
    trusted: TrustedKeyTable,
    refresh_interval: Duration,
    current: Option<Loaded>,
    last_attempt: Option<DateTime<Utc>>,
}

impl RevocationList {
    pub fn new(source: Arc<dyn CrlSource>, trusted: TrustedKeyTable, refresh_interval: Duration) -> Self {
        Self {
            source,
            trusted,
            refresh_interval,
            current: None,
            last_attempt: None,
        }
    }

    /// Fetch and verify the document.
    pub async fn load(&mut self, now: DateTime<Utc>) -> CrlStatus {
        self.last_attempt = Some(now);

        let bytes = match self.source.fetch().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                if self.current.is_some() {
                    tracing::warn!("revocation list disappeared, keeping last verified copy");
                    return CrlStatus::Unreachable;
                }
                tracing::debug!("no revocation list present");
                return CrlStatus::Absent;
            }
            Err(e) => {
                tracing::warn!(error = %e, "revocation list unreachable, keeping last verified copy");
                return CrlStatus::Unreachable;
            }
        };

        match RevocationDocument::verify(&bytes, &self.trusted) {
            Ok(doc) => {
                if let Some(prev) = &self.current {
                    if doc.issued_at < prev.doc.issued_at {
                        tracing::warn!(
                            fetched = %doc.issued_at,
                            known = %prev.doc.issued_at,
                            "ignoring older revocation list"
                        );
                        return CrlStatus::Rejected;
                    }
                }
                tracing::info!(
                    issuer = %doc.issuer,
                    entries = doc.revoked_licenses.len(),
                    next_update = %doc.next_update,
                    "loaded revocation list"
                );
                self.current = Some(Loaded { doc, loaded_at: now });
                CrlStatus::Verified
            }
            Err(e) => {
                tracing::warn!(error = %e, "revocation list failed verification, treating as absent");
                CrlStatus::Rejected
            }
        }
    }

    /// Reload when past `nextUpdate` or the refresh interval.
    pub async fn refresh_if_stale(&mut self, now: DateTime<Utc>) -> Option<CrlStatus> {
        let due = match (&self.current, self.last_attempt) {
            (None, None) => true,
            (None, Some(attempt)) => now - attempt >= self.refresh_interval,
            (Some(loaded), _) => {
                now > loaded.doc.next_update || now - loaded.loaded_at >= self.refresh_interval
            }
        };
        if !due {
            return None;
        }
        let status = self.load(now).await;
        if self.is_stale(now) {
            tracing::warn!("using stale revocation list");
        }
        Some(status)
    }

    /// Whether the list in use is past its `nextUpdate`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.current
            .as_ref()
            .map_or(false, |l| now > l.doc.next_update)
    }

    /// First entry matching either the license id or the key-id.
    pub fn is_revoked(&self, license_id: &str, kid: &str) -> Option<&RevocationEntry> {
        self.current
            .as_ref()?
            .doc
            .revoked_licenses
            .iter()
            .find(|e| e.matches(license_id, kid))
    }

    pub fn document(&self) -> Option<&RevocationDocument> {
        self.current.as_ref().map(|l| &l.doc)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration (issuer side)
    // ─────────────────────────────────────────────────────────────────────────

    /// Add an entry, re-sign and persist.
    pub async fn revoke(
        &mut self,
        entry: RevocationEntry,
        issuer: &str,
        signer: &Keypair,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<()> {
        entry.validate()?;
        let mut doc = self.working_copy(issuer, now, validity)?;
        let exists = doc
            .revoked_licenses
            .iter()
            .any(|e| e.license_id == entry.license_id && e.kid == entry.kid);
        if !exists {
            doc.revoked_licenses.push(entry);
        }
        self.publish(doc, signer, now, validity).await
    }

    /// Remove every entry for a license id. Returns whether anything changed.
    pub async fn restore(
        &mut self,
        license_id: &str,
        issuer: &str,
        signer: &Keypair,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<bool> {
        let mut doc = self.working_copy(issuer, now, validity)?;
        let before = doc.revoked_licenses.len();
        doc.revoked_licenses
            .retain(|e| e.license_id.as_deref() != Some(license_id));
        if doc.revoked_licenses.len() == before {
            return Ok(false);
        }
        self.publish(doc, signer, now, validity).await?;
        Ok(true)
    }

    fn working_copy(&self, issuer: &str, now: DateTime<Utc>, validity: Duration) -> Result<RevocationDocument> {
        match &self.current {
            Some(loaded) if loaded.doc.issuer != issuer => Err(LicenseError::IssuerMismatch {
                list: loaded.doc.issuer.clone(),
                signer: issuer.to_string(),
            }),
            Some(loaded) => Ok(loaded.doc.clone()),
            None => Ok(RevocationDocument::empty(issuer, now, validity)),
        }
    }

    async fn publish(
        &mut self,
        mut doc: RevocationDocument,
        signer: &Keypair,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<()> {
        doc.issued_at = now;
        doc.next_update = now + validity;
        doc.sign(signer)?;
        self.source.store(&doc.to_bytes()?).await?;
        tracing::info!(entries = doc.revoked_licenses.len(), "published revocation list");
        self.current = Some(Loaded { doc, loaded_at: now });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Setup {
        keypair: Keypair,
        trusted: TrustedKeyTable,
    }

    fn setup() -> Setup {
        let keypair = Keypair::from_seed(&[3u8; 32]);
        let trusted = TrustedKeyTable::from_entries(vec![("crl-k".to_string(), keypair.public_key())]);
        Setup { keypair, trusted }
    }

    fn signed_doc(s: &Setup, now: DateTime<Utc>, entries: Vec<RevocationEntry>) -> Vec<u8> {
        let mut doc = RevocationDocument::empty("crl-k", now, Duration::days(7));
        doc.revoked_licenses = entries;
        doc.sign(&s.keypair).unwrap();
        doc.to_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_match_on_either_field() {
        let s = setup();
        let now = Utc::now();
        let bytes = signed_doc(
            &s,
            now,
            vec![
                RevocationEntry::license("LIC-1", RevocationReason::Refund, now),
                RevocationEntry::key("old-kid", RevocationReason::KeyCompromise, now),
            ],
        );
        let mut list = RevocationList::new(
            Arc::new(MemoryCrlSource::with_bytes(bytes)),
            s.trusted.clone(),
            Duration::days(1),
        );
        assert_eq!(list.load(now).await, CrlStatus::Verified);

        assert_eq!(
            list.is_revoked("LIC-1", "any").map(|e| e.reason),
            Some(RevocationReason::Refund)
        );
        assert_eq!(
            list.is_revoked("LIC-9", "old-kid").map(|e| e.reason),
            Some(RevocationReason::KeyCompromise)
        );
        assert!(list.is_revoked("LIC-9", "new-kid").is_none());
    }

    #[tokio::test]
    async fn test_bad_signature_treated_as_absent() {
        let s = setup();
        let now = Utc::now();
        let bytes = signed_doc(
            &s,
            now,
            vec![RevocationEntry::license("LIC-1", RevocationReason::Fraud, now)],
        );
        let mut value: Value = serde_json::from_slice(&bytes).unwrap();
        value["revokedLicenses"][0]["licenseId"] = Value::String("LIC-2".into());

        let mut list = RevocationList::new(
            Arc::new(MemoryCrlSource::with_bytes(serde_json::to_vec(&value).unwrap())),
            s.trusted.clone(),
            Duration::days(1),
        );
        assert_eq!(list.load(now).await, CrlStatus::Rejected);
        assert!(list.is_revoked("LIC-1", "k").is_none());
        assert!(list.is_revoked("LIC-2", "k").is_none());
    }

    #[tokio::test]
    async fn test_known_revocation_survives_failed_reload() {
        let s = setup();
        let now = Utc::now();
        let source = Arc::new(MemoryCrlSource::with_bytes(signed_doc(
            &s,
            now,
            vec![RevocationEntry::license("LIC-1", RevocationReason::Chargeback, now)],
        )));
        let mut list = RevocationList::new(source.clone(), s.trusted.clone(), Duration::hours(1));
        list.load(now).await;

        source.replace(Some(b"{\"issuer\":\"crl-k\"}".to_vec())).await;
        assert_eq!(list.load(now + Duration::hours(2)).await, CrlStatus::Rejected);
        assert!(list.is_revoked("LIC-1", "k").is_some());

        source.replace(None).await;
        assert_eq!(list.load(now + Duration::hours(3)).await, CrlStatus::Unreachable);
        assert!(list.is_revoked("LIC-1", "k").is_some());

        source.set_unreachable(true);
        assert_eq!(list.load(now + Duration::hours(4)).await, CrlStatus::Unreachable);
        assert!(list.is_revoked("LIC-1", "k").is_some());
    }

    #[tokio::test]
    async fn test_stale_list_still_used() {
        let s = setup();
        let now = Utc::now();
        let source = Arc::new(MemoryCrlSource::with_bytes(signed_doc(
            &s,
            now,
            vec![RevocationEntry::license("LIC-1", RevocationReason::Other, now)],
        )));
        let mut list = RevocationList::new(source.clone(), s.trusted.clone(), Duration::days(1));
        assert_eq!(list.refresh_if_stale(now).await, Some(CrlStatus::Verified));
        assert_eq!(list.refresh_if_stale(now + Duration::hours(1)).await, None);

        source.set_unreachable(true);
        let later = now + Duration::days(30);
        assert_eq!(list.refresh_if_stale(later).await, Some(CrlStatus::Unreachable));
        assert!(list.is_stale(later));
        assert!(list.is_revoked("LIC-1", "k").is_some());
    }

    #[tokio::test]
    async fn test_older_document_not_accepted() {
        let s = setup();
        let now = Utc::now();
        let source = Arc::new(MemoryCrlSource::with_bytes(signed_doc(
            &s,
            now,
            vec![RevocationEntry::license("LIC-1", RevocationReason::Fraud, now)],
        )));
        let mut list = RevocationList::new(source.clone(), s.trusted.clone(), Duration::days(1));
        list.load(now).await;

        source
            .replace(Some(signed_doc(&s, now - Duration::days(3), vec![])))
            .await;
        assert_eq!(list.load(now).await, CrlStatus::Rejected);
        assert!(list.is_revoked("LIC-1", "k").is_some());
    }

    #[tokio::test]
    async fn test_revoke_restore_roundtrip_through_file() {
        let s = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crl.json");
        let now = Utc::now();

        let mut admin = RevocationList::new(
            Arc::new(FileCrlSource::new(&path)),
            s.trusted.clone(),
            Duration::days(1),
        );
        admin
            .revoke(
                RevocationEntry::license("LIC-7", RevocationReason::Refund, now),
                "crl-k",
                &s.keypair,
                now,
                Duration::days(7),
            )
            .await
            .unwrap();

        let mut reader = RevocationList::new(
            Arc::new(FileCrlSource::new(&path)),
            s.trusted.clone(),
            Duration::days(1),
        );
        assert_eq!(reader.load(now).await, CrlStatus::Verified);
        assert!(reader.is_revoked("LIC-7", "k").is_some());

        let later = now + Duration::minutes(1);
        assert!(admin
            .restore("LIC-7", "crl-k", &s.keypair, later, Duration::days(7))
            .await
            .unwrap());
        assert!(!admin
            .restore("LIC-7", "crl-k", &s.keypair, later, Duration::days(7))
            .await
            .unwrap());

        assert_eq!(reader.load(later).await, CrlStatus::Verified);
        assert!(reader.is_revoked("LIC-7", "k").is_none());
        assert_eq!(reader.document().unwrap().issued_at, later);
    }

    #[tokio::test]
    async fn test_entry_without_ids_rejected() {
        let s = setup();
        let now = Utc::now();
        let mut admin = RevocationList::new(Arc::new(MemoryCrlSource::new()), s.trusted.clone(), Duration::days(1));
        let entry = RevocationEntry {
            license_id: None,
            kid: None,
            revoked_at: now,
            reason: RevocationReason::Other,
            serial: None,
        };
        assert!(matches!(
            admin.revoke(entry, "crl-k", &s.keypair, now, Duration::days(1)).await,
            Err(LicenseError::InvalidRevocationEntry(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_any_single_byte_mutation_fails(idx in any::<prop::sample::Index>(), delta in 1u8..=255) {
            let s = setup();
            let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
            let mut bytes = signed_doc(&s, now, vec![RevocationEntry::license("LIC-1", RevocationReason::Refund, now)]);
            let i = idx.index(bytes.len());
            bytes[i] = bytes[i].wrapping_add(delta);
            prop_assert!(RevocationDocument::verify(&bytes, &s.trusted).is_err());
        }
    }
}
