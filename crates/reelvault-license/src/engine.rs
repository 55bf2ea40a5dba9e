//! The license engine: the unlock state machine.
//!
//! ```text
//! Locked ──load_and_validate / unlock_with_passphrase──▶ Validating
//! Validating ──all checks pass──▶ Unlocked
//! Validating ──first failing check──▶ Rejected(reason)
//! Unlocked | Rejected ──lock──▶ Locked
//! ```
//!
//! Validation runs these checks in order and stops at the first failure:
//!
//! 1. Trusted key table self-check (hard error, not a rejection)
//! 2. Clock rollback against the persisted watermark
//! 3. First structurally valid license candidate
//! 4. Signature, with the key selected by the license's `kid`
//! 5. Revocation by license id or key id
//! 6. Validity window `[notBefore, expiry]`
//! 7. Removable media binding, when media is present
//! 8. Machine fingerprint binding
//!
//! Key material exists only inside an [`Unlocked`](EngineState::Unlocked)
//! session and is zeroized when the session is dropped.

use chrono::{DateTime, Duration, Utc};
use reelvault_core::{
    derive_master_key, derive_sub_key, fsutil, Clock, Ed25519PublicKey, KdfParams, KeyPurpose,
    SecretKey,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::device::DeviceIdentity;
use crate::envelope::KeyEnvelope;
use crate::error::{LicenseError, Result};
use crate::license::{LicenseRecord, SignedLicense};
use crate::revocation::RevocationList;
use crate::trust::TrustedKeyTable;
use crate::verdict::{RejectionReason, Verdict};
use crate::watermark::WatermarkStore;

/// Salts shorter than this are refused.
pub const MIN_SALT_LEN: usize = 16;
const MAX_SALT_LEN: usize = 64;

/// Paths and tolerances the engine needs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// License locations, most preferred first.
    pub license_candidates: Vec<PathBuf>,
    /// Per-vault salt for the license-bound master key.
    pub vault_salt_path: PathBuf,
    /// Device-local passphrase envelope.
    pub key_envelope_path: PathBuf,
    /// Device-local salt for the passphrase KDF.
    pub device_salt_path: PathBuf,
    /// Device-local clock watermark.
    pub watermark_path: PathBuf,
    /// How far the clock may lag the watermark before it counts as rollback.
    pub clock_drift_tolerance: Duration,
    pub kdf: KdfParams,
}

impl EngineConfig {
    /// Default layout: license files and salt on the vault, state elsewhere.
    pub fn for_vault(vault_root: &Path, state_dir: &Path) -> Self {
        Self {
            license_candidates: vec![
                vault_root.join("license.rvl"),
                vault_root.join("license.json"),
            ],
            vault_salt_path: vault_root.join("vault.salt"),
            key_envelope_path: state_dir.join("key.envelope"),
            device_salt_path: state_dir.join("device.salt"),
            watermark_path: state_dir.join("watermark.json"),
            clock_drift_tolerance: Duration::minutes(5),
            kdf: KdfParams::default(),
        }
    }
}

/// Observable engine state. Never exposes key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Locked,
    Validating,
    Unlocked,
    Rejected(RejectionReason),
}

/// What an unlocked session holds.
struct UnlockedSession {
    record: LicenseRecord,
    issuer_key: Ed25519PublicKey,
    master_key: SecretKey,
}

enum Phase {
    Locked,
    Validating,
    Unlocked(UnlockedSession),
    Rejected(RejectionReason),
}

struct Validated {
    record: LicenseRecord,
    issuer_key: Ed25519PublicKey,
    now: DateTime<Utc>,
}

type Checked<T> = std::result::Result<T, RejectionReason>;

/// Validates licenses and owns the unlocked session.
pub struct LicenseEngine {
    config: EngineConfig,
    trusted: TrustedKeyTable,
    device: DeviceIdentity,
    revocations: RevocationList,
    watermark: WatermarkStore,
    clock: Arc<dyn Clock>,
    phase: Phase,
}

impl LicenseEngine {
    pub fn new(
        config: EngineConfig,
        trusted: TrustedKeyTable,
        device: DeviceIdentity,
        revocations: RevocationList,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let watermark = WatermarkStore::new(config.watermark_path.clone());
        Self {
            config,
            trusted,
            device,
            revocations,
            watermark,
            clock,
            phase: Phase::Locked,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Unlock paths
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate the license and, on success, derive the vault master key from
    /// the license binding.
    pub async fn load_and_validate(&mut self) -> Result<Verdict> {
        self.phase = Phase::Validating;
        tracing::debug!("validating license");
        let outcome = self.unlock_via_license().await;
        self.settle(outcome)
    }

    /// Validate the license, then open the vault master key from the
    /// passphrase envelope. Any authentication failure is `WrongPassphrase`.
    pub async fn unlock_with_passphrase(&mut self, passphrase: &str) -> Result<Verdict> {
        self.phase = Phase::Validating;
        tracing::debug!("validating license for passphrase unlock");
        let outcome = self.unlock_via_passphrase(passphrase).await;
        self.settle(outcome)
    }

    /// Discard the session and its keys.
    pub fn lock(&mut self) {
        if matches!(self.phase, Phase::Unlocked(_)) {
            tracing::info!("license engine locked");
        }
        self.phase = Phase::Locked;
    }

    async fn unlock_via_license(&mut self) -> Result<Checked<Verdict>> {
        let validated = match self.validate().await? {
            Ok(v) => v,
            Err(reason) => return Ok(Err(reason)),
        };
        let salt = read_salt(&self.config.vault_salt_path)
            .await?
            .ok_or_else(|| LicenseError::InvalidSalt(self.config.vault_salt_path.display().to_string()))?;
        let secret = Zeroizing::new(validated.record.binding_secret().into_bytes());
        let master = stretch(secret, salt, self.config.kdf).await?;
        self.enter_unlocked(validated, master).await.map(Ok)
    }

    async fn unlock_via_passphrase(&mut self, passphrase: &str) -> Result<Checked<Verdict>> {
        let validated = match self.validate().await? {
            Ok(v) => v,
            Err(reason) => return Ok(Err(reason)),
        };

        let Some(envelope) = fsutil::read_optional(&self.config.key_envelope_path).await? else {
            return Ok(Err(RejectionReason::NoKeyEnvelope));
        };
        let Some(device_salt) = read_salt(&self.config.device_salt_path).await? else {
            return Ok(Err(RejectionReason::NoKeyEnvelope));
        };
        let envelope = KeyEnvelope::from_bytes(&envelope)?;

        let kek =
            envelope_key(passphrase, device_salt, &validated.record.license_id, self.config.kdf).await?;
        match envelope.open(&kek) {
            Ok(master) => self.enter_unlocked(validated, master).await.map(Ok),
            Err(_) => {
                tracing::warn!("passphrase unlock failed");
                Ok(Err(RejectionReason::WrongPassphrase))
            }
        }
    }

    /// Seal the current master key under a passphrase for later
    /// [`unlock_with_passphrase`](Self::unlock_with_passphrase).
    pub async fn enroll_passphrase(&self, passphrase: &str) -> Result<()> {
        let session = self.session().ok_or(LicenseError::Locked)?;

        let device_salt = match read_salt(&self.config.device_salt_path).await? {
            Some(salt) => salt,
            None => {
                let mut salt = vec![0u8; MIN_SALT_LEN];
                rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut salt);
                fsutil::write_atomic(&self.config.device_salt_path, &salt).await?;
                salt
            }
        };
        let kek =
            envelope_key(passphrase, device_salt, &session.record.license_id, self.config.kdf).await?;
        let envelope = KeyEnvelope::seal(&session.master_key, &kek)?;
        fsutil::write_atomic(&self.config.key_envelope_path, &envelope.to_bytes()).await?;
        tracing::info!("passphrase enrolled");
        Ok(())
    }

    fn settle(&mut self, outcome: Result<Checked<Verdict>>) -> Result<Verdict> {
        match outcome {
            Ok(Ok(verdict)) => Ok(verdict),
            Ok(Err(reason)) => {
                tracing::warn!(reason = %reason, key = reason.message_key(), "license rejected");
                self.phase = Phase::Rejected(reason.clone());
                Ok(Verdict::Rejected(reason))
            }
            Err(e) => {
                tracing::error!(error = %e, "license validation aborted");
                self.phase = Phase::Locked;
                Err(e)
            }
        }
    }

    async fn enter_unlocked(&mut self, validated: Validated, master_key: SecretKey) -> Result<Verdict> {
        self.watermark.advance(validated.now).await?;

        let verdict = Verdict::Unlocked {
            license_id: validated.record.license_id.clone(),
            features: validated.record.features.clone(),
        };
        tracing::info!(
            license_id = %validated.record.license_id,
            kid = %validated.record.kid,
            expiry = %validated.record.expiry,
            "license unlocked"
        );
        self.phase = Phase::Unlocked(UnlockedSession {
            record: validated.record,
            issuer_key: validated.issuer_key,
            master_key,
        });
        Ok(verdict)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Checks
    // ─────────────────────────────────────────────────────────────────────────

    async fn validate(&mut self) -> Result<Checked<Validated>> {
        // 1. Engine integrity.
        self.trusted.self_check()?;

        // 2. Clock rollback.
        let now = self.clock.now();
        if let Some(watermark) = self
            .watermark
            .check(now, self.config.clock_drift_tolerance)
            .await?
        {
            return Ok(Err(RejectionReason::ClockRollback { now, watermark }));
        }

        // 3. First structurally valid candidate.
        let Some(license) = self.load_first_candidate().await else {
            return Ok(Err(RejectionReason::NoLicense));
        };
        let record = license.record();

        // 4. Signature under the declared key.
        let Some(issuer_key) = self.trusted.get(&record.kid).copied() else {
            return Ok(Err(RejectionReason::UnknownKeyId {
                kid: record.kid.clone(),
            }));
        };
        if license.verify(&issuer_key).is_err() {
            return Ok(Err(RejectionReason::SignatureInvalid));
        }

        // 5. Revocation.
        self.revocations.refresh_if_stale(now).await;
        if let Some(entry) = self.revocations.is_revoked(&record.license_id, &record.kid) {
            return Ok(Err(RejectionReason::Revoked {
                reason: entry.reason,
                revoked_at: entry.revoked_at,
            }));
        }

        // 6. Validity window.
        if let Some(not_before) = record.not_before {
            if now < not_before {
                return Ok(Err(RejectionReason::NotYetValid { not_before }));
            }
        }
        if now > record.expiry {
            return Ok(Err(RejectionReason::Expired {
                expiry: record.expiry,
            }));
        }

        // 7. Removable media, only when present.
        if let Some(bound) = &record.removable_serial {
            if self.device.removable_serial_matches(bound) == Some(false) {
                return Ok(Err(RejectionReason::MediaMismatch));
            }
        }

        // 8. Machine.
        if !self.device.fingerprint().matches(&record.machine_fingerprint) {
            return Ok(Err(RejectionReason::DeviceMismatch));
        }

        Ok(Ok(Validated {
            record: license.into_record(),
            issuer_key,
            now,
        }))
    }

    async fn load_first_candidate(&self) -> Option<SignedLicense> {
        for path in &self.config.license_candidates {
            let bytes = match fsutil::read_optional(path).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable license candidate");
                    continue;
                }
            };
            match SignedLicense::decode(&bytes) {
                Ok(license) => {
                    tracing::debug!(path = %path.display(), "using license candidate");
                    return Some(license);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed license");
                }
            }
        }
        None
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    fn session(&self) -> Option<&UnlockedSession> {
        match &self.phase {
            Phase::Unlocked(session) => Some(session),
            _ => None,
        }
    }

    pub fn state(&self) -> EngineState {
        match &self.phase {
            Phase::Locked => EngineState::Locked,
            Phase::Validating => EngineState::Validating,
            Phase::Unlocked(_) => EngineState::Unlocked,
            Phase::Rejected(reason) => EngineState::Rejected(reason.clone()),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.session().is_some()
    }

    /// Features granted by the unlocked license. Empty when locked.
    pub fn features(&self) -> BTreeSet<String> {
        self.session()
            .map(|s| s.record.features.clone())
            .unwrap_or_default()
    }

    pub fn is_feature_allowed(&self, feature: &str) -> bool {
        self.session()
            .map_or(false, |s| s.record.features.contains(feature))
    }

    pub fn rejection_reason(&self) -> Option<&RejectionReason> {
        match &self.phase {
            Phase::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn license(&self) -> Option<&LicenseRecord> {
        self.session().map(|s| &s.record)
    }

    /// Public key of the issuer that signed the unlocked license.
    pub fn issuer_key(&self) -> Option<Ed25519PublicKey> {
        self.session().map(|s| s.issuer_key)
    }

    /// Derive a purpose-scoped key from the session master key.
    pub fn derive_key(&self, purpose: KeyPurpose) -> Result<SecretKey> {
        let session = self.session().ok_or(LicenseError::Locked)?;
        Ok(derive_sub_key(
            &session.master_key,
            session.record.license_id.as_bytes(),
            purpose,
        )?)
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn revocations(&self) -> &RevocationList {
        &self.revocations
    }

    pub fn revocations_mut(&mut self) -> &mut RevocationList {
        &mut self.revocations
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Run scrypt on the blocking pool.
async fn stretch(secret: Zeroizing<Vec<u8>>, salt: Vec<u8>, params: KdfParams) -> Result<SecretKey> {
    tokio::task::spawn_blocking(move || derive_master_key(&secret, &salt, &params))
        .await
        .map_err(|e| LicenseError::Task(e.to_string()))?
        .map_err(LicenseError::from)
}

/// Key-encryption key for the passphrase envelope: the stretched passphrase,
/// narrowed to the envelope purpose and the license it was enrolled under.
async fn envelope_key(
    passphrase: &str,
    device_salt: Vec<u8>,
    license_id: &str,
    params: KdfParams,
) -> Result<SecretKey> {
    let secret = Zeroizing::new(passphrase.as_bytes().to_vec());
    let stretched = stretch(secret, device_salt, params).await?;
    Ok(derive_sub_key(&stretched, license_id.as_bytes(), KeyPurpose::KeyEnvelope)?)
}

async fn read_salt(path: &Path) -> Result<Option<Vec<u8>>> {
    let Some(salt) = fsutil::read_optional(path).await? else {
        return Ok(None);
    };
    if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&salt.len()) {
        return Err(LicenseError::InvalidSalt(path.display().to_string()));
    }
    Ok(Some(salt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HardwareAttributes, StaticProbe};
    use crate::license::LicenseEncoding;
    use crate::revocation::{MemoryCrlSource, RevocationEntry, RevocationReason};
    use reelvault_core::{Keypair, ManualClock};

    const KID: &str = "test-issuer";

    struct Harness {
        _dir: tempfile::TempDir,
        vault: PathBuf,
        state: PathBuf,
        issuer: Keypair,
        trusted: TrustedKeyTable,
        clock: ManualClock,
        crl: Arc<MemoryCrlSource>,
        device: DeviceIdentity,
    }

    fn attrs() -> HardwareAttributes {
        HardwareAttributes {
            platform: "linux".into(),
            arch: "x86_64".into(),
            hostname: "booth".into(),
            cpu_model: "cpu".into(),
            cpu_count: 4,
            total_ram_gb: 8,
        }
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault");
        let state = dir.path().join("state");
        tokio::fs::create_dir_all(&vault).await.unwrap();
        tokio::fs::write(vault.join("vault.salt"), [5u8; 16]).await.unwrap();

        let issuer = Keypair::from_seed(&[1u8; 32]);
        let trusted = TrustedKeyTable::from_entries(vec![(KID.to_string(), issuer.public_key())]);
        Harness {
            _dir: dir,
            vault,
            state,
            issuer,
            trusted,
            clock: ManualClock::new(Utc::now()),
            crl: Arc::new(MemoryCrlSource::new()),
            device: DeviceIdentity::compute(&StaticProbe(attrs()))
                .with_removable_serial(Some("SER-1".into())),
        }
    }

    impl Harness {
        fn record(&self) -> LicenseRecord {
            let now = self.clock.now();
            LicenseRecord {
                license_id: "LIC-100".into(),
                kid: KID.into(),
                machine_fingerprint: self.device.fingerprint().hash().to_string(),
                removable_serial: Some("SER-1".into()),
                issued_at: now,
                not_before: None,
                expiry: now + Duration::days(30),
                features: ["play".to_string(), "subtitles".to_string()].into_iter().collect(),
            }
        }

        async fn write_license(&self, record: LicenseRecord, signer: &Keypair) {
            let blob = SignedLicense::sign(record, signer)
                .unwrap()
                .encode(LicenseEncoding::Compressed)
                .unwrap();
            tokio::fs::write(self.vault.join("license.rvl"), blob).await.unwrap();
        }

        fn engine(&self) -> LicenseEngine {
            let mut config = EngineConfig::for_vault(&self.vault, &self.state);
            config.kdf = KdfParams::insecure_for_tests();
            LicenseEngine::new(
                config,
                self.trusted.clone(),
                self.device.clone(),
                RevocationList::new(self.crl.clone(), self.trusted.clone(), Duration::days(1)),
                Arc::new(self.clock.clone()),
            )
        }
    }

    fn reason(v: Verdict) -> RejectionReason {
        v.rejection().cloned().expect("expected rejection")
    }

    #[tokio::test]
    async fn test_valid_license_unlocks() {
        let h = harness().await;
        h.write_license(h.record(), &h.issuer).await;
        let mut engine = h.engine();

        let verdict = engine.load_and_validate().await.unwrap();
        assert!(verdict.is_unlocked());
        assert_eq!(engine.state(), EngineState::Unlocked);
        assert!(engine.is_feature_allowed("play"));
        assert!(engine.is_feature_allowed("subtitles"));
        assert!(!engine.is_feature_allowed("export"));
        assert_eq!(engine.issuer_key(), Some(h.issuer.public_key()));

        let manifest = engine.derive_key(KeyPurpose::Manifest).unwrap();
        let media = engine.derive_key(KeyPurpose::Media).unwrap();
        assert_ne!(manifest, media);
    }

    #[tokio::test]
    async fn test_lock_discards_keys() {
        let h = harness().await;
        h.write_license(h.record(), &h.issuer).await;
        let mut engine = h.engine();
        engine.load_and_validate().await.unwrap();

        engine.lock();
        assert_eq!(engine.state(), EngineState::Locked);
        assert!(matches!(
            engine.derive_key(KeyPurpose::Media),
            Err(LicenseError::Locked)
        ));
        assert!(engine.features().is_empty());
    }

    #[tokio::test]
    async fn test_same_master_key_across_sessions() {
        let h = harness().await;
        h.write_license(h.record(), &h.issuer).await;
        let mut a = h.engine();
        let mut b = h.engine();
        a.load_and_validate().await.unwrap();
        b.load_and_validate().await.unwrap();
        assert_eq!(
            a.derive_key(KeyPurpose::Ledger).unwrap(),
            b.derive_key(KeyPurpose::Ledger).unwrap()
        );
    }

    #[tokio::test]
    async fn test_no_license() {
        let h = harness().await;
        let mut engine = h.engine();
        assert_eq!(
            reason(engine.load_and_validate().await.unwrap()),
            RejectionReason::NoLicense
        );
        assert_eq!(engine.rejection_reason(), Some(&RejectionReason::NoLicense));
    }

    #[tokio::test]
    async fn test_malformed_candidate_falls_back() {
        let h = harness().await;
        tokio::fs::write(h.vault.join("license.rvl"), b"%%% not a license")
            .await
            .unwrap();
        let plain = SignedLicense::sign(h.record(), &h.issuer)
            .unwrap()
            .encode(LicenseEncoding::Plain)
            .unwrap();
        tokio::fs::write(h.vault.join("license.json"), plain).await.unwrap();

        let mut engine = h.engine();
        assert!(engine.load_and_validate().await.unwrap().is_unlocked());
    }

    #[tokio::test]
    async fn test_unknown_kid() {
        let h = harness().await;
        let mut record = h.record();
        record.kid = "someone-else".into();
        h.write_license(record, &h.issuer).await;
        assert_eq!(
            reason(h.engine().load_and_validate().await.unwrap()),
            RejectionReason::UnknownKeyId {
                kid: "someone-else".into()
            }
        );
    }

    #[tokio::test]
    async fn test_forged_signature() {
        let h = harness().await;
        h.write_license(h.record(), &Keypair::generate()).await;
        assert_eq!(
            reason(h.engine().load_and_validate().await.unwrap()),
            RejectionReason::SignatureInvalid
        );
    }

    #[tokio::test]
    async fn test_expired_regardless_of_signature() {
        let h = harness().await;
        let mut record = h.record();
        record.expiry = h.clock.now() - Duration::seconds(1);
        let expiry = record.expiry;
        h.write_license(record, &h.issuer).await;
        assert_eq!(
            reason(h.engine().load_and_validate().await.unwrap()),
            RejectionReason::Expired { expiry }
        );
    }

    #[tokio::test]
    async fn test_not_yet_valid() {
        let h = harness().await;
        let mut record = h.record();
        let nb = h.clock.now() + Duration::days(1);
        record.not_before = Some(nb);
        h.write_license(record, &h.issuer).await;
        assert_eq!(
            reason(h.engine().load_and_validate().await.unwrap()),
            RejectionReason::NotYetValid { not_before: nb }
        );
    }

    #[tokio::test]
    async fn test_device_and_media_mismatch_are_distinct() {
        let h = harness().await;
        let mut record = h.record();
        record.machine_fingerprint = "ffffffffffffffffffffffffffffffff".into();
        h.write_license(record, &h.issuer).await;
        assert_eq!(
            reason(h.engine().load_and_validate().await.unwrap()),
            RejectionReason::DeviceMismatch
        );

        let mut record = h.record();
        record.removable_serial = Some("SER-2".into());
        h.write_license(record, &h.issuer).await;
        assert_eq!(
            reason(h.engine().load_and_validate().await.unwrap()),
            RejectionReason::MediaMismatch
        );
    }

    #[tokio::test]
    async fn test_revoked_license() {
        let h = harness().await;
        h.write_license(h.record(), &h.issuer).await;
        let mut engine = h.engine();
        assert!(engine.load_and_validate().await.unwrap().is_unlocked());

        let now = h.clock.now();
        engine
            .revocations_mut()
            .revoke(
                RevocationEntry::license("LIC-100", RevocationReason::Refund, now),
                KID,
                &h.issuer,
                now,
                Duration::days(7),
            )
            .await
            .unwrap();

        let mut fresh = h.engine();
        assert!(matches!(
            reason(fresh.load_and_validate().await.unwrap()),
            RejectionReason::Revoked {
                reason: RevocationReason::Refund,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_clock_rollback_after_unlock() {
        let h = harness().await;
        h.write_license(h.record(), &h.issuer).await;
        let mut engine = h.engine();
        engine.load_and_validate().await.unwrap();

        h.clock.advance(Duration::minutes(-10));
        let mut again = h.engine();
        assert!(matches!(
            reason(again.load_and_validate().await.unwrap()),
            RejectionReason::ClockRollback { .. }
        ));

        h.clock.advance(Duration::minutes(7));
        assert!(h.engine().load_and_validate().await.unwrap().is_unlocked());
    }

    #[tokio::test]
    async fn test_tampered_table_is_hard_error() {
        let h = harness().await;
        h.write_license(h.record(), &h.issuer).await;
        let mut config = EngineConfig::for_vault(&h.vault, &h.state);
        config.kdf = KdfParams::insecure_for_tests();
        let empty = TrustedKeyTable::from_entries(Vec::new());
        let mut engine = LicenseEngine::new(
            config,
            empty.clone(),
            h.device.clone(),
            RevocationList::new(h.crl.clone(), empty, Duration::days(1)),
            Arc::new(h.clock.clone()),
        );
        assert!(matches!(
            engine.load_and_validate().await,
            Err(LicenseError::IntegrityCompromised(_))
        ));
        assert_eq!(engine.state(), EngineState::Locked);
    }

    #[tokio::test]
    async fn test_passphrase_unlock() {
        let h = harness().await;
        h.write_license(h.record(), &h.issuer).await;

        let mut engine = h.engine();
        assert!(engine.enroll_passphrase("hunter2").await.is_err());
        engine.load_and_validate().await.unwrap();
        let media = engine.derive_key(KeyPurpose::Media).unwrap();
        engine.enroll_passphrase("correct horse").await.unwrap();
        engine.lock();

        assert_eq!(
            reason(engine.unlock_with_passphrase("wrong horse").await.unwrap()),
            RejectionReason::WrongPassphrase
        );
        assert!(engine
            .unlock_with_passphrase("correct horse")
            .await
            .unwrap()
            .is_unlocked());
        assert_eq!(engine.derive_key(KeyPurpose::Media).unwrap(), media);
    }

    #[tokio::test]
    async fn test_passphrase_without_envelope() {
        let h = harness().await;
        h.write_license(h.record(), &h.issuer).await;
        assert_eq!(
            reason(h.engine().unlock_with_passphrase("x").await.unwrap()),
            RejectionReason::NoKeyEnvelope
        );
    }

    #[tokio::test]
    async fn test_envelope_key_scoped_to_license() {
        let salt = vec![7u8; MIN_SALT_LEN];
        let params = KdfParams::insecure_for_tests();
        let a = envelope_key("correct horse", salt.clone(), "LIC-1", params).await.unwrap();
        let b = envelope_key("correct horse", salt.clone(), "LIC-2", params).await.unwrap();
        assert_ne!(a, b);

        let stretched = derive_master_key(b"correct horse", &salt, &params).unwrap();
        assert_ne!(a, stretched);
        assert_eq!(
            a,
            derive_sub_key(&stretched, b"LIC-1", KeyPurpose::KeyEnvelope).unwrap()
        );
    }
}
