//! The trust core context object.
//!
//! One [`TrustCore`] owns the license engine, catalog, codec and ledger writer
//! for one vault. Hosts create it once and pass it by reference. Tests create a
//! fresh one per case.

use anyhow::Context;
use reelvault_core::{Clock, KeyPurpose};
use reelvault_ledger::{IntegrityReport, LedgerHandle, LedgerWriter, RecordOutcome, UsageLedger};
use reelvault_license::{
    CrlSource, DeviceFingerprint, DeviceIdentity, EngineState, FileCrlSource, HardwareProbe, LicenseEngine,
    RejectionReason, RevocationList, TrustedKeyTable, Verdict,
};
use reelvault_vault::{DecryptStream, MediaCodec, MediaMeta, Posture, StreamRange, VaultCatalog};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::VaultConfig;
use crate::error::{Result, TrustError};

/// Licensing, catalog, media and ledger for one vault.
pub struct TrustCore {
    config: VaultConfig,
    clock: Arc<dyn Clock>,
    engine: LicenseEngine,
    catalog: VaultCatalog,
    codec: MediaCodec,
    ledger: Option<LedgerHandle>,
}

impl std::fmt::Debug for TrustCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustCore")
            .field("root", &self.config.root)
            .field("state", &self.engine.state())
            .field("catalog_items", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl TrustCore {
    /// Build a core whose revocation list is read from `config.crl_path`.
    pub fn new(
        config: VaultConfig,
        probe: &dyn HardwareProbe,
        clock: Arc<dyn Clock>,
        trusted_keys: TrustedKeyTable,
    ) -> Result<Self> {
        let source = Arc::new(FileCrlSource::new(config.crl_path.clone()));
        Self::with_crl_source(config, probe, clock, trusted_keys, source)
    }

    /// Build a core with an explicit revocation source.
    pub fn with_crl_source(
        config: VaultConfig,
        probe: &dyn HardwareProbe,
        clock: Arc<dyn Clock>,
        trusted_keys: TrustedKeyTable,
        crl_source: Arc<dyn CrlSource>,
    ) -> Result<Self> {
        config.validate()?;
        let device = DeviceIdentity::compute(probe).with_removable_serial(config.removable_serial.clone());
        let revocations = RevocationList::new(
            crl_source,
            trusted_keys.clone(),
            config.revocation_config().refresh_interval,
        );
        let engine = LicenseEngine::new(
            config.engine_config(),
            trusted_keys,
            device,
            revocations,
            clock.clone(),
        );
        Ok(Self {
            catalog: VaultCatalog::new(config.manifest_path.clone()),
            codec: MediaCodec::new(config.codec_config()),
            ledger: None,
            engine,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn compute_fingerprint(&self) -> &DeviceFingerprint {
        self.engine.device().fingerprint()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate the license and, on success, open the catalog and ledger.
    pub async fn load_and_validate(&mut self) -> Result<Verdict> {
        self.close_session().await;
        let verdict = self.engine.load_and_validate().await?;
        if verdict.is_unlocked() {
            self.open_session().await?;
        }
        Ok(verdict)
    }

    /// Same checks as [`load_and_validate`](Self::load_and_validate), keyed by
    /// a passphrase instead of the license binding.
    pub async fn unlock_with_passphrase(&mut self, passphrase: &str) -> Result<Verdict> {
        self.close_session().await;
        let verdict = self.engine.unlock_with_passphrase(passphrase).await?;
        if verdict.is_unlocked() {
            self.open_session().await?;
        }
        Ok(verdict)
    }

    /// Seal the current session key under a passphrase.
    pub async fn enroll_passphrase(&self, passphrase: &str) -> Result<()> {
        Ok(self.engine.enroll_passphrase(passphrase).await?)
    }

    /// End the session: stop the ledger writer, drop the catalog, kill open
    /// streams and discard key material.
    pub async fn lock(&mut self) {
        self.close_session().await;
        self.engine.lock();
    }

    /// Host boundary. In production a rejection halts startup; in development
    /// the rejected verdict is returned and the host runs degraded.
    pub async fn startup(&mut self) -> anyhow::Result<Verdict> {
        let verdict = self
            .load_and_validate()
            .await
            .with_context(|| format!("unlocking vault at {}", self.config.root.display()))?;
        match (&verdict, self.config.posture) {
            (Verdict::Rejected(reason), Posture::Production) => {
                tracing::error!(reason = %reason, "licensing failed, halting");
                Err(anyhow::Error::new(TrustError::StartupHalted(reason.clone())))
            }
            (Verdict::Rejected(reason), Posture::Development) => {
                tracing::warn!(reason = %reason, "licensing failed, continuing in development posture");
                Ok(verdict)
            }
            (Verdict::Unlocked { .. }, _) => Ok(verdict),
        }
    }

    async fn open_session(&mut self) -> Result<()> {
        match self.try_open_session().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "vault session failed to open");
                self.lock().await;
                Err(e)
            }
        }
    }

    async fn try_open_session(&mut self) -> Result<()> {
        let issuer = self.engine.issuer_key().ok_or(TrustError::Locked)?;
        self.catalog.unlock(self.engine.derive_key(KeyPurpose::Manifest)?);
        let items = self.catalog.load(&issuer).await?;

        let ledger_key = self.engine.derive_key(KeyPurpose::Ledger)?;
        let ledger = UsageLedger::open(self.config.ledger_config(), ledger_key, self.clock.clone()).await?;
        self.ledger = Some(LedgerWriter::spawn(ledger));

        tracing::info!(items, "vault session open");
        Ok(())
    }

    async fn close_session(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            ledger.shutdown().await;
        }
        self.catalog.lock();
        self.codec.invalidate();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Produced interface
    // ─────────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn is_unlocked(&self) -> bool {
        self.engine.is_unlocked()
    }

    pub fn features(&self) -> BTreeSet<String> {
        self.engine.features()
    }

    pub fn is_feature_allowed(&self, feature: &str) -> bool {
        self.engine.is_feature_allowed(feature)
    }

    pub fn rejection_reason(&self) -> Option<&RejectionReason> {
        self.engine.rejection_reason()
    }

    /// Catalog entries, by title. Empty when locked.
    pub fn list_catalog(&self) -> Vec<&MediaMeta> {
        self.catalog.list()
    }

    pub fn lookup(&self, id: &str) -> Option<&MediaMeta> {
        self.catalog.lookup(id)
    }

    /// Open a plaintext stream over a catalog item.
    pub async fn open_decrypted_stream(&self, id: &str, range: StreamRange) -> Result<DecryptStream> {
        if !self.is_unlocked() {
            return Err(TrustError::Locked);
        }
        let meta = self
            .catalog
            .lookup(id)
            .ok_or_else(|| TrustError::UnknownMedia(id.to_string()))?;
        let media_key = self.engine.derive_key(KeyPurpose::Media)?;
        Ok(self.codec.open_decrypted_stream(meta, &media_key, range).await?)
    }

    /// Decrypt a whole item and check it against its catalog hash.
    pub async fn verify_media(&self, id: &str) -> Result<()> {
        if !self.is_unlocked() {
            return Err(TrustError::Locked);
        }
        let meta = self
            .catalog
            .lookup(id)
            .ok_or_else(|| TrustError::UnknownMedia(id.to_string()))?;
        let media_key = self.engine.derive_key(KeyPurpose::Media)?;
        Ok(self.codec.verify_content(meta, &media_key).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ledger
    // ─────────────────────────────────────────────────────────────────────────

    fn ledger_handle(&self) -> Result<&LedgerHandle> {
        self.ledger.as_ref().ok_or(TrustError::Locked)
    }

    /// Record the end of a playback.
    pub async fn record_play(&self, media_id: &str, played_ms: u64, session_id: &str) -> Result<RecordOutcome> {
        Ok(self
            .ledger_handle()?
            .record_play(media_id, played_ms, session_id)
            .await?)
    }

    pub async fn ledger_integrity(&self) -> Result<IntegrityReport> {
        Ok(self.ledger_handle()?.validate_integrity().await?)
    }

    /// A clone of the writer handle, for callers that record from other tasks.
    pub fn ledger(&self) -> Option<LedgerHandle> {
        self.ledger.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn engine(&self) -> &LicenseEngine {
        &self.engine
    }

    /// Mutable engine access, for revocation administration.
    pub fn engine_mut(&mut self) -> &mut LicenseEngine {
        &mut self.engine
    }
}
