//! Test fixtures and helpers.
//!
//! [`VaultFixture`] lays out a complete vault in a temp directory the way an
//! issuer would: salt, signed license, signed revocation list, sealed media
//! and a sealed manifest. It derives keys the same way the license engine
//! does, so a trust core pointed at it unlocks.

use chrono::{DateTime, Duration, TimeZone, Utc};
use reelvault_core::{
    derive_master_key, derive_sub_key, Clock, Ed25519PublicKey, KdfParams, KeyPurpose, Keypair,
    ManualClock, SecretKey,
};
use reelvault_license::{
    DeviceIdentity, HardwareAttributes, LicenseEncoding, LicenseRecord, RevocationDocument,
    RevocationEntry, SignedLicense, StaticProbe, TrustedKeyTable,
};
use reelvault_vault::{
    seal_container_bytes, seal_legacy, Manifest, ManifestPayload, MediaMeta, CONTAINER_EXTENSION,
    MANIFEST_VERSION,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TEST_KID: &str = "test-issuer-1";
pub const TEST_LICENSE_ID: &str = "LIC-0001";
pub const TEST_SERIAL: &str = "RV-0001-A";

/// Fixed start time for fixture clocks: 2026-03-01T12:00:00Z.
pub fn fixture_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Hardware attributes of the fixture machine.
pub fn test_attributes() -> HardwareAttributes {
    HardwareAttributes {
        platform: "linux".into(),
        arch: "x86_64".into(),
        hostname: "screening-room".into(),
        cpu_model: "Test CPU @ 3.0GHz".into(),
        cpu_count: 8,
        total_ram_gb: 16,
    }
}

/// A probe that always reports [`test_attributes`].
pub fn test_probe() -> StaticProbe {
    StaticProbe(test_attributes())
}

/// The same machine with one attribute changed.
pub fn other_machine_probe() -> StaticProbe {
    StaticProbe(HardwareAttributes {
        hostname: "someone-elses-laptop".into(),
        ..test_attributes()
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Issuer
// ─────────────────────────────────────────────────────────────────────────────

/// An issuer keypair and the kid it signs under.
#[derive(Debug, Clone)]
pub struct IssuerFixture {
    pub kid: String,
    pub keypair: Keypair,
}

impl IssuerFixture {
    /// Random keypair under [`TEST_KID`].
    pub fn new() -> Self {
        Self {
            kid: TEST_KID.to_string(),
            keypair: Keypair::generate(),
        }
    }

    /// Deterministic keypair from seed.
    pub fn with_seed(kid: impl Into<String>, seed: [u8; 32]) -> Self {
        Self {
            kid: kid.into(),
            keypair: Keypair::from_seed(&seed),
        }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// A trust table containing only this issuer.
    pub fn trusted_keys(&self) -> TrustedKeyTable {
        TrustedKeyTable::from_entries(vec![(self.kid.clone(), self.public_key())])
    }

    /// Sign and encode a license.
    pub fn license_blob(&self, record: LicenseRecord, encoding: LicenseEncoding) -> Vec<u8> {
        SignedLicense::sign(record, &self.keypair)
            .and_then(|l| l.encode(encoding))
            .expect("license encodes")
    }

    /// A signed revocation list.
    pub fn crl_blob(&self, entries: Vec<RevocationEntry>, issued_at: DateTime<Utc>, validity: Duration) -> Vec<u8> {
        let mut doc = RevocationDocument::empty(self.kid.clone(), issued_at, validity);
        doc.revoked_licenses = entries;
        doc.sign(&self.keypair).expect("crl signs");
        doc.to_bytes().expect("crl serializes")
    }
}

impl Default for IssuerFixture {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vault
// ─────────────────────────────────────────────────────────────────────────────

/// A vault on disk plus everything needed to open it.
pub struct VaultFixture {
    dir: TempDir,
    pub issuer: IssuerFixture,
    pub clock: ManualClock,
    pub probe: StaticProbe,
    pub record: LicenseRecord,
    pub vault_salt: [u8; 16],
    pub kdf: KdfParams,
}

impl VaultFixture {
    /// An empty vault with a salt and a license record (not yet written)
    /// bound to [`test_probe`] and [`TEST_SERIAL`].
    pub async fn new() -> Self {
        Self::with_issuer(IssuerFixture::new()).await
    }

    pub async fn with_issuer(issuer: IssuerFixture) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = ManualClock::new(fixture_epoch());
        let probe = test_probe();
        let fingerprint = DeviceIdentity::compute(&probe).fingerprint().hash().to_string();

        let now = clock.now();
        let record = LicenseRecord {
            license_id: TEST_LICENSE_ID.into(),
            kid: issuer.kid.clone(),
            machine_fingerprint: fingerprint,
            removable_serial: Some(TEST_SERIAL.into()),
            issued_at: now - Duration::days(1),
            not_before: None,
            expiry: now + Duration::days(30),
            features: ["play", "subtitles", "chapters"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        let mut vault_salt = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut vault_salt);

        let fixture = Self {
            dir,
            issuer,
            clock,
            probe,
            record,
            vault_salt,
            kdf: KdfParams::insecure_for_tests(),
        };
        tokio::fs::create_dir_all(fixture.media_dir()).await.expect("media dir");
        tokio::fs::create_dir_all(fixture.state_dir()).await.expect("state dir");
        tokio::fs::write(fixture.root().join("vault.salt"), fixture.vault_salt)
            .await
            .expect("vault salt");
        fixture
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("vault")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.root().join("media")
    }

    pub fn license_path(&self) -> PathBuf {
        self.root().join("license.rvl")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root().join("catalog.rvmf")
    }

    pub fn crl_path(&self) -> PathBuf {
        self.root().join("revocations.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir().join("usage.ledger")
    }

    pub fn container_path(&self, id: &str) -> PathBuf {
        self.media_dir().join(format!("{id}.{CONTAINER_EXTENSION}"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keys
    // ─────────────────────────────────────────────────────────────────────────

    /// The master key an engine unlocking [`Self::record`] will derive.
    pub fn master_key(&self) -> SecretKey {
        self.master_key_for(&self.record)
    }

    pub fn master_key_for(&self, record: &LicenseRecord) -> SecretKey {
        derive_master_key(record.binding_secret().as_bytes(), &self.vault_salt, &self.kdf)
            .expect("master key")
    }

    /// A purpose key as the engine would derive it.
    pub fn derive_key(&self, purpose: KeyPurpose) -> SecretKey {
        derive_sub_key(&self.master_key(), self.record.license_id.as_bytes(), purpose).expect("sub key")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writers
    // ─────────────────────────────────────────────────────────────────────────

    /// Write [`Self::record`] as the compressed license.
    pub async fn write_license(&self) {
        let blob = self.issuer.license_blob(self.record.clone(), LicenseEncoding::Compressed);
        write(&self.license_path(), &blob).await;
    }

    /// Write an arbitrary signed license at the plain JSON location.
    pub async fn write_plain_license(&self, record: LicenseRecord, signer: &Keypair) {
        let blob = SignedLicense::sign(record, signer)
            .and_then(|l| l.encode(LicenseEncoding::Plain))
            .expect("license encodes");
        write(&self.root().join("license.json"), &blob).await;
    }

    /// Write a signed revocation list, valid for a week from the clock.
    pub async fn write_crl(&self, entries: Vec<RevocationEntry>) {
        let blob = self.issuer.crl_blob(entries, self.clock.now(), Duration::days(7));
        write(&self.crl_path(), &blob).await;
    }

    /// Seal plaintext into a container and return its catalog entry.
    pub async fn add_media(&self, id: &str, title: &str, plaintext: &[u8]) -> MediaMeta {
        let key = self.derive_key(KeyPurpose::Media);
        let container = seal_container_bytes(&key, plaintext).await.expect("seal container");
        write(&self.container_path(id), &container).await;
        media_meta(id, title, plaintext)
    }

    /// Same as [`Self::add_media`] with the headerless legacy layout.
    pub async fn add_legacy_media(&self, id: &str, title: &str, plaintext: &[u8]) -> MediaMeta {
        let key = self.derive_key(KeyPurpose::Media);
        let container = seal_legacy(&key, plaintext).expect("seal legacy");
        write(&self.container_path(id), &container).await;
        media_meta(id, title, plaintext)
    }

    /// Seal and sign a manifest listing `items`.
    pub async fn write_manifest(&self, items: Vec<MediaMeta>) {
        let payload = ManifestPayload {
            version: MANIFEST_VERSION,
            sealed_at: self.clock.now(),
            items,
        };
        let key = self.derive_key(KeyPurpose::Manifest);
        let bytes = Manifest::seal(&payload, &key, &self.issuer.keypair).expect("seal manifest");
        write(&self.manifest_path(), &bytes).await;
    }

    /// License, empty revocation list, the given media and a manifest.
    pub async fn publish(&self, media: &[(&str, &str, &[u8])]) -> Vec<MediaMeta> {
        self.write_license().await;
        self.write_crl(Vec::new()).await;
        let mut items = Vec::with_capacity(media.len());
        for (id, title, plaintext) in media {
            items.push(self.add_media(id, title, plaintext).await);
        }
        self.write_manifest(items.clone()).await;
        items
    }
}

/// A catalog entry for `plaintext`.
pub fn media_meta(id: &str, title: &str, plaintext: &[u8]) -> MediaMeta {
    MediaMeta {
        id: id.into(),
        title: title.into(),
        artist: None,
        content_hash: hex::encode(Sha256::digest(plaintext)),
        size: plaintext.len() as u64,
        duration_ms: None,
        extension: "mp4".into(),
    }
}

/// Deterministic pseudo-random content of `len` bytes.
pub fn sample_media(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}

async fn write(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.expect("create dir");
    }
    tokio::fs::write(path, bytes).await.expect("write fixture file");
}
