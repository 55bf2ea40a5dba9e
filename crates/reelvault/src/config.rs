//! Vault configuration.
//!
//! The on-media layout is fixed relative to the vault root. Device-local state
//! (watermark, ledger, passphrase envelope) lives in a separate state
//! directory. A TOML file may relocate the root and state directory and tune
//! tolerances:
//!
//! ```toml
//! root = "/media/vault"
//! state_dir = "/var/lib/reelvault"
//! posture = "production"
//! burst_threshold = 10
//!
//! [kdf]
//! log_n = 15
//! r = 8
//! p = 1
//! ```

use chrono::Duration;
use reelvault_core::kdf::MIN_LOG_N;
use reelvault_core::KdfParams;
use reelvault_ledger::LedgerConfig;
use reelvault_license::EngineConfig;
use reelvault_vault::{CodecConfig, Posture, DEFAULT_CHUNK_SIZE};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrustError};

/// Everything the trust core needs to know about where things live.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultConfig {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub posture: Posture,

    pub license_candidates: Vec<PathBuf>,
    pub crl_path: PathBuf,
    pub manifest_path: PathBuf,
    pub media_dir: PathBuf,
    pub vault_salt_path: PathBuf,

    pub key_envelope_path: PathBuf,
    pub device_salt_path: PathBuf,
    pub watermark_path: PathBuf,
    pub ledger_path: PathBuf,

    /// Serial of the removable media the vault was mounted from, if the host
    /// could read one.
    pub removable_serial: Option<String>,

    pub clock_drift_tolerance_secs: i64,
    pub future_skew_tolerance_secs: i64,
    pub burst_threshold: usize,
    pub burst_window_secs: i64,
    pub crl_refresh_interval_secs: i64,
    pub ledger_retention_per_item: Option<usize>,

    pub kdf: KdfParams,
    pub chunk_size: usize,
}

impl VaultConfig {
    /// Standard layout under `root`, with state in `root/.state`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".state");
        let engine = EngineConfig::for_vault(&root, &state_dir);
        Self {
            license_candidates: engine.license_candidates,
            crl_path: root.join("revocations.json"),
            manifest_path: root.join("catalog.rvmf"),
            media_dir: root.join("media"),
            vault_salt_path: engine.vault_salt_path,
            key_envelope_path: engine.key_envelope_path,
            device_salt_path: engine.device_salt_path,
            watermark_path: engine.watermark_path,
            ledger_path: state_dir.join("usage.ledger"),
            removable_serial: None,
            posture: Posture::Production,
            clock_drift_tolerance_secs: 300,
            future_skew_tolerance_secs: 300,
            burst_threshold: 10,
            burst_window_secs: 60,
            crl_refresh_interval_secs: 86_400,
            ledger_retention_per_item: Some(1_000),
            kdf: KdfParams::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            root,
            state_dir,
        }
    }

    /// Move every device-local file into `state_dir`.
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let engine = EngineConfig::for_vault(&self.root, &state_dir);
        self.key_envelope_path = engine.key_envelope_path;
        self.device_salt_path = engine.device_salt_path;
        self.watermark_path = engine.watermark_path;
        self.ledger_path = state_dir.join("usage.ledger");
        self.state_dir = state_dir;
        self
    }

    pub fn with_posture(mut self, posture: Posture) -> Self {
        self.posture = posture;
        self
    }

    pub fn with_removable_serial(mut self, serial: Option<String>) -> Self {
        self.removable_serial = serial;
        self
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(s).map_err(|e| TrustError::Config(e.to_string()))?;
        file.into_config()
    }

    /// Read and parse a TOML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TrustError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Reject settings that would weaken production.
    pub fn validate(&self) -> Result<()> {
        if self.posture == Posture::Production && self.kdf.log_n < MIN_LOG_N {
            return Err(TrustError::Config(format!(
                "kdf log_n {} below {MIN_LOG_N} in production",
                self.kdf.log_n
            )));
        }
        if self.burst_threshold == 0 || self.burst_window_secs <= 0 {
            return Err(TrustError::Config("burst detection needs a positive threshold and window".into()));
        }
        if self.clock_drift_tolerance_secs < 0 || self.future_skew_tolerance_secs < 0 {
            return Err(TrustError::Config("tolerances must not be negative".into()));
        }
        if self.license_candidates.is_empty() {
            return Err(TrustError::Config("no license locations".into()));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subsystem views
    // ─────────────────────────────────────────────────────────────────────────

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            license_candidates: self.license_candidates.clone(),
            vault_salt_path: self.vault_salt_path.clone(),
            key_envelope_path: self.key_envelope_path.clone(),
            device_salt_path: self.device_salt_path.clone(),
            watermark_path: self.watermark_path.clone(),
            clock_drift_tolerance: Duration::seconds(self.clock_drift_tolerance_secs),
            kdf: self.kdf,
        }
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            media_dir: self.media_dir.clone(),
            posture: self.posture,
            chunk_size: self.chunk_size,
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            path: self.ledger_path.clone(),
            future_skew_tolerance: Duration::seconds(self.future_skew_tolerance_secs),
            burst_threshold: self.burst_threshold,
            burst_window: Duration::seconds(self.burst_window_secs),
            retention_per_item: self.ledger_retention_per_item,
        }
    }

    pub fn revocation_config(&self) -> RevocationConfig {
        RevocationConfig {
            crl_path: self.crl_path.clone(),
            refresh_interval: Duration::seconds(self.crl_refresh_interval_secs),
        }
    }
}

/// Where the revocation list lives and how often to reload it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationConfig {
    pub crl_path: PathBuf,
    pub refresh_interval: Duration,
}

/// TOML shape. Everything but `root` is optional.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    root: PathBuf,
    state_dir: Option<PathBuf>,
    posture: Option<Posture>,
    removable_serial: Option<String>,
    clock_drift_tolerance_secs: Option<i64>,
    future_skew_tolerance_secs: Option<i64>,
    burst_threshold: Option<usize>,
    burst_window_secs: Option<i64>,
    crl_refresh_interval_secs: Option<i64>,
    ledger_retention_per_item: Option<usize>,
    kdf: Option<KdfParams>,
    chunk_size: Option<usize>,
}

impl ConfigFile {
    fn into_config(self) -> Result<VaultConfig> {
        let mut config = VaultConfig::for_root(self.root);
        if let Some(dir) = self.state_dir {
            config = config.with_state_dir(dir);
        }
        if let Some(posture) = self.posture {
            config.posture = posture;
        }
        config.removable_serial = self.removable_serial;
        if let Some(v) = self.clock_drift_tolerance_secs {
            config.clock_drift_tolerance_secs = v;
        }
        if let Some(v) = self.future_skew_tolerance_secs {
            config.future_skew_tolerance_secs = v;
        }
        if let Some(v) = self.burst_threshold {
            config.burst_threshold = v;
        }
        if let Some(v) = self.burst_window_secs {
            config.burst_window_secs = v;
        }
        if let Some(v) = self.crl_refresh_interval_secs {
            config.crl_refresh_interval_secs = v;
        }
        if self.ledger_retention_per_item.is_some() {
            config.ledger_retention_per_item = self.ledger_retention_per_item;
        }
        if let Some(kdf) = self.kdf {
            config.kdf = kdf;
        }
        if let Some(v) = self.chunk_size {
            config.chunk_size = v.max(1);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let c = VaultConfig::for_root("/media/vault");
        assert_eq!(c.license_candidates[0], PathBuf::from("/media/vault/license.rvl"));
        assert_eq!(c.license_candidates[1], PathBuf::from("/media/vault/license.json"));
        assert_eq!(c.media_dir, PathBuf::from("/media/vault/media"));
        assert_eq!(c.ledger_path, PathBuf::from("/media/vault/.state/usage.ledger"));
        assert_eq!(c.posture, Posture::Production);
        c.validate().unwrap();

        let moved = c.with_state_dir("/var/lib/rv");
        assert_eq!(moved.watermark_path, PathBuf::from("/var/lib/rv/watermark.json"));
        assert_eq!(moved.ledger_path, PathBuf::from("/var/lib/rv/usage.ledger"));
        assert_eq!(moved.manifest_path, PathBuf::from("/media/vault/catalog.rvmf"));
    }

    #[test]
    fn test_toml_overrides() {
        let c = VaultConfig::from_toml_str(
            r#"
            root = "/mnt/v"
            state_dir = "/tmp/state"
            posture = "development"
            burst_threshold = 3

            [kdf]
            log_n = 4
            r = 8
            p = 1
            "#,
        )
        .unwrap();
        assert_eq!(c.posture, Posture::Development);
        assert_eq!(c.burst_threshold, 3);
        assert_eq!(c.kdf.log_n, 4);
        assert_eq!(c.device_salt_path, PathBuf::from("/tmp/state/device.salt"));
        assert_eq!(c.ledger_config().burst_threshold, 3);
        assert_eq!(c.codec_config().posture, Posture::Development);
    }

    #[test]
    fn test_weak_kdf_refused_in_production() {
        let err = VaultConfig::from_toml_str(
            r#"
            root = "/mnt/v"
            [kdf]
            log_n = 4
            r = 8
            p = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, TrustError::Config(_)));
    }

    #[test]
    fn test_unknown_key_refused() {
        assert!(VaultConfig::from_toml_str("root = \"/v\"\nbogus = 1\n").is_err());
    }
}
