//! In-memory catalog built from the manifest.
//!
//! The catalog is either fully loaded from a verified, decrypted manifest or
//! empty. A partially valid manifest is never exposed.

use chrono::{DateTime, Utc};
use reelvault_core::{fsutil, Ed25519PublicKey, SecretKey};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{CatalogError, CatalogResult};
use crate::manifest::{Manifest, MediaMeta, MANIFEST_VERSION};

/// Index of the vault's media.
#[derive(Debug)]
pub struct VaultCatalog {
    manifest_path: PathBuf,
    key: Option<SecretKey>,
    index: BTreeMap<String, MediaMeta>,
    sealed_at: Option<DateTime<Utc>>,
}

impl VaultCatalog {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            key: None,
            index: BTreeMap::new(),
            sealed_at: None,
        }
    }

    /// Hand the catalog the manifest key for this session.
    pub fn unlock(&mut self, manifest_key: SecretKey) {
        self.key = Some(manifest_key);
    }

    /// Drop the key and the index.
    pub fn lock(&mut self) {
        self.key = None;
        self.clear();
    }

    fn clear(&mut self) {
        self.index.clear();
        self.sealed_at = None;
    }

    /// Read, verify, decrypt and index the manifest. Returns the entry count.
    pub async fn load(&mut self, verifier: &Ed25519PublicKey) -> CatalogResult<usize> {
        self.clear();
        let key = self.key.as_ref().ok_or(CatalogError::Locked)?;

        let bytes = fsutil::read_optional(&self.manifest_path)
            .await?
            .ok_or(CatalogError::NotFound)?;

        let manifest = Manifest::parse(&bytes)?;
        manifest.verify(&bytes, verifier)?;
        let payload = manifest.decrypt(key)?;

        if payload.version != MANIFEST_VERSION {
            return Err(CatalogError::Malformed(format!(
                "unsupported payload version {}",
                payload.version
            )));
        }

        let mut index = BTreeMap::new();
        for item in payload.items {
            if item.id.is_empty() {
                return Err(CatalogError::Malformed("empty media id".into()));
            }
            if let Some(dup) = index.insert(item.id.clone(), item) {
                return Err(CatalogError::Malformed(format!("duplicate media id {}", dup.id)));
            }
        }

        tracing::info!(items = index.len(), sealed_at = %payload.sealed_at, "catalog loaded");
        self.index = index;
        self.sealed_at = Some(payload.sealed_at);
        Ok(self.index.len())
    }

    pub fn lookup(&self, id: &str) -> Option<&MediaMeta> {
        self.index.get(id)
    }

    /// All entries, ordered by title then id.
    pub fn list(&self) -> Vec<&MediaMeta> {
        let mut items: Vec<_> = self.index.values().collect();
        items.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        items
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn sealed_at(&self) -> Option<DateTime<Utc>> {
        self.sealed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestPayload;
    use reelvault_core::Keypair;

    fn meta(id: &str, title: &str) -> MediaMeta {
        MediaMeta {
            id: id.into(),
            title: title.into(),
            artist: Some("Studio".into()),
            content_hash: "ab".repeat(32),
            size: 10,
            duration_ms: None,
            extension: "mkv".into(),
        }
    }

    async fn write(dir: &std::path::Path, items: Vec<MediaMeta>, key: &SecretKey, signer: &Keypair) -> PathBuf {
        let path = dir.join("catalog.rvmf");
        let payload = ManifestPayload {
            version: 1,
            sealed_at: Utc::now(),
            items,
        };
        tokio::fs::write(&path, Manifest::seal(&payload, key, signer).unwrap())
            .await
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_lookup_list() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let signer = Keypair::generate();
        let path = write(dir.path(), vec![meta("b", "Zulu"), meta("a", "Alpha")], &key, &signer).await;

        let mut catalog = VaultCatalog::new(path);
        assert!(matches!(
            catalog.load(&signer.public_key()).await,
            Err(CatalogError::Locked)
        ));

        catalog.unlock(key);
        assert_eq!(catalog.load(&signer.public_key()).await.unwrap(), 2);
        assert_eq!(catalog.lookup("a").unwrap().title, "Alpha");
        assert!(catalog.lookup("zz").is_none());
        let titles: Vec<_> = catalog.list().iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, ["Alpha", "Zulu"]);

        catalog.lock();
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_failure_leaves_catalog_empty() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let signer = Keypair::generate();
        let path = write(dir.path(), vec![meta("a", "A")], &key, &signer).await;

        let mut catalog = VaultCatalog::new(&path);
        catalog.unlock(key.clone());
        catalog.load(&signer.public_key()).await.unwrap();
        assert_eq!(catalog.len(), 1);

        assert!(matches!(
            catalog.load(&Keypair::generate().public_key()).await,
            Err(CatalogError::SignatureInvalid)
        ));
        assert!(catalog.is_empty());

        catalog.unlock(SecretKey::generate());
        assert!(matches!(
            catalog.load(&signer.public_key()).await,
            Err(CatalogError::DecryptionFailed)
        ));
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let signer = Keypair::generate();
        let path = write(dir.path(), vec![meta("a", "A"), meta("a", "B")], &key, &signer).await;

        let mut catalog = VaultCatalog::new(path);
        catalog.unlock(key);
        assert!(matches!(
            catalog.load(&signer.public_key()).await,
            Err(CatalogError::Malformed(_))
        ));
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = VaultCatalog::new(dir.path().join("none"));
        catalog.unlock(SecretKey::generate());
        assert!(matches!(
            catalog.load(&Keypair::generate().public_key()).await,
            Err(CatalogError::NotFound)
        ));
    }
}
