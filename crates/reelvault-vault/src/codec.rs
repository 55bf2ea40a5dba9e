//! Media resolution and lazy decrypt streams.

use bytes::{Bytes, BytesMut};
use reelvault_core::aead;
use reelvault_core::stream::{ChunkStage, OpenStage, Pipeline, SkipStage, TagVerifier, TakeStage};
use reelvault_core::SecretKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;

use crate::container::{parse_legacy, ContainerFormat};
use crate::error::{CodecError, CodecResult};
use crate::manifest::MediaMeta;

/// Encrypted container extension.
pub const CONTAINER_EXTENSION: &str = "rvm";
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Deployment posture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    #[default]
    Production,
    Development,
}

/// Codec configuration.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub media_dir: PathBuf,
    pub posture: Posture,
    /// Bytes read from disk per pull.
    pub chunk_size: usize,
}

impl CodecConfig {
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
            posture: Posture::Production,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// What kind of file a media id resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Encrypted,
    Plaintext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub path: PathBuf,
    pub kind: MediaKind,
}

/// Requested plaintext byte range. `end` is exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl StreamRange {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn starting_at(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Clamp to a plaintext of `len` bytes. Returns `(skip, take)`.
    fn clamp(&self, len: u64) -> CodecResult<(u64, u64)> {
        let end = self.end.map_or(len, |e| e.min(len));
        if self.start > len || (self.start == len && len != 0) || end < self.start {
            return Err(CodecError::RangeNotSatisfiable {
                start: self.start,
                len,
            });
        }
        Ok((self.start, end - self.start))
    }
}

/// Resolves media ids to files and opens decrypt streams.
///
/// Holds the session epoch. [`MediaCodec::invalidate`] bumps it, and every
/// stream opened under an earlier epoch fails its next pull.
#[derive(Debug)]
pub struct MediaCodec {
    config: CodecConfig,
    epoch: watch::Sender<u64>,
}

impl MediaCodec {
    pub fn new(config: CodecConfig) -> Self {
        let (epoch, _) = watch::channel(0);
        Self { config, epoch }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// End the current session for every open stream.
    pub fn invalidate(&self) {
        self.epoch.send_modify(|e| *e += 1);
    }

    /// Locate the file for a catalog entry.
    pub async fn resolve(&self, meta: &MediaMeta) -> CodecResult<ResolvedMedia> {
        if !is_plain_name(&meta.id) {
            return Err(CodecError::InvalidId(meta.id.clone()));
        }

        let sealed = self
            .config
            .media_dir
            .join(format!("{}.{CONTAINER_EXTENSION}", meta.id));
        if tokio::fs::try_exists(&sealed).await? {
            return Ok(ResolvedMedia {
                path: sealed,
                kind: MediaKind::Encrypted,
            });
        }

        if self.config.posture == Posture::Development && is_plain_name(&meta.extension) {
            let plain = self
                .config
                .media_dir
                .join(format!("{}.{}", meta.id, meta.extension));
            if tokio::fs::try_exists(&plain).await? {
                tracing::warn!(id = %meta.id, "serving plaintext media in development posture");
                return Ok(ResolvedMedia {
                    path: plain,
                    kind: MediaKind::Plaintext,
                });
            }
        }

        Err(CodecError::NotFound(meta.id.clone()))
    }

    /// Open a forward-only plaintext stream over `range`.
    ///
    /// For the current container layout the whole ciphertext is authenticated
    /// before this returns, so a tampered file yields an error and no bytes.
    pub async fn open_decrypted_stream(
        &self,
        meta: &MediaMeta,
        media_key: &SecretKey,
        range: StreamRange,
    ) -> CodecResult<DecryptStream> {
        let resolved = self.resolve(meta).await?;
        let mut file = open_file(&resolved.path, &meta.id).await?;
        let file_len = file.metadata().await?.len();
        let chunk_size = self.config.chunk_size.max(1);

        let (source, pipeline, source_len, skip, take) = match resolved.kind {
            MediaKind::Plaintext => {
                let (skip, take) = range.clamp(file_len)?;
                (Source::File(file), Pipeline::new(), file_len, skip, take)
            }
            MediaKind::Encrypted => match ContainerFormat::detect(&mut file, file_len).await? {
                ContainerFormat::Sealed(header) => {
                    let (skip, take) = range.clamp(header.ct_len)?;
                    let file_key = header.file_key(media_key)?;

                    file.seek(SeekFrom::Start(header.ct_offset)).await?;
                    let mut verifier = TagVerifier::new(&file_key, &header.nonce, &[], header.tag);
                    let mut left = header.ct_len;
                    while left > 0 {
                        let n = left.min(chunk_size as u64) as usize;
                        let mut buf = BytesMut::zeroed(n);
                        file.read_exact(&mut buf).await?;
                        verifier.apply(&mut buf)?;
                        left -= n as u64;
                    }
                    verifier.finish()?;

                    file.seek(SeekFrom::Start(header.ct_offset)).await?;
                    let opener = OpenStage::new(&file_key, &header.nonce, &[], header.tag);
                    (
                        Source::File(file),
                        Pipeline::new().then(opener),
                        header.ct_len,
                        skip,
                        take,
                    )
                }
                ContainerFormat::Legacy => {
                    let mut bytes = Vec::with_capacity(file_len as usize);
                    file.seek(SeekFrom::Start(0)).await?;
                    file.read_to_end(&mut bytes).await?;
                    let plain = aead::open(media_key, &parse_legacy(&bytes)?, &[])?;
                    let len = plain.len() as u64;
                    let (skip, take) = range.clamp(len)?;
                    tracing::debug!(id = %meta.id, "legacy container decrypted in memory");
                    (Source::Memory(Bytes::from(plain)), Pipeline::new(), len, skip, take)
                }
            },
        };

        tracing::debug!(id = %meta.id, kind = ?resolved.kind, skip, take, "decrypt stream opened");
        Ok(DecryptStream {
            source,
            pipeline: pipeline.then(SkipStage::new(skip)).then(TakeStage::new(take)),
            remaining: source_len,
            target: take,
            emitted: 0,
            chunk_size,
            epoch: self.epoch.subscribe(),
            done: false,
        })
    }

    /// Decrypt a whole item and compare it against the catalog's hash and size.
    pub async fn verify_content(&self, meta: &MediaMeta, media_key: &SecretKey) -> CodecResult<()> {
        let mut stream = self
            .open_decrypted_stream(meta, media_key, StreamRange::full())
            .await?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        while let Some(chunk) = stream.next_chunk().await? {
            size += chunk.len() as u64;
            hasher.update(&chunk);
        }
        let digest = hex::encode(hasher.finalize());
        if size != meta.size || !digest.eq_ignore_ascii_case(&meta.content_hash) {
            return Err(CodecError::ContentHashMismatch(meta.id.clone()));
        }
        Ok(())
    }
}

/// Ids and extensions become file names, so they must be plain names.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

async fn open_file(path: &Path, id: &str) -> CodecResult<File> {
    match File::open(path).await {
        Ok(f) => Ok(f),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CodecError::NotFound(id.to_string())),
        Err(e) => Err(e.into()),
    }
}

enum Source {
    File(File),
    Memory(Bytes),
}

impl Source {
    async fn read(&mut self, n: usize) -> CodecResult<BytesMut> {
        match self {
            Source::File(file) => {
                let mut buf = BytesMut::zeroed(n);
                file.read_exact(&mut buf).await?;
                Ok(buf)
            }
            Source::Memory(bytes) => Ok(BytesMut::from(&bytes.split_to(n)[..])),
        }
    }
}

/// Lazy, forward-only plaintext chunks. Dropping it closes the file.
pub struct DecryptStream {
    source: Source,
    pipeline: Pipeline,
    /// Source bytes not yet read.
    remaining: u64,
    /// Plaintext bytes this stream will emit.
    target: u64,
    emitted: u64,
    chunk_size: usize,
    epoch: watch::Receiver<u64>,
    done: bool,
}

impl std::fmt::Debug for DecryptStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptStream")
            .field("remaining", &self.remaining)
            .field("target", &self.target)
            .field("emitted", &self.emitted)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl DecryptStream {
    /// Plaintext length of the requested range.
    pub fn plaintext_len(&self) -> u64 {
        self.target
    }

    /// Next plaintext chunk, or `None` at the end.
    ///
    /// Reading to the end of the source re-checks the tag. An error there means
    /// the file changed after it was opened.
    pub async fn next_chunk(&mut self) -> CodecResult<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        if self.epoch.has_changed().unwrap_or(true) {
            self.done = true;
            return Err(CodecError::SessionLocked);
        }

        loop {
            if self.remaining == 0 {
                self.done = true;
                self.pipeline.finish()?;
                return Ok(None);
            }
            if self.emitted >= self.target {
                // past the range end; the rest is never decrypted
                self.done = true;
                return Ok(None);
            }

            let n = self.remaining.min(self.chunk_size as u64) as usize;
            let mut chunk = match self.source.read(n).await {
                Ok(c) => c,
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            };
            self.remaining -= n as u64;
            if let Err(e) = self.pipeline.apply(&mut chunk) {
                self.done = true;
                return Err(e.into());
            }
            if chunk.is_empty() {
                continue;
            }
            self.emitted += chunk.len() as u64;
            return Ok(Some(chunk.freeze()));
        }
    }

    /// Drain the stream into one buffer.
    pub async fn read_to_end(&mut self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.target as usize);
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{seal_container_bytes, seal_legacy};
    use std::io::{Seek, Write};

    fn meta(id: &str, plain: &[u8]) -> MediaMeta {
        MediaMeta {
            id: id.into(),
            title: id.into(),
            artist: None,
            content_hash: hex::encode(Sha256::digest(plain)),
            size: plain.len() as u64,
            duration_ms: None,
            extension: "mp4".into(),
        }
    }

    fn codec(dir: &Path, posture: Posture, chunk_size: usize) -> MediaCodec {
        MediaCodec::new(CodecConfig {
            media_dir: dir.to_path_buf(),
            posture,
            chunk_size,
        })
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    async fn install(dir: &Path, id: &str, key: &SecretKey, plain: &[u8]) {
        let bytes = seal_container_bytes(key, plain).await.unwrap();
        tokio::fs::write(dir.join(format!("{id}.rvm")), bytes).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_stream_in_small_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let plain = sample(1000);
        install(dir.path(), "ep1", &key, &plain).await;

        let codec = codec(dir.path(), Posture::Production, 7);
        let mut stream = codec
            .open_decrypted_stream(&meta("ep1", &plain), &key, StreamRange::full())
            .await
            .unwrap();
        assert_eq!(stream.plaintext_len(), 1000);

        let first = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.len(), 7);
        let mut out = first.to_vec();
        out.extend(stream.read_to_end().await.unwrap());
        assert_eq!(out, plain);
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_range_discards_prefix_and_stops_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let plain = sample(500);
        install(dir.path(), "ep1", &key, &plain).await;
        let codec = codec(dir.path(), Posture::Production, 64);
        let m = meta("ep1", &plain);

        let mut mid = codec
            .open_decrypted_stream(&m, &key, StreamRange::bounded(100, 230))
            .await
            .unwrap();
        assert_eq!(mid.plaintext_len(), 130);
        assert_eq!(mid.read_to_end().await.unwrap(), &plain[100..230]);

        let mut tail = codec
            .open_decrypted_stream(&m, &key, StreamRange::starting_at(490))
            .await
            .unwrap();
        assert_eq!(tail.read_to_end().await.unwrap(), &plain[490..]);

        assert!(matches!(
            codec.open_decrypted_stream(&m, &key, StreamRange::starting_at(500)).await,
            Err(CodecError::RangeNotSatisfiable { start: 500, len: 500 })
        ));
    }

    #[tokio::test]
    async fn test_empty_media() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        install(dir.path(), "empty", &key, b"").await;
        let codec = codec(dir.path(), Posture::Production, 64);
        let mut stream = codec
            .open_decrypted_stream(&meta("empty", b""), &key, StreamRange::full())
            .await
            .unwrap();
        assert!(stream.read_to_end().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_tag_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let plain = sample(300);
        let mut bytes = seal_container_bytes(&key, &plain).await.unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        tokio::fs::write(dir.path().join("ep1.rvm"), bytes).await.unwrap();

        let codec = codec(dir.path(), Posture::Production, 64);
        assert!(matches!(
            codec.open_decrypted_stream(&meta("ep1", &plain), &key, StreamRange::full()).await,
            Err(CodecError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_wrong_key_yields_no_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let plain = sample(64);
        install(dir.path(), "ep1", &SecretKey::generate(), &plain).await;
        let codec = codec(dir.path(), Posture::Production, 64);
        assert!(matches!(
            codec
                .open_decrypted_stream(&meta("ep1", &plain), &SecretKey::generate(), StreamRange::full())
                .await,
            Err(CodecError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_modified_after_open_fails_final_pull() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let plain = sample(200);
        install(dir.path(), "ep1", &key, &plain).await;
        let path = dir.path().join("ep1.rvm");

        let codec = codec(dir.path(), Posture::Production, 1024);
        let mut stream = codec
            .open_decrypted_stream(&meta("ep1", &plain), &key, StreamRange::full())
            .await
            .unwrap();

        // flip one ciphertext byte in place, same inode
        let mut f = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let ct_offset = 4 + 1 + 4 + 16 + 4 + 12 + 4;
        f.seek(SeekFrom::Start(ct_offset + 5)).unwrap();
        f.write_all(&[0xAA]).unwrap();
        f.sync_all().unwrap();

        assert!(matches!(
            stream.read_to_end().await,
            Err(CodecError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_legacy_container() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let plain = sample(150);
        tokio::fs::write(dir.path().join("old.rvm"), seal_legacy(&key, &plain).unwrap())
            .await
            .unwrap();

        let codec = codec(dir.path(), Posture::Production, 40);
        let m = meta("old", &plain);
        let mut stream = codec
            .open_decrypted_stream(&m, &key, StreamRange::bounded(10, 100))
            .await
            .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), &plain[10..100]);
        codec.verify_content(&m, &key).await.unwrap();

        assert!(matches!(
            codec.open_decrypted_stream(&m, &SecretKey::generate(), StreamRange::full()).await,
            Err(CodecError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_plaintext_fallback_only_in_development() {
        let dir = tempfile::tempdir().unwrap();
        let plain = b"raw frames".to_vec();
        tokio::fs::write(dir.path().join("dev.mp4"), &plain).await.unwrap();
        let m = meta("dev", &plain);
        let key = SecretKey::generate();

        let prod = codec(dir.path(), Posture::Production, 64);
        assert!(matches!(prod.resolve(&m).await, Err(CodecError::NotFound(_))));

        let dev = codec(dir.path(), Posture::Development, 4);
        assert_eq!(dev.resolve(&m).await.unwrap().kind, MediaKind::Plaintext);
        let mut stream = dev.open_decrypted_stream(&m, &key, StreamRange::full()).await.unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), plain);
    }

    #[tokio::test]
    async fn test_encrypted_preferred_over_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        install(dir.path(), "both", &key, b"sealed").await;
        tokio::fs::write(dir.path().join("both.mp4"), b"plain").await.unwrap();
        let dev = codec(dir.path(), Posture::Development, 64);
        assert_eq!(
            dev.resolve(&meta("both", b"sealed")).await.unwrap().kind,
            MediaKind::Encrypted
        );
    }

    #[tokio::test]
    async fn test_path_like_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let codec = codec(dir.path(), Posture::Development, 64);
        for id in ["../secret", "a/b", "", ".hidden"] {
            assert!(matches!(
                codec.resolve(&meta(id, b"")).await,
                Err(CodecError::InvalidId(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_invalidate_kills_open_streams() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let plain = sample(100);
        install(dir.path(), "ep1", &key, &plain).await;
        let codec = codec(dir.path(), Posture::Production, 10);
        let mut stream = codec
            .open_decrypted_stream(&meta("ep1", &plain), &key, StreamRange::full())
            .await
            .unwrap();
        assert!(stream.next_chunk().await.unwrap().is_some());

        codec.invalidate();
        assert!(matches!(stream.next_chunk().await, Err(CodecError::SessionLocked)));
        assert!(stream.next_chunk().await.unwrap().is_none());

        let mut fresh = codec
            .open_decrypted_stream(&meta("ep1", &plain), &key, StreamRange::full())
            .await
            .unwrap();
        assert_eq!(fresh.read_to_end().await.unwrap(), plain);
    }

    #[tokio::test]
    async fn test_verify_content_detects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let key = SecretKey::generate();
        let plain = sample(90);
        install(dir.path(), "ep1", &key, &plain).await;
        let codec = codec(dir.path(), Posture::Production, 32);

        codec.verify_content(&meta("ep1", &plain), &key).await.unwrap();
        let mut wrong = meta("ep1", &plain);
        wrong.content_hash = "00".repeat(32);
        assert!(matches!(
            codec.verify_content(&wrong, &key).await,
            Err(CodecError::ContentHashMismatch(_))
        ));
    }
}
