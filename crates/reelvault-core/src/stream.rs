//! Chunked AEAD stages.
//!
//! A decrypt or encrypt pipeline is a sequence of [`ChunkStage`]s applied in
//! order to each chunk of a byte stream. Every stage declares how its output
//! length relates to its input, so a consumer can tell whether a pipeline may
//! shrink data (seek stages) or only transforms it in place (cipher stages).
//!
//! The cipher stages implement RFC 8439 ChaCha20-Poly1305 incrementally. Their
//! output is byte-identical to the one-shot [`crate::aead`] functions, which
//! lets a container be produced in one pass and verified in bounded memory.
//!
//! ## Fail-closed decryption
//!
//! [`OpenStage`] releases plaintext before the tag has been checked. A caller
//! that must not emit unauthenticated bytes first runs a [`TagVerifier`] pass
//! over the ciphertext and only then an [`OpenStage`] pass.

use bytes::{Buf, BytesMut};
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use poly1305::universal_hash::{KeyInit, UniversalHash};
use poly1305::Poly1305;

use crate::aead::{Nonce, Tag};
use crate::crypto::SecretKey;
use crate::error::{CoreError, Result};

const BLOCK: usize = 16;

/// How a stage's output length relates to its input length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthRelation {
    /// Output has exactly the input length.
    Preserving,
    /// Output is at most the input length.
    Shrinking,
}

/// A transform applied to each chunk of a stream, in order.
pub trait ChunkStage: Send {
    /// Declared length relation of this stage.
    fn length_relation(&self) -> LengthRelation;

    /// Transform one chunk in place.
    fn apply(&mut self, chunk: &mut BytesMut) -> Result<()>;

    /// Called once after the last chunk.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Poly1305 accumulator
// ─────────────────────────────────────────────────────────────────────────────

/// Incremental Poly1305 over arbitrary chunk boundaries.
struct Authenticator {
    mac: Option<Poly1305>,
    pending: [u8; BLOCK],
    pending_len: usize,
    aad_len: u64,
    ct_len: u64,
}

impl Authenticator {
    /// Take the one-time key from keystream block 0 and move the cipher to block 1.
    fn new(cipher: &mut ChaCha20, aad: &[u8]) -> Self {
        let mut mac_key = poly1305::Key::default();
        cipher.apply_keystream(&mut mac_key);
        cipher.seek(64u64);

        let mut mac = Poly1305::new(&mac_key);
        mac.update_padded(aad);

        Self {
            mac: Some(mac),
            pending: [0u8; BLOCK],
            pending_len: 0,
            aad_len: aad.len() as u64,
            ct_len: 0,
        }
    }

    fn absorb(&mut self, mut data: &[u8]) -> Result<()> {
        let mac = self.mac.as_mut().ok_or(CoreError::StageFinished)?;
        self.ct_len += data.len() as u64;

        if self.pending_len > 0 {
            let take = (BLOCK - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < BLOCK {
                return Ok(());
            }
            mac.update_padded(&self.pending);
            self.pending_len = 0;
        }

        let full = data.len() - data.len() % BLOCK;
        mac.update_padded(&data[..full]);

        let rest = &data[full..];
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
        Ok(())
    }

    /// Pad the tail, append the lengths block, and hand back the MAC.
    fn close(&mut self) -> Result<Poly1305> {
        let mut mac = self.mac.take().ok_or(CoreError::StageFinished)?;
        if self.pending_len > 0 {
            mac.update_padded(&self.pending[..self.pending_len]);
        }
        let mut lengths = poly1305::Block::default();
        lengths[..8].copy_from_slice(&self.aad_len.to_le_bytes());
        lengths[8..].copy_from_slice(&self.ct_len.to_le_bytes());
        mac.update(&[lengths]);
        Ok(mac)
    }

    fn finalize(&mut self) -> Result<Tag> {
        let tag = self.close()?.finalize();
        Tag::from_slice(tag.as_slice())
    }

    fn verify(&mut self, expected: &Tag) -> Result<()> {
        let expected = poly1305::Block::clone_from_slice(expected.as_bytes());
        self.close()?
            .verify(&expected)
            .map_err(|_| CoreError::AuthenticationFailed)
    }
}

fn keystream(key: &SecretKey, nonce: &Nonce) -> ChaCha20 {
    ChaCha20::new(key.as_bytes().into(), nonce.as_bytes().into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Cipher stages
// ─────────────────────────────────────────────────────────────────────────────

/// Encrypt, then authenticate each chunk. The tag is available after `finish`.
pub struct SealStage {
    cipher: ChaCha20,
    auth: Authenticator,
    tag: Option<Tag>,
}

impl SealStage {
    pub fn new(key: &SecretKey, nonce: &Nonce, aad: &[u8]) -> Self {
        let mut cipher = keystream(key, nonce);
        let auth = Authenticator::new(&mut cipher, aad);
        Self {
            cipher,
            auth,
            tag: None,
        }
    }

    /// The tag, once the stage has been finished.
    pub fn tag(&self) -> Option<Tag> {
        self.tag
    }
}

impl ChunkStage for SealStage {
    fn length_relation(&self) -> LengthRelation {
        LengthRelation::Preserving
    }

    fn apply(&mut self, chunk: &mut BytesMut) -> Result<()> {
        if self.tag.is_some() {
            return Err(CoreError::StageFinished);
        }
        self.cipher.apply_keystream(chunk);
        self.auth.absorb(chunk)
    }

    fn finish(&mut self) -> Result<()> {
        self.tag = Some(self.auth.finalize()?);
        Ok(())
    }
}

/// Authenticate, then decrypt each chunk. `finish` fails on tag mismatch.
pub struct OpenStage {
    cipher: ChaCha20,
    auth: Authenticator,
    expected: Tag,
}

impl OpenStage {
    pub fn new(key: &SecretKey, nonce: &Nonce, aad: &[u8], expected: Tag) -> Self {
        let mut cipher = keystream(key, nonce);
        let auth = Authenticator::new(&mut cipher, aad);
        Self {
            cipher,
            auth,
            expected,
        }
    }
}

impl ChunkStage for OpenStage {
    fn length_relation(&self) -> LengthRelation {
        LengthRelation::Preserving
    }

    fn apply(&mut self, chunk: &mut BytesMut) -> Result<()> {
        self.auth.absorb(chunk)?;
        self.cipher.apply_keystream(chunk);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.auth.verify(&self.expected)
    }
}

/// Authenticate ciphertext without producing any plaintext.
pub struct TagVerifier {
    auth: Authenticator,
    expected: Tag,
}

impl TagVerifier {
    pub fn new(key: &SecretKey, nonce: &Nonce, aad: &[u8], expected: Tag) -> Self {
        let mut cipher = keystream(key, nonce);
        let auth = Authenticator::new(&mut cipher, aad);
        Self { auth, expected }
    }
}

impl ChunkStage for TagVerifier {
    fn length_relation(&self) -> LengthRelation {
        LengthRelation::Preserving
    }

    fn apply(&mut self, chunk: &mut BytesMut) -> Result<()> {
        self.auth.absorb(chunk)
    }

    fn finish(&mut self) -> Result<()> {
        self.auth.verify(&self.expected)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Range stages
// ─────────────────────────────────────────────────────────────────────────────

/// Drop the first `n` bytes of the stream.
#[derive(Debug)]
pub struct SkipStage {
    remaining: u64,
}

impl SkipStage {
    pub fn new(n: u64) -> Self {
        Self { remaining: n }
    }
}

impl ChunkStage for SkipStage {
    fn length_relation(&self) -> LengthRelation {
        LengthRelation::Shrinking
    }

    fn apply(&mut self, chunk: &mut BytesMut) -> Result<()> {
        let n = (self.remaining.min(chunk.len() as u64)) as usize;
        chunk.advance(n);
        self.remaining -= n as u64;
        Ok(())
    }
}

/// Pass at most `n` bytes, then nothing.
#[derive(Debug)]
pub struct TakeStage {
    remaining: u64,
}

impl TakeStage {
    pub fn new(n: u64) -> Self {
        Self { remaining: n }
    }
}

impl ChunkStage for TakeStage {
    fn length_relation(&self) -> LengthRelation {
        LengthRelation::Shrinking
    }

    fn apply(&mut self, chunk: &mut BytesMut) -> Result<()> {
        let n = (self.remaining.min(chunk.len() as u64)) as usize;
        chunk.truncate(n);
        self.remaining -= n as u64;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered list of stages.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn ChunkStage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn then(mut self, stage: impl ChunkStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Whether every stage preserves length.
    pub fn length_relation(&self) -> LengthRelation {
        if self
            .stages
            .iter()
            .all(|s| s.length_relation() == LengthRelation::Preserving)
        {
            LengthRelation::Preserving
        } else {
            LengthRelation::Shrinking
        }
    }

    /// Run one chunk through every stage.
    pub fn apply(&mut self, chunk: &mut BytesMut) -> Result<()> {
        for stage in &mut self.stages {
            stage.apply(chunk)?;
        }
        Ok(())
    }

    /// Finish every stage, in order.
    pub fn finish(&mut self) -> Result<()> {
        for stage in &mut self.stages {
            stage.finish()?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Whole-buffer helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Encrypt a sequence of plaintext chunks. Returns ciphertext and tag.
pub fn encrypt_stream<'a, I>(key: &SecretKey, nonce: &Nonce, chunks: I) -> Result<(Vec<u8>, Tag)>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut stage = SealStage::new(key, nonce, &[]);
    let mut out = Vec::new();
    for chunk in chunks {
        let mut buf = BytesMut::from(chunk);
        stage.apply(&mut buf)?;
        out.extend_from_slice(&buf);
    }
    stage.finish()?;
    let tag = stage.tag().ok_or(CoreError::StageFinished)?;
    Ok((out, tag))
}

/// Decrypt a sequence of ciphertext chunks.
///
/// The tag is verified over every chunk before any plaintext is produced, so
/// a mismatch returns an error and zero bytes.
pub fn decrypt_stream<'a, I>(key: &SecretKey, nonce: &Nonce, chunks: I, tag: Tag) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a [u8]> + Clone,
{
    let mut verifier = TagVerifier::new(key, nonce, &[], tag);
    for chunk in chunks.clone() {
        verifier.apply(&mut BytesMut::from(chunk))?;
    }
    verifier.finish()?;

    let mut opener = OpenStage::new(key, nonce, &[], tag);
    let mut out = Vec::new();
    for chunk in chunks {
        let mut buf = BytesMut::from(chunk);
        opener.apply(&mut buf)?;
        out.extend_from_slice(&buf);
    }
    opener.finish()?;
    Ok(out)
}
