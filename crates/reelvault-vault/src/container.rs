//! Encrypted media container formats.
//!
//! ## Current layout (little-endian)
//!
//! ```text
//! b"RVMC" | version:u8 | salt_len:u32 | salt | nonce_len:u32 | nonce
//!         | ct_len:u32 | ciphertext | tag_len:u32 | tag
//! ```
//!
//! The file key is `HKDF(media key, salt, media-file label)`, so every
//! container has its own key and a random nonce under it.
//!
//! ## Legacy layout
//!
//! ```text
//! nonce(12) | ciphertext | tag(16)
//! ```
//!
//! No header. Encrypted directly under the media key. Recognised by the
//! absence of the `RVMC` magic.

use bytes::BytesMut;
use rand::RngCore;
use reelvault_core::aead::{self, Nonce, Sealed, Tag, NONCE_LEN, TAG_LEN};
use reelvault_core::stream::{ChunkStage, SealStage};
use reelvault_core::wire::{WireReader, WireWriter};
use reelvault_core::{derive_sub_key, KeyPurpose, SecretKey};
use std::io::{ErrorKind, SeekFrom};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CodecError, CodecResult};

pub const CONTAINER_MAGIC: &[u8; 4] = b"RVMC";
pub const CONTAINER_VERSION: u8 = 1;
pub const LEGACY_MIN_LEN: u64 = (NONCE_LEN + TAG_LEN) as u64;

const SALT_LEN: usize = 16;
const MAX_SALT_LEN: usize = 64;
const SEAL_CHUNK: usize = 64 * 1024;

/// Parsed header of a current-format container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u8,
    pub salt: Vec<u8>,
    pub nonce: Nonce,
    /// Offset of the first ciphertext byte.
    pub ct_offset: u64,
    pub ct_len: u64,
    pub tag: Tag,
}

impl ContainerHeader {
    /// Per-file key.
    pub fn file_key(&self, media_key: &SecretKey) -> CodecResult<SecretKey> {
        Ok(derive_sub_key(media_key, &self.salt, KeyPurpose::MediaFile)?)
    }
}

/// Which on-disk layout a container uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerFormat {
    Sealed(ContainerHeader),
    Legacy,
}

impl ContainerFormat {
    /// Detect the layout and, for the current one, parse and bounds-check the
    /// header against the real file length.
    pub async fn detect<R>(reader: &mut R, file_len: u64) -> CodecResult<Self>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        reader.seek(SeekFrom::Start(0)).await?;
        if file_len < 4 {
            return Err(CodecError::Malformed(format!("{file_len} byte file")));
        }
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).await?;
        if &magic != CONTAINER_MAGIC {
            if file_len < LEGACY_MIN_LEN {
                return Err(CodecError::Malformed("legacy container too short".into()));
            }
            return Ok(ContainerFormat::Legacy);
        }

        // version + salt_len
        if file_len < 4 + 5 {
            return Err(CodecError::Malformed("truncated header".into()));
        }
        let mut fixed = [0u8; 5];
        read_header(reader, &mut fixed).await?;
        let version = fixed[0];
        if version != CONTAINER_VERSION {
            return Err(CodecError::Malformed(format!("unsupported version {version}")));
        }
        let salt_len = u32::from_le_bytes([fixed[1], fixed[2], fixed[3], fixed[4]]) as usize;
        if salt_len == 0 || salt_len > MAX_SALT_LEN {
            return Err(CodecError::Malformed(format!("salt length {salt_len}")));
        }
        let rest_len = salt_len + 4 + NONCE_LEN + 4;
        if file_len < (4 + 5 + rest_len) as u64 {
            return Err(CodecError::Malformed("truncated header".into()));
        }
        let mut rest = vec![0u8; rest_len];
        read_header(reader, &mut rest).await?;

        let mut r = WireReader::new(&rest);
        let salt = r.take(salt_len)?.to_vec();
        let nonce_len = r.u32_le()? as usize;
        if nonce_len != NONCE_LEN {
            return Err(CodecError::Malformed(format!("nonce length {nonce_len}")));
        }
        let nonce = Nonce::from_slice(r.take(NONCE_LEN)?)?;
        let ct_len = u64::from(r.u32_le()?);
        r.finish()?;

        let ct_offset = 4 + 5 + rest.len() as u64;
        let expected_len = ct_offset + ct_len + 4 + TAG_LEN as u64;
        if expected_len != file_len {
            return Err(CodecError::Malformed(format!(
                "header declares {expected_len} bytes, file has {file_len}"
            )));
        }

        reader.seek(SeekFrom::Start(ct_offset + ct_len)).await?;
        let mut trailer = [0u8; 4 + TAG_LEN];
        read_header(reader, &mut trailer).await?;
        let tag_len = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize;
        if tag_len != TAG_LEN {
            return Err(CodecError::Malformed(format!("tag length {tag_len}")));
        }
        let tag = Tag::from_slice(&trailer[4..])?;

        Ok(ContainerFormat::Sealed(ContainerHeader {
            version,
            salt,
            nonce,
            ct_offset,
            ct_len,
            tag,
        }))
    }
}

/// `read_exact` where running out of bytes means a cut-short container.
async fn read_header<R>(reader: &mut R, buf: &mut [u8]) -> CodecResult<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(CodecError::Malformed("truncated header".into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Split a legacy container into its parts.
pub fn parse_legacy(bytes: &[u8]) -> CodecResult<Sealed> {
    if (bytes.len() as u64) < LEGACY_MIN_LEN {
        return Err(CodecError::Malformed("legacy container too short".into()));
    }
    let (nonce, rest) = bytes.split_at(NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
    Ok(Sealed {
        nonce: Nonce::from_slice(nonce)?,
        ciphertext: ciphertext.to_vec(),
        tag: Tag::from_slice(tag)?,
    })
}

/// Issuer side: stream `plaintext_len` bytes from `reader` into a container.
pub async fn seal_container<R, W>(
    media_key: &SecretKey,
    reader: &mut R,
    plaintext_len: u64,
    writer: &mut W,
) -> CodecResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ct_len = u32::try_from(plaintext_len)
        .map_err(|_| CodecError::Malformed(format!("{plaintext_len} bytes exceeds container limit")))?;

    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let nonce = Nonce::generate();
    let file_key = derive_sub_key(media_key, &salt, KeyPurpose::MediaFile)?;

    let mut header = WireWriter::new();
    header.bytes(CONTAINER_MAGIC).u8(CONTAINER_VERSION);
    header
        .len_prefixed(&salt)?
        .len_prefixed(nonce.as_bytes())?
        .u32_le(ct_len);
    writer.write_all(&header.into_bytes()).await?;

    let mut stage = SealStage::new(&file_key, &nonce, &[]);
    let mut remaining = plaintext_len;
    while remaining > 0 {
        let n = remaining.min(SEAL_CHUNK as u64) as usize;
        let mut chunk = BytesMut::zeroed(n);
        reader.read_exact(&mut chunk).await?;
        stage.apply(&mut chunk)?;
        writer.write_all(&chunk).await?;
        remaining -= n as u64;
    }
    stage.finish()?;
    let tag = stage
        .tag()
        .ok_or_else(|| CodecError::Malformed("seal stage produced no tag".into()))?;

    writer.write_all(&(TAG_LEN as u32).to_le_bytes()).await?;
    writer.write_all(tag.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Issuer side: seal an in-memory buffer into the current layout.
pub async fn seal_container_bytes(media_key: &SecretKey, plaintext: &[u8]) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(plaintext.len() + 64);
    let mut reader = plaintext;
    seal_container(media_key, &mut reader, plaintext.len() as u64, &mut out).await?;
    Ok(out)
}

/// Issuer side: produce a legacy container.
pub fn seal_legacy(media_key: &SecretKey, plaintext: &[u8]) -> CodecResult<Vec<u8>> {
    let sealed = aead::seal(media_key, plaintext, &[])?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.ciphertext.len() + TAG_LEN);
    out.extend_from_slice(sealed.nonce.as_bytes());
    out.extend_from_slice(&sealed.ciphertext);
    out.extend_from_slice(sealed.tag.as_bytes());
    Ok(out)
}
