//! Little-endian, length-prefixed binary fields.
//!
//! The manifest and container layouts are flat sequences of fixed-width
//! integers and `u32`-length-prefixed byte strings. [`WireReader`] parses them
//! with bounds checks on every read; [`WireWriter`] produces them.

use bytes::BufMut;

use crate::error::{CoreError, Result};

/// Bounds-checked cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CoreError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a `u32` length, check it against `max`, then take that many bytes.
    pub fn len_prefixed(&mut self, field: &'static str, max: usize) -> Result<&'a [u8]> {
        let len = self.u32_le()? as usize;
        if len > max {
            return Err(CoreError::LengthOutOfBounds {
                field,
                value: len as u64,
            });
        }
        self.take(len)
    }

    /// Fail if any bytes are left.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(CoreError::DecodingError(format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Builder for the same field encoding.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn u16_le(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn u32_le(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    /// Write a `u32` length followed by the bytes.
    pub fn len_prefixed(&mut self, data: &[u8]) -> Result<&mut Self> {
        let len = u32::try_from(data.len()).map_err(|_| CoreError::LengthOutOfBounds {
            field: "len_prefixed",
            value: data.len() as u64,
        })?;
        self.buf.put_u32_le(len);
        self.buf.put_slice(data);
        Ok(self)
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
