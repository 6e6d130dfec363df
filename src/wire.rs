//! Deterministic fixed-layout binary codec for ledger records.
//!
//! Every record the light client hashes or signs is serialized through the
//! primitives in this module. The layout is little-endian and injective per
//! record type: identical field values always produce identical bytes, and
//! distinct field values never collide. Decoding consumes the input exactly;
//! trailing bytes are an error.

use thiserror::Error;

use crate::data::Digest;

/// Errors raised while decoding a fixed-layout record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input ended before the field was complete.
    #[error("input truncated: needed {needed} more bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required to finish the current field.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },
    /// Bytes remained after the record was fully decoded.
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
    /// A string field did not contain valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    /// A boolean field held a byte other than 0 or 1.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
}

/// Appends fixed-layout fields to a byte buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the writer and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Appends a little-endian `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a little-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a little-endian `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a raw 32-byte digest or public key.
    pub fn write_digest(&mut self, digest: &Digest) {
        self.buf.extend_from_slice(digest);
    }

    /// Appends a boolean as a single `0`/`1` byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Appends a UTF-8 string as a `u32` byte length followed by the bytes.
    /// Strings longer than `u32::MAX` bytes are outside the wire format.
    pub fn write_str(&mut self, value: &str) {
        debug_assert!(u32::try_from(value.len()).is_ok());
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Appends an ordered digest sequence as a `u32` count followed by the
    /// raw 32-byte digests. Sequences longer than `u32::MAX` entries are
    /// outside the wire format.
    pub fn write_digest_seq(&mut self, digests: &[Digest]) {
        debug_assert!(u32::try_from(digests.len()).is_ok());
        self.write_u32(digests.len() as u32);
        for digest in digests {
            self.write_digest(digest);
        }
    }
}

/// Reads fixed-layout fields from a byte buffer.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader over the full input.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < len {
            return Err(DecodeError::Truncated {
                needed: len - remaining,
                remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(out))
    }

    /// Reads a raw 32-byte digest or public key.
    pub fn read_digest(&mut self) -> Result<Digest, DecodeError> {
        let bytes = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Reads a boolean encoded as a single `0`/`1` byte.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        let byte = self.take(1)?[0];
        match byte {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Reads a count-prefixed digest sequence.
    pub fn read_digest_seq(&mut self) -> Result<Vec<Digest>, DecodeError> {
        let count = self.read_u32()? as usize;
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            out.push(self.read_digest()?);
        }
        Ok(out)
    }

    /// Checks that the entire input was consumed.
    pub fn finish(self) -> Result<(), DecodeError> {
        let remaining = self.buf.len() - self.pos;
        if remaining == 0 {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(remaining))
        }
    }
}
