//! Low-level cursor over Standard MIDI File bytes.
//!
//! The free functions follow the raw offset-passing contract: they never fail and
//! return whatever they could assemble if the buffer ends early, so callers working
//! on untrusted input should use [`SmfReader`], which bounds-checks every read.

use crate::error::ParseError;
use byteorder::{BigEndian, ByteOrder};

/// Longest VLQ the SMF format allows (values up to 0x0FFF_FFFF)
pub const MAX_VLQ_BYTES: usize = 4;

/// Read a big-endian u32 at `offset`, returning the value and the next offset.
/// Bytes past the end of `buf` read as zero.
pub fn read_u32_be(buf: &[u8], offset: usize) -> (u32, usize) {
    match buf.get(offset..offset + 4) {
        Some(bytes) => (BigEndian::read_u32(bytes), offset + 4),
        None => {
            let mut value = 0u32;
            for i in 0..4 {
                value = (value << 8) | buf.get(offset + i).copied().unwrap_or(0) as u32;
            }
            (value, offset + 4)
        }
    }
}

/// Read a variable-length quantity at `offset`, returning the value and the next
/// offset. Accumulation stops at the first byte with the high bit clear, or at the
/// end of the buffer (in which case the partial value is returned).
pub fn read_vlq(buf: &[u8], offset: usize) -> (u32, usize) {
    let mut value = 0u32;
    let mut i = offset;
    while let Some(&byte) = buf.get(i) {
        i += 1;
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            break;
        }
    }
    (value, i)
}

/// Bounds-checked reader over a byte slice with position tracking.
///
/// `base` is the absolute offset of `data[0]` in the whole file so errors
/// report file positions even for chunk-scoped sub-readers.
#[derive(Debug, Clone)]
pub struct SmfReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> SmfReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, base: 0 }
    }

    /// Absolute position in the whole buffer
    pub fn position(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn eof(&self) -> ParseError {
        ParseError::UnexpectedEof {
            offset: self.position(),
        }
    }

    /// Look at the next byte without consuming it
    pub fn peek_u8(&self) -> Result<u8, ParseError> {
        self.data.get(self.pos).copied().ok_or_else(|| self.eof())
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        let byte = self.peek_u8()?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < len {
            return Err(self.eof());
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        Ok(BigEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u24(&mut self) -> Result<u32, ParseError> {
        Ok(BigEndian::read_u24(self.read_bytes(3)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        Ok(BigEndian::read_u32(self.read_bytes(4)?))
    }

    /// Read a VLQ, failing if the data ends mid-sequence.
    /// Sequences longer than four bytes are cut off at four, like most readers do.
    pub fn read_vlq(&mut self) -> Result<u32, ParseError> {
        let mut value = 0u32;
        for _ in 0..MAX_VLQ_BYTES {
            let byte = self.read_u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(value)
    }

    /// Read a four-byte chunk tag
    pub fn read_tag(&mut self) -> Result<[u8; 4], ParseError> {
        let bytes = self.read_bytes(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Read a chunk tag and fail with `BadMagic` if it isn't `expected`
    pub fn expect_tag(&mut self, expected: &'static str) -> Result<(), ParseError> {
        let offset = self.position();
        let found = self.read_tag()?;
        if &found != expected.as_bytes() {
            return Err(ParseError::BadMagic {
                expected,
                found,
                offset,
            });
        }
        Ok(())
    }

    /// Advance past `len` bytes. Skipping beyond the end clamps to the end and
    /// reports EOF so a bogus declared length can't misalign later reads silently.
    pub fn skip(&mut self, len: usize) -> Result<(), ParseError> {
        if self.remaining() < len {
            self.pos = self.data.len();
            return Err(self.eof());
        }
        self.pos += len;
        Ok(())
    }

    /// Split off a reader over the next `len` bytes (a chunk body) and advance past it.
    /// A chunk that claims more bytes than remain is truncated to what is there.
    pub fn sub_reader(&mut self, len: usize) -> SmfReader<'a> {
        let len = len.min(self.remaining());
        let sub = SmfReader {
            data: &self.data[self.pos..self.pos + len],
            pos: 0,
            base: self.position(),
        };
        self.pos += len;
        sub
    }
}
