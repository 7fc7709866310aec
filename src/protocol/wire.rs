// Wire primitives - bounds-checked reading of little-endian fields
//
// Every decoder in the protocol module pulls its fields through WireReader,
// so a truncated buffer or an oversized length prefix surfaces as a
// MalformedMessage error instead of a panic or an out-of-bounds read.

use thiserror::Error;

/// Errors produced while encoding or decoding wire records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("{field} too long: {len} bytes (max: {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

impl ProtocolError {
    pub(crate) fn truncated(what: &str, needed: usize, remaining: usize) -> Self {
        Self::MalformedMessage(format!(
            "truncated {}: need {} bytes, {} remaining",
            what, needed, remaining
        ))
    }
}

/// Sequential reader over a borrowed byte buffer
#[derive(Debug)]
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn read_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::truncated(what, len, self.remaining()));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N, what)?);
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self, what: &str) -> Result<u8, ProtocolError> {
        Ok(self.read_array::<1>(what)?[0])
    }

    pub(crate) fn read_u16(&mut self, what: &str) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.read_array(what)?))
    }

    pub(crate) fn read_u32(&mut self, what: &str) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.read_array(what)?))
    }

    pub(crate) fn read_u64(&mut self, what: &str) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.read_array(what)?))
    }
}

/// Check a length against the width of its wire prefix
pub(crate) fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::FieldTooLong { field, len, max });
    }
    Ok(())
}
