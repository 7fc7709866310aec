//! Byte-stuffed frame codec.
//!
//! Frames are delimited as:
//! - `0xAA` frame start
//! - payload, with every reserved byte preceded by `0xEB`
//! - `0xAB` frame end
//!
//! The decoder scans one byte at a time and never fails: broken frames are
//! logged and dropped, and scanning resumes at the next marker.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::transport::types::{TransportError, DEFAULT_MAX_FRAME_SIZE};

/// Escapes the byte that follows.
pub const ESCAPE: u8 = 0xEB;
/// Opens a frame.
pub const FRAME_START: u8 = 0xAA;
/// Closes a frame.
pub const FRAME_END: u8 = 0xAB;

fn is_reserved(byte: u8) -> bool {
    matches!(byte, ESCAPE | FRAME_START | FRAME_END)
}

/// Size of `payload` once wrapped in markers and escaped.
pub fn wrapped_len(payload: &[u8]) -> usize {
    2 + payload.len() + payload.iter().filter(|b| is_reserved(**b)).count()
}

/// Codec turning a byte stream into frame payloads and back.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
    /// Previous byte was an escape.
    escape_pending: bool,
    /// Between a start and an end marker.
    active: bool,
    /// Skipping the rest of an oversized frame.
    discarding: bool,
    buf: Vec<u8>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec bounding wrapped frames at `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            escape_pending: false,
            active: false,
            discarding: false,
            buf: Vec::new(),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Largest unwrapped payload the receive side accepts.
    fn payload_limit(&self) -> usize {
        self.max_frame_size.saturating_sub(2)
    }

    fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        if self.escape_pending {
            self.escape_pending = false;
            self.push(byte);
            return None;
        }

        match byte {
            ESCAPE => {
                if self.active || self.discarding {
                    self.escape_pending = true;
                }
                None
            }
            FRAME_START => {
                if self.active {
                    tracing::warn!(
                        dropped = self.buf.len(),
                        "Frame start inside an active frame, restarting"
                    );
                }
                self.buf.clear();
                self.active = true;
                self.discarding = false;
                None
            }
            FRAME_END => {
                if self.active {
                    self.active = false;
                    Some(std::mem::take(&mut self.buf))
                } else {
                    if !self.discarding {
                        tracing::warn!("Frame end without an active frame, ignoring");
                    }
                    self.discarding = false;
                    None
                }
            }
            _ => {
                self.push(byte);
                None
            }
        }
    }

    fn push(&mut self, byte: u8) {
        if !self.active {
            return;
        }
        if self.buf.len() >= self.payload_limit() {
            tracing::warn!(
                max = self.max_frame_size,
                "Inbound frame exceeds maximum size, dropping"
            );
            self.buf.clear();
            self.active = false;
            self.discarding = true;
            return;
        }
        self.buf.push(byte);
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut consumed = 0;
        let mut frame = None;

        while consumed < src.len() {
            let byte = src[consumed];
            consumed += 1;
            if let Some(payload) = self.feed(byte) {
                frame = Some(payload);
                break;
            }
        }

        src.advance(consumed);
        Ok(frame)
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, payload: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = wrapped_len(&payload);
        if size > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        dst.reserve(size);
        dst.put_u8(FRAME_START);
        for byte in payload {
            if is_reserved(byte) {
                dst.put_u8(ESCAPE);
            }
            dst.put_u8(byte);
        }
        dst.put_u8(FRAME_END);

        Ok(())
    }
}
