// Update payloads - cache reconciliation between peers
//
//   update:         operation (1) · data length (2 LE) · data
//   cache request:  count (4 LE) · count × (sequence (8 LE) · contact)
//   cache response: count (4 LE) · count × message
//
// Counts come from the network, so every decoder caps its pre-allocation by
// what the remaining buffer could possibly hold.

use crate::protocol::contact::Contact;
use crate::protocol::message::{Message, MessageKey};
use crate::protocol::wire::{check_len, ProtocolError, WireReader};
use bytes::BufMut;

/// Largest data section an update payload can carry
pub const MAX_UPDATE_DATA: usize = u16::MAX as usize;

/// Smallest possible encoded contact
const MIN_CONTACT_LEN: usize = 3;

/// Smallest possible encoded message
const MIN_MESSAGE_LEN: usize = 2 + 8 + 1 + 1 + MIN_CONTACT_LEN + 2 + 1 + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOperation {
    CacheRequest,
    CacheResponse,
}

impl UpdateOperation {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::CacheRequest => 0,
            Self::CacheResponse => 1,
        }
    }

    pub fn from_u8(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            0 => Ok(Self::CacheRequest),
            1 => Ok(Self::CacheResponse),
            other => Err(ProtocolError::MalformedMessage(format!(
                "unknown update operation {}",
                other
            ))),
        }
    }
}

/// Envelope for reconciliation traffic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdatePayload {
    pub operation: UpdateOperation,
    pub data: Vec<u8>,
}

impl UpdatePayload {
    pub fn new(operation: UpdateOperation, data: Vec<u8>) -> Self {
        Self { operation, data }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        check_len("update data", self.data.len(), MAX_UPDATE_DATA)?;
        let mut buf = Vec::with_capacity(3 + self.data.len());
        buf.put_u8(self.operation.as_u8());
        buf.put_u16_le(self.data.len() as u16);
        buf.put_slice(&self.data);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(buf);
        let operation = UpdateOperation::from_u8(reader.read_u8("update operation")?)?;
        let len = reader.read_u16("update length")? as usize;
        let data = reader.read_bytes(len, "update data")?.to_vec();
        Ok(Self { operation, data })
    }
}

/// Keys the requesting side already holds
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheQuery {
    pub entries: Vec<MessageKey>,
}

impl CacheQuery {
    pub fn new(entries: Vec<MessageKey>) -> Self {
        Self { entries }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        check_len("cache query", self.entries.len(), u32::MAX as usize)?;
        let mut buf = Vec::new();
        buf.put_u32_le(self.entries.len() as u32);
        for key in &self.entries {
            buf.put_u64_le(key.sequence);
            key.source.encode_into(&mut buf);
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(buf);
        let count = reader.read_u32("query count")? as usize;

        let mut entries = Vec::with_capacity(count.min(reader.remaining() / (8 + MIN_CONTACT_LEN)));
        for _ in 0..count {
            let sequence = reader.read_u64("query sequence")?;
            let source = Contact::read_from(&mut reader)?;
            entries.push(MessageKey::new(sequence, source));
        }
        Ok(Self { entries })
    }
}

/// Messages the responding side holds that the requester lacks
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheResponse {
    pub messages: Vec<Message>,
}

impl CacheResponse {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        check_len("cache response", self.messages.len(), u32::MAX as usize)?;
        let mut buf = Vec::new();
        buf.put_u32_le(self.messages.len() as u32);
        for msg in &self.messages {
            msg.encode_into(&mut buf)?;
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(buf);
        let count = reader.read_u32("response count")? as usize;

        let mut messages = Vec::with_capacity(count.min(reader.remaining() / MIN_MESSAGE_LEN));
        for _ in 0..count {
            messages.push(Message::read_from(&mut reader)?);
        }
        Ok(Self { messages })
    }
}
