// Message - the unit of gossip
//
// Wire layout (little-endian):
//   version (2) · sequence (8) · ttl (1) · flags (1) · contact
//   · path length (2) · path · payload type (1) · payload length (4) · payload
//
// Both length fields are derived from the owned data at encode time.

use crate::protocol::contact::Contact;
use crate::protocol::wire::{check_len, ProtocolError, WireReader};
use bytes::BufMut;
use std::fmt;

/// Protocol version stamped on locally built messages
pub const PROTOCOL_VERSION: u16 = 1;

/// Message must not be cached or relayed
pub const FLAG_NO_CACHE: u8 = 0x01;

/// Sender wants an acknowledgement from the receiving node
pub const FLAG_ACK_REQUESTED: u8 = 0x02;

/// Separator between callsigns in a message path
pub const PATH_SEPARATOR: char = ';';

/// Longest path a two-byte length prefix can carry
pub const MAX_PATH_LEN: usize = u16::MAX as usize;

/// Longest payload a four-byte length prefix can carry
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// Application meaning of a payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Cq,
    Debug,
    Update,
    Ack,
    MessengerCq,
    MessengerGroup,
    MessengerBroadcast,
    MessengerEmergency,
    Other(u8),
}

impl PayloadType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Cq => 0,
            Self::Debug => 1,
            Self::Update => 2,
            Self::Ack => 3,
            Self::MessengerCq => 4,
            Self::MessengerGroup => 5,
            Self::MessengerBroadcast => 6,
            Self::MessengerEmergency => 7,
            Self::Other(tag) => tag,
        }
    }
}

impl From<u8> for PayloadType {
    fn from(tag: u8) -> Self {
        match tag {
            0 => Self::Cq,
            1 => Self::Debug,
            2 => Self::Update,
            3 => Self::Ack,
            4 => Self::MessengerCq,
            5 => Self::MessengerGroup,
            6 => Self::MessengerBroadcast,
            7 => Self::MessengerEmergency,
            other => Self::Other(other),
        }
    }
}

/// Deduplication identity of a message
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub sequence: u64,
    pub source: Contact,
}

impl MessageKey {
    pub fn new(sequence: u64, source: Contact) -> Self {
        Self { sequence, source }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.sequence)
    }
}

/// A gossip message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub version: u16,
    pub sequence: u64,
    pub ttl: u8,
    pub flags: u8,
    pub source: Contact,
    pub path: String,
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with the current protocol version, no flags and an empty path
    pub fn new(source: Contact, sequence: u64, payload_type: PayloadType, payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            ttl: 0,
            flags: 0,
            source,
            path: String::new(),
            payload_type,
            payload,
        }
    }

    /// Set the hop budget
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set flag bits
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags |= flags;
        self
    }

    /// Set the traversed path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.sequence, self.source.clone())
    }

    pub fn is_no_cache(&self) -> bool {
        self.flags & FLAG_NO_CACHE != 0
    }

    pub fn ack_requested(&self) -> bool {
        self.flags & FLAG_ACK_REQUESTED != 0
    }

    /// Check whether a callsign is one of the path elements
    pub fn path_contains(&self, callsign: &str) -> bool {
        !self.path.is_empty() && self.path.split(PATH_SEPARATOR).any(|hop| hop == callsign)
    }

    /// Record a hop through `callsign`
    pub fn append_path(&mut self, callsign: &str) {
        if !self.path.is_empty() {
            self.path.push(PATH_SEPARATOR);
        }
        self.path.push_str(callsign);
    }

    /// Size of the encoded message in bytes
    pub fn encoded_len(&self) -> usize {
        2 + 8 + 1 + 1 + self.source.encoded_len() + 2 + self.path.len() + 1 + 4 + self.payload.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decode a message from the front of a buffer; trailing bytes are ignored
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        Self::read_from(&mut WireReader::new(buf))
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        check_len("path", self.path.len(), MAX_PATH_LEN)?;
        check_len("payload", self.payload.len(), MAX_PAYLOAD_LEN)?;

        buf.put_u16_le(self.version);
        buf.put_u64_le(self.sequence);
        buf.put_u8(self.ttl);
        buf.put_u8(self.flags);
        self.source.encode_into(buf);
        buf.put_u16_le(self.path.len() as u16);
        buf.put_slice(self.path.as_bytes());
        buf.put_u8(self.payload_type.as_u8());
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        Ok(())
    }

    pub(crate) fn read_from(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let version = reader.read_u16("version")?;
        let sequence = reader.read_u64("sequence")?;
        let ttl = reader.read_u8("ttl")?;
        let flags = reader.read_u8("flags")?;
        let source = Contact::read_from(reader)?;

        let path_len = reader.read_u16("path length")? as usize;
        let path = if path_len == 0 {
            String::new()
        } else {
            let raw = reader.read_bytes(path_len, "path")?;
            String::from_utf8(raw.to_vec())
                .map_err(|_| ProtocolError::MalformedMessage("path is not valid UTF-8".into()))?
        };

        let payload_type = PayloadType::from(reader.read_u8("payload type")?);
        let payload_len = reader.read_u32("payload length")? as usize;
        let payload = reader.read_bytes(payload_len, "payload")?.to_vec();

        Ok(Self {
            version,
            sequence,
            ttl,
            flags,
            source,
            path,
            payload_type,
            payload,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} ttl={} type={:?} path=[{}] {} bytes",
            self.source,
            self.sequence,
            self.ttl,
            self.payload_type,
            self.path,
            self.payload.len()
        )
    }
}
