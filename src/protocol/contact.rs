// Contact - station identity record
//
// Wire layout:
//   type (1) · callsign length (1) · callsign · ip count (1)
//   · per ip: type (1) · length (1) · raw bytes

use crate::protocol::wire::{check_len, ProtocolError, WireReader};
use bytes::BufMut;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Longest callsign or IP record a one-byte length prefix can carry
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// Most IP records a contact can carry
pub const MAX_IPS: usize = u8::MAX as usize;

// ============================================================================
// CONTACT TYPE
// ============================================================================

/// Kind of station a contact describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactType {
    /// Mobile user station
    User,
    /// Fixed station
    Fixed,
    /// Tag not known to this implementation, preserved as-is
    Other(u8),
}

impl ContactType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Fixed => 1,
            Self::Other(tag) => tag,
        }
    }
}

impl From<u8> for ContactType {
    fn from(tag: u8) -> Self {
        match tag {
            0 => Self::User,
            1 => Self::Fixed,
            other => Self::Other(other),
        }
    }
}

impl Default for ContactType {
    fn default() -> Self {
        Self::Fixed
    }
}

// ============================================================================
// CONTACT IP
// ============================================================================

/// Address family of a contact IP record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContactIpType {
    V4,
    V6,
    Other(u8),
}

impl ContactIpType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::V4 => 0,
            Self::V6 => 1,
            Self::Other(tag) => tag,
        }
    }
}

impl From<u8> for ContactIpType {
    fn from(tag: u8) -> Self {
        match tag {
            0 => Self::V4,
            1 => Self::V6,
            other => Self::Other(other),
        }
    }
}

/// One IP address record of a contact
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContactIp {
    kind: ContactIpType,
    data: Vec<u8>,
}

impl ContactIp {
    /// Create a record from raw address bytes
    pub fn new(kind: ContactIpType, data: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let data = data.into();
        check_len("ip address", data.len(), MAX_FIELD_LEN)?;
        Ok(Self { kind, data })
    }

    pub fn kind(&self) -> ContactIpType {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Interpret the record as an address, if the family and length agree
    pub fn to_ip_addr(&self) -> Option<IpAddr> {
        match self.kind {
            ContactIpType::V4 => {
                let octets: [u8; 4] = self.data.as_slice().try_into().ok()?;
                Some(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            ContactIpType::V6 => {
                let octets: [u8; 16] = self.data.as_slice().try_into().ok()?;
                Some(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            ContactIpType::Other(_) => None,
        }
    }

    fn encoded_len(&self) -> usize {
        2 + self.data.len()
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.kind.as_u8());
        buf.put_u8(self.data.len() as u8);
        buf.put_slice(&self.data);
    }

    fn read_from(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let kind = ContactIpType::from(reader.read_u8("ip type")?);
        let len = reader.read_u8("ip length")? as usize;
        let data = reader.read_bytes(len, "ip address")?.to_vec();
        Ok(Self { kind, data })
    }
}

impl From<IpAddr> for ContactIp {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self {
                kind: ContactIpType::V4,
                data: v4.octets().to_vec(),
            },
            IpAddr::V6(v6) => Self {
                kind: ContactIpType::V6,
                data: v6.octets().to_vec(),
            },
        }
    }
}

// ============================================================================
// CONTACT
// ============================================================================

/// Identity of a station: type, callsign and known addresses
///
/// Equality is field-wise and order-sensitive on the IP list, which is
/// exactly what message deduplication keys on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Contact {
    kind: ContactType,
    callsign: Vec<u8>,
    ips: Vec<ContactIp>,
}

impl Contact {
    /// Create a contact without addresses
    pub fn new(kind: ContactType, callsign: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let callsign = callsign.into();
        check_len("callsign", callsign.len(), MAX_FIELD_LEN)?;
        Ok(Self {
            kind,
            callsign,
            ips: Vec::new(),
        })
    }

    /// Create a fixed-station contact
    pub fn fixed(callsign: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        Self::new(ContactType::Fixed, callsign)
    }

    /// Create a mobile-user contact
    pub fn user(callsign: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        Self::new(ContactType::User, callsign)
    }

    /// Append an address record
    pub fn with_ip(mut self, ip: impl Into<ContactIp>) -> Result<Self, ProtocolError> {
        check_len("ip list", self.ips.len() + 1, MAX_IPS)?;
        self.ips.push(ip.into());
        Ok(self)
    }

    pub fn kind(&self) -> ContactType {
        self.kind
    }

    pub fn callsign(&self) -> &[u8] {
        &self.callsign
    }

    /// Callsign for display and logging
    pub fn callsign_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.callsign)
    }

    pub fn ips(&self) -> &[ContactIp] {
        &self.ips
    }

    /// Size of the encoded record in bytes
    pub fn encoded_len(&self) -> usize {
        3 + self.callsign.len() + self.ips.iter().map(ContactIp::encoded_len).sum::<usize>()
    }

    /// Encode to a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decode a contact from the front of a buffer; trailing bytes are ignored
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtocolError> {
        Self::read_from(&mut WireReader::new(buf))
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.kind.as_u8());
        buf.put_u8(self.callsign.len() as u8);
        buf.put_slice(&self.callsign);
        buf.put_u8(self.ips.len() as u8);
        for ip in &self.ips {
            ip.encode_into(buf);
        }
    }

    pub(crate) fn read_from(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let kind = ContactType::from(reader.read_u8("contact type")?);
        let callsign_len = reader.read_u8("callsign length")? as usize;
        let callsign = reader.read_bytes(callsign_len, "callsign")?.to_vec();

        let ip_count = reader.read_u8("ip count")? as usize;
        let mut ips = Vec::with_capacity(ip_count.min(reader.remaining() / 2));
        for _ in 0..ip_count {
            ips.push(ContactIp::read_from(reader)?);
        }

        Ok(Self { kind, callsign, ips })
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.callsign_str())
    }
}
