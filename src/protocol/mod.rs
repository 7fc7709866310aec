// Protocol Module - binary wire codec
//
// Encodes and decodes contacts, gossip messages and the payloads that ride
// inside them. Pure byte manipulation: no sockets, no tasks.

pub mod ack;
pub mod contact;
pub mod message;
pub mod update;
mod wire;

pub use ack::AckPayload;
pub use contact::{Contact, ContactIp, ContactIpType, ContactType};
pub use message::{
    Message, MessageKey, PayloadType, FLAG_ACK_REQUESTED, FLAG_NO_CACHE, PROTOCOL_VERSION,
};
pub use update::{CacheQuery, CacheResponse, UpdateOperation, UpdatePayload, MAX_UPDATE_DATA};
pub use wire::ProtocolError;
