// Acknowledgement payload: contact · sequence (8 LE)

use crate::protocol::contact::Contact;
use crate::protocol::message::MessageKey;
use crate::protocol::wire::{ProtocolError, WireReader};
use bytes::BufMut;

/// Names the message being acknowledged
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckPayload {
    pub contact: Contact,
    pub sequence: u64,
}

impl AckPayload {
    pub fn new(contact: Contact, sequence: u64) -> Self {
        Self { contact, sequence }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.sequence, self.contact.clone())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.contact.encoded_len() + 8);
        self.contact.encode_into(&mut buf);
        buf.put_u64_le(self.sequence);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(buf);
        let contact = Contact::read_from(&mut reader)?;
        let sequence = reader.read_u64("ack sequence")?;
        Ok(Self { contact, sequence })
    }
}

impl From<MessageKey> for AckPayload {
    fn from(key: MessageKey) -> Self {
        Self::new(key.source, key.sequence)
    }
}
