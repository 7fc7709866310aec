// Ack Handler - logs acknowledgements returned by neighbours

use crate::protocol::{AckPayload, Message, PayloadType};
use crate::sync::{CallbackId, Node, Peer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counts and logs acknowledgements received from peers
#[derive(Debug, Default)]
pub struct AckHandler {
    received: AtomicU64,
    malformed: AtomicU64,
}

impl AckHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler and register it as a message callback
    pub fn register(node: &Node) -> (Arc<Self>, CallbackId) {
        let handler = Arc::new(Self::new());
        let callback = Arc::clone(&handler);
        let id = node.add_message_callback(move |msg, peer| callback.handle(msg, peer));
        (handler, id)
    }

    /// Process one delivered message; anything but a peer-sent ack is ignored
    pub fn handle(&self, msg: &Message, peer: Option<&Arc<Peer>>) {
        if msg.payload_type != PayloadType::Ack {
            return;
        }
        let Some(peer) = peer else {
            return;
        };

        match AckPayload::decode(&msg.payload) {
            Ok(ack) => {
                self.received.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    peer = %peer.id(),
                    reply_from = %msg.source,
                    source = %ack.contact,
                    contact_type = ?ack.contact.kind(),
                    sequence = ack.sequence,
                    "Ack received"
                );
            }
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(peer = %peer.id(), error = %e, "Malformed ack payload");
            }
        }
    }

    /// Acknowledgements decoded so far
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}
