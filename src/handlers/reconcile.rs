// Reconciler - pull-based cache catch-up between neighbours
//
// On connect each side sends the keys it holds. The other side answers with
// the cached messages missing from that list, which the requester merges
// without relaying. Both directions fit in one update payload; whatever does
// not fit waits for the next connect.

use crate::protocol::{
    CacheQuery, CacheResponse, Message, MessageKey, PayloadType, ProtocolError, UpdateOperation,
    UpdatePayload, FLAG_NO_CACHE, MAX_UPDATE_DATA,
};
use crate::sync::{CallbackId, Node, Peer, WeakNode};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bytes taken by the entry count at the front of query and response data
const COUNT_LEN: usize = 4;

/// Counters of reconciliation traffic
#[derive(Debug, Default)]
pub struct ReconcileStats {
    pub queries_sent: AtomicU64,
    pub responses_sent: AtomicU64,
    pub entries_merged: AtomicU64,
    pub malformed: AtomicU64,
}

/// Cache reconciliation handler
pub struct Reconciler {
    node: WeakNode,
    stats: ReconcileStats,
}

/// Callback registrations of a reconciler
#[derive(Clone, Copy, Debug)]
pub struct ReconcilerCallbacks {
    pub message: CallbackId,
    pub peer_connected: CallbackId,
}

impl Reconciler {
    pub fn new(node: WeakNode) -> Self {
        Self {
            node,
            stats: ReconcileStats::default(),
        }
    }

    /// Create a reconciler and register its peer-connected and message callbacks
    pub fn register(node: &Node) -> (Arc<Self>, ReconcilerCallbacks) {
        let reconciler = Arc::new(Self::new(node.downgrade()));

        let on_connect = Arc::clone(&reconciler);
        let peer_connected = node.add_peer_connected_callback(move |peer| on_connect.on_peer_connected(peer));

        let on_message = Arc::clone(&reconciler);
        let message = node.add_message_callback(move |msg, peer| on_message.on_message(msg, peer));

        (
            reconciler,
            ReconcilerCallbacks {
                message,
                peer_connected,
            },
        )
    }

    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    /// Send the keys of every cached message to a freshly connected peer
    pub fn on_peer_connected(&self, peer: &Arc<Peer>) {
        let Some(node) = self.node.upgrade() else {
            return;
        };

        let mut keys = node.cache_snapshot().iter().map(Message::key).collect::<Vec<_>>();
        let fitting = fit_keys(&keys);
        if fitting < keys.len() {
            tracing::debug!(
                peer = %peer.id(),
                omitted = keys.len() - fitting,
                "Cache query truncated"
            );
            keys.truncate(fitting);
        }

        let count = keys.len();
        match build_update(&node, UpdateOperation::CacheRequest, CacheQuery::new(keys).encode()) {
            Ok(frame) => {
                tracing::debug!(peer = %peer.id(), entries = count, "Sending cache query");
                node.queue_message(peer, frame);
                self.stats.queries_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!(peer = %peer.id(), error = %e, "Cannot build cache query"),
        }
    }

    /// Handle update traffic delivered from a peer
    pub fn on_message(&self, msg: &Message, peer: Option<&Arc<Peer>>) {
        if msg.payload_type != PayloadType::Update {
            return;
        }
        let Some(peer) = peer else {
            return;
        };
        let Some(node) = self.node.upgrade() else {
            return;
        };

        let result = UpdatePayload::decode(&msg.payload).and_then(|update| match update.operation {
            UpdateOperation::CacheRequest => self.handle_request(&node, &update.data, peer),
            UpdateOperation::CacheResponse => self.handle_response(&node, &update.data, peer),
        });

        if let Err(e) = result {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(peer = %peer.id(), error = %e, "Malformed update payload");
        }
    }

    fn handle_request(&self, node: &Node, data: &[u8], peer: &Arc<Peer>) -> Result<(), ProtocolError> {
        let query = CacheQuery::decode(data)?;
        let known: HashSet<MessageKey> = query.entries.into_iter().collect();

        let mut size = COUNT_LEN;
        let mut missing = Vec::new();
        let mut skipped = 0usize;
        for msg in node.cache_snapshot() {
            if known.contains(&msg.key()) {
                continue;
            }
            if skipped > 0 || size + msg.encoded_len() > MAX_UPDATE_DATA {
                skipped += 1;
                continue;
            }
            size += msg.encoded_len();
            missing.push(msg);
        }

        if skipped > 0 {
            tracing::warn!(
                peer = %peer.id(),
                sent = missing.len(),
                skipped,
                "Cache response exceeds update limit, remaining entries deferred"
            );
        }

        let count = missing.len();
        let frame = build_update(node, UpdateOperation::CacheResponse, CacheResponse::new(missing).encode())?;
        tracing::debug!(peer = %peer.id(), entries = count, "Sending cache response");
        node.queue_message(peer, frame);
        self.stats.responses_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn handle_response(&self, node: &Node, data: &[u8], peer: &Arc<Peer>) -> Result<(), ProtocolError> {
        let response = CacheResponse::decode(data)?;
        let total = response.messages.len();

        let merged = response
            .messages
            .into_iter()
            .filter(|msg| node.add_to_cache(msg.clone()))
            .count();

        tracing::debug!(peer = %peer.id(), received = total, merged, "Cache response merged");
        self.stats.entries_merged.fetch_add(merged as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Number of leading keys whose query encoding fits in one update payload
fn fit_keys(keys: &[MessageKey]) -> usize {
    let mut size = COUNT_LEN;
    for (i, key) in keys.iter().enumerate() {
        size += 8 + key.source.encoded_len();
        if size > MAX_UPDATE_DATA {
            return i;
        }
    }
    keys.len()
}

/// Wrap reconciliation data in a no-cache, zero-TTL message from the local contact
fn build_update(
    node: &Node,
    operation: UpdateOperation,
    data: Result<Vec<u8>, ProtocolError>,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = UpdatePayload::new(operation, data?).encode()?;
    node.new_message(PayloadType::Update, payload, 0)
        .with_flags(FLAG_NO_CACHE)
        .encode()
}
