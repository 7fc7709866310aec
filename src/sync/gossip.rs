// Gossip Engine - flood logic of the mesh
//
// Implements flooding with loop and duplicate suppression:
// - Path: every relaying station appends its callsign; a message whose path
//   already names this station is dropped
// - TTL: decremented per hop, relaying stops at zero
// - Cache: (sequence, source) keys of recently seen messages, bounded FIFO
//
// The engine is synchronous and owns no sockets. It turns inputs into
// GossipEvents which the node then carries out.

use crate::protocol::{
    AckPayload, Contact, Message, PayloadType, ProtocolError, FLAG_NO_CACHE, PROTOCOL_VERSION,
};
use crate::sync::cache::MessageCache;
use thiserror::Error;

/// Gossip-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GossipError {
    #[error("Node is read-only")]
    ReadOnlyNode,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Configuration for the gossip engine
#[derive(Clone, Debug)]
pub struct GossipConfig {
    /// Maximum number of cached messages
    pub cache_size: usize,
    /// Refuse to originate messages
    pub read_only: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            cache_size: 1000,
            read_only: false,
        }
    }
}

impl GossipConfig {
    /// Create a new config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cache size
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Set read-only mode
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Events produced by the gossip engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GossipEvent {
    /// Hand a message to the local callbacks
    Deliver(Message),
    /// Queue an encoded message on every peer
    Relay(Vec<u8>),
    /// Queue an encoded message on the peer the input came from
    Reply(Vec<u8>),
}

/// Statistics about the gossip engine
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GossipStats {
    pub messages_processed: u64,
    pub messages_relayed: u64,
    pub duplicates_dropped: u64,
    pub loops_suppressed: u64,
    pub malformed_dropped: u64,
    pub acks_sent: u64,
    pub cache_inserts: u64,
}

/// The gossip engine - cache owner and flood decision maker
pub struct GossipEngine {
    /// Our identity, used as source of acknowledgements
    local: Contact,
    /// Our callsign as it appears in paths
    callsign: String,
    /// Configuration
    config: GossipConfig,
    /// Recently seen messages
    cache: MessageCache,
    /// Statistics
    stats: GossipStats,
}

impl GossipEngine {
    /// Create a new gossip engine
    pub fn new(local: Contact, config: GossipConfig) -> Self {
        let callsign = local.callsign_str().into_owned();
        Self {
            cache: MessageCache::new(config.cache_size),
            local,
            callsign,
            config,
            stats: GossipStats::default(),
        }
    }

    pub fn local_contact(&self) -> &Contact {
        &self.local
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    /// Get statistics
    pub fn stats(&self) -> &GossipStats {
        &self.stats
    }

    /// Get the message cache
    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    /// Copy of the cache, oldest first
    pub fn cache_snapshot(&self) -> Vec<Message> {
        self.cache.snapshot()
    }

    // ========================================================================
    // LOCAL ORIGIN
    // ========================================================================

    /// Flood a locally originated message
    pub fn spread_message(&mut self, mut msg: Message) -> Result<Vec<GossipEvent>, GossipError> {
        if self.config.read_only {
            return Err(GossipError::ReadOnlyNode);
        }

        if msg.is_no_cache() {
            return Ok(vec![GossipEvent::Deliver(msg)]);
        }

        if self.cache.contains(&msg.key()) {
            self.stats.duplicates_dropped += 1;
            return Ok(Vec::new());
        }

        if msg.path_contains(&self.callsign) {
            self.stats.loops_suppressed += 1;
            return Ok(Vec::new());
        }

        self.record_hop(&mut msg);
        let wire = if msg.ttl > 0 { Some(msg.encode()?) } else { None };

        self.insert(msg.clone());
        let mut events = vec![GossipEvent::Deliver(msg)];
        if let Some(wire) = wire {
            self.stats.messages_relayed += 1;
            events.push(GossipEvent::Relay(wire));
        }
        Ok(events)
    }

    // ========================================================================
    // REMOTE ORIGIN
    // ========================================================================

    /// Process a frame received from a peer
    ///
    /// Only a decode failure is an error; every suppression is an empty event list.
    pub fn handle_message(&mut self, raw: &[u8]) -> Result<Vec<GossipEvent>, ProtocolError> {
        self.stats.messages_processed += 1;

        let mut msg = match Message::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.malformed_dropped += 1;
                return Err(e);
            }
        };

        if msg.path_contains(&self.callsign) {
            tracing::debug!(message = %msg, "Path already contains this station, dropping");
            self.stats.loops_suppressed += 1;
            return Ok(Vec::new());
        }

        if msg.is_no_cache() {
            return Ok(vec![GossipEvent::Deliver(msg)]);
        }

        if self.cache.contains(&msg.key()) {
            tracing::debug!(key = %msg.key(), "Message already cached, ignoring");
            self.stats.duplicates_dropped += 1;
            return Ok(Vec::new());
        }

        let ack = if msg.ack_requested() {
            Some(self.build_ack(&msg))
        } else {
            None
        };

        self.record_hop(&mut msg);
        let relay = if msg.ttl > 0 {
            match msg.encode() {
                Ok(wire) => Some(wire),
                Err(e) => {
                    tracing::warn!(message = %msg, error = %e, "Cannot relay message");
                    None
                }
            }
        } else {
            None
        };

        self.insert(msg.clone());
        let mut events = vec![GossipEvent::Deliver(msg)];
        if let Some(wire) = relay {
            self.stats.messages_relayed += 1;
            events.push(GossipEvent::Relay(wire));
        }

        match ack {
            Some(Ok(wire)) => {
                self.stats.acks_sent += 1;
                events.push(GossipEvent::Reply(wire));
            }
            Some(Err(e)) => tracing::warn!(error = %e, "Cannot build acknowledgement"),
            None => {}
        }

        Ok(events)
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    /// Merge a message obtained out of band, without relaying or delivering it
    ///
    /// Returns true if the cache grew.
    pub fn add_to_cache(&mut self, mut msg: Message) -> bool {
        if msg.is_no_cache() || self.cache.contains(&msg.key()) {
            return false;
        }
        if !msg.path_contains(&self.callsign) {
            self.record_hop(&mut msg);
        }
        self.insert(msg)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn record_hop(&self, msg: &mut Message) {
        msg.append_path(&self.callsign);
        msg.ttl = msg.ttl.saturating_sub(1);
    }

    fn insert(&mut self, msg: Message) -> bool {
        let inserted = self.cache.insert(msg);
        if inserted {
            self.stats.cache_inserts += 1;
        }
        inserted
    }

    fn build_ack(&self, msg: &Message) -> Result<Vec<u8>, ProtocolError> {
        let payload = AckPayload::new(msg.source.clone(), msg.sequence).encode();
        Message {
            version: PROTOCOL_VERSION,
            sequence: 0,
            ttl: 0,
            flags: FLAG_NO_CACHE,
            source: self.local.clone(),
            path: self.callsign.clone(),
            payload_type: PayloadType::Ack,
            payload,
        }
        .encode()
    }
}
