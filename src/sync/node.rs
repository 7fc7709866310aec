// Node - coordination point of the mesh
//
// Owns the gossip engine (and with it the cache), the peer set, the local
// identity and the callback registries. Tasks per node:
// - accept: binds inbound streams to peers
// - dispatch: consumes peer events, feeds frames into the engine
//
// Lock order: engine, then peer list, then a peer's own state.

use crate::protocol::{Contact, Message, PayloadType};
use crate::sync::gossip::{GossipConfig, GossipEngine, GossipError, GossipEvent, GossipStats};
use crate::sync::peer::{Peer, PeerConfig, PeerEvent, PeerId, PeerOrigin, PeerState};
use crate::transport::{Connection, Listener, PeerAddress, TransportError};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the merged peer event channel
const EVENT_CHANNEL_SIZE: usize = 256;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Node-level errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Node already started")]
    AlreadyStarted,

    #[error("Node is shut down")]
    ShutDown,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Handle returned when registering a callback
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u64);

/// Called for every message delivered locally; the peer is None for local origin
pub type MessageCallback = Arc<dyn Fn(&Message, Option<&Arc<Peer>>) + Send + Sync>;

/// Called whenever a peer connection becomes active
pub type PeerConnectedCallback = Arc<dyn Fn(&Arc<Peer>) + Send + Sync>;

/// Runtime configuration of a node
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Address the listener binds to
    pub bind_address: String,
    /// Port the listener binds to (0 for random)
    pub port: u16,
    /// Peers this node dials
    pub peers: Vec<PeerAddress>,
    /// Queue, retry and transport settings shared by all peers
    pub peer: PeerConfig,
    /// Cache and read-only settings
    pub gossip: GossipConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7000,
            peers: Vec::new(),
            peer: PeerConfig::default(),
            gossip: GossipConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_peer(mut self, address: PeerAddress) -> Self {
        self.peers.push(address);
        self
    }

    pub fn with_peer_config(mut self, peer: PeerConfig) -> Self {
        self.peer = peer;
        self
    }

    pub fn with_gossip_config(mut self, gossip: GossipConfig) -> Self {
        self.gossip = gossip;
        self
    }
}

struct NodeInner {
    config: NodeConfig,
    local: Contact,
    engine: Mutex<GossipEngine>,
    peers: RwLock<Vec<Arc<Peer>>>,
    message_callbacks: RwLock<BTreeMap<CallbackId, MessageCallback>>,
    peer_callbacks: RwLock<BTreeMap<CallbackId, PeerConnectedCallback>>,
    next_callback_id: AtomicU64,
    next_peer_id: AtomicU64,
    next_sequence: AtomicU64,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<PeerEvent>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// Cloneable handle to a running node
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

/// Non-owning handle, for collaborators registered as callbacks
#[derive(Clone)]
pub struct WeakNode {
    inner: Weak<NodeInner>,
}

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.inner.upgrade().map(|inner| Node { inner })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn initial_sequence() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
}

impl Node {
    /// Create a node and its configured outbound peers; nothing runs until `start`
    pub fn new(local: Contact, config: NodeConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let shutdown = CancellationToken::new();
        let engine = GossipEngine::new(local.clone(), config.gossip.clone());

        let inner = Arc::new(NodeInner {
            local,
            engine: Mutex::new(engine),
            peers: RwLock::new(Vec::new()),
            message_callbacks: RwLock::new(BTreeMap::new()),
            peer_callbacks: RwLock::new(BTreeMap::new()),
            next_callback_id: AtomicU64::new(1),
            next_peer_id: AtomicU64::new(1),
            next_sequence: AtomicU64::new(initial_sequence()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
            config,
        });

        let node = Self { inner };
        let outbound: Vec<Arc<Peer>> = node
            .inner
            .config
            .peers
            .iter()
            .map(|address| {
                node.create_peer(PeerOrigin::Outbound {
                    address: address.clone(),
                })
            })
            .collect();
        node.write_peers().extend(outbound);
        node
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Bind the listener and spawn the accept, dispatch and peer tasks
    pub async fn start(&self) -> Result<SocketAddr, NodeError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(NodeError::ShutDown);
        }
        let events_rx = lock(&self.inner.events_rx)
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        let config = &self.inner.config;
        let listener =
            match Listener::bind(&config.bind_address, config.port, config.peer.transport.clone()).await {
                Ok(listener) => listener,
                Err(e) => {
                    *lock(&self.inner.events_rx) = Some(events_rx);
                    return Err(e.into());
                }
            };
        let local_addr = listener.local_addr();
        *lock(&self.inner.local_addr) = Some(local_addr);

        tracing::info!(
            addr = %local_addr,
            callsign = %self.inner.local,
            peers = config.peers.len(),
            "Node listening"
        );

        let accept = tokio::spawn(self.clone().accept_loop(listener));
        let dispatch = tokio::spawn(self.clone().dispatch_loop(events_rx));
        lock(&self.inner.tasks).extend([accept, dispatch]);

        for peer in self.peers() {
            peer.start();
        }

        Ok(local_addr)
    }

    /// Stop every task and close every connection
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for peer in self.peers() {
            peer.close();
        }

        let tasks: Vec<JoinHandle<()>> = lock(&self.inner.tasks).drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!(callsign = %self.inner.local, "Node stopped");
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    pub fn local_contact(&self) -> &Contact {
        &self.inner.local
    }

    /// Fresh sequence number for a locally originated message
    pub fn next_sequence(&self) -> u64 {
        self.inner.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Build a message from the local contact with a fresh sequence number
    pub fn new_message(&self, payload_type: PayloadType, payload: Vec<u8>, ttl: u8) -> Message {
        Message::new(self.inner.local.clone(), self.next_sequence(), payload_type, payload).with_ttl(ttl)
    }

    // ========================================================================
    // PEERS
    // ========================================================================

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.inner
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_peers(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Peer>>> {
        self.inner.peers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_peer(&self, origin: PeerOrigin) -> Arc<Peer> {
        let id = PeerId(self.inner.next_peer_id.fetch_add(1, Ordering::Relaxed));
        Peer::new(
            id,
            origin,
            self.inner.config.peer.clone(),
            &self.inner.shutdown,
            self.inner.events_tx.clone(),
        )
    }

    /// Push a pre-encoded frame to one peer, bypassing the flood logic
    pub fn queue_message(&self, peer: &Peer, data: Vec<u8>) {
        peer.queue_message(data);
    }

    async fn accept_loop(self, listener: Listener) {
        loop {
            let accepted = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((conn, frames)) => {
                    let peer = self.bind_inbound(&conn);
                    peer.set_connection(conn, frames).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
        tracing::debug!("Accept task stopped");
    }

    /// Pick the peer an accepted stream belongs to
    ///
    /// A disconnected inbound peer from the same IP is reused; otherwise a new
    /// inbound peer joins the set.
    fn bind_inbound(&self, conn: &Connection) -> Arc<Peer> {
        let remote = conn.remote_addr();
        let mut peers = self.write_peers();

        let existing = peers.iter().find(|peer| {
            matches!(peer.origin(), PeerOrigin::Inbound { remote: r } if r.ip() == remote.ip())
                && peer.state() == PeerState::Disconnected
        });
        if let Some(peer) = existing {
            tracing::info!(peer = %peer.id(), remote = %remote, "Rebinding inbound peer");
            return Arc::clone(peer);
        }

        let peer = self.create_peer(PeerOrigin::Inbound { remote });
        tracing::info!(peer = %peer.id(), remote = %remote, "New inbound peer");
        peers.push(Arc::clone(&peer));
        peer.start();
        peer
    }

    async fn dispatch_loop(self, mut events: mpsc::Receiver<PeerEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                PeerEvent::Connected(peer) => self.peer_connected(&peer),
                PeerEvent::Frame { peer, data } => self.handle_message(&data, Some(&peer)),
            }
        }
        tracing::debug!("Dispatch task stopped");
    }

    // ========================================================================
    // GOSSIP
    // ========================================================================

    fn engine(&self) -> MutexGuard<'_, GossipEngine> {
        lock(&self.inner.engine)
    }

    /// Flood a locally originated message
    ///
    /// Message callbacks run on the current tokio runtime. Outside one they
    /// are skipped with a warning while caching and queueing still happen.
    pub fn spread_message(&self, msg: Message) -> Result<(), GossipError> {
        let mut engine = self.engine();
        let events = engine.spread_message(msg)?;
        self.apply(events, None);
        Ok(())
    }

    /// Process a raw frame, as received from `from`
    pub fn handle_message(&self, raw: &[u8], from: Option<&Arc<Peer>>) {
        let mut engine = self.engine();
        match engine.handle_message(raw) {
            Ok(events) => self.apply(events, from),
            Err(e) => {
                let peer = from.map(|p| p.id().to_string()).unwrap_or_default();
                tracing::warn!(peer = %peer, error = %e, "Dropping malformed frame");
                tracing::debug!(peer = %peer, frame = %hex::encode(raw), "Malformed frame dump");
            }
        }
    }

    /// Carry out engine decisions; runs under the engine lock so relay order matches cache order
    fn apply(&self, events: Vec<GossipEvent>, from: Option<&Arc<Peer>>) {
        for event in events {
            match event {
                GossipEvent::Deliver(msg) => {
                    if let Some(peer) = from {
                        tracing::info!(
                            peer = %peer.id(),
                            source = %msg.source,
                            sequence = msg.sequence,
                            version = msg.version,
                            flags = msg.flags,
                            ttl = msg.ttl,
                            payload_type = ?msg.payload_type,
                            payload_len = msg.payload.len(),
                            path = %msg.path,
                            "Message received"
                        );
                    }
                    self.deliver(msg, from.cloned());
                }
                GossipEvent::Relay(wire) => {
                    for peer in self.peers() {
                        peer.queue_message(wire.clone());
                    }
                }
                GossipEvent::Reply(wire) => {
                    if let Some(peer) = from {
                        peer.queue_message(wire);
                    }
                }
            }
        }
    }

    /// Copy of the cache, oldest first
    pub fn cache_snapshot(&self) -> Vec<Message> {
        self.engine().cache_snapshot()
    }

    /// Merge an externally obtained message into the cache without relaying it
    pub fn add_to_cache(&self, msg: Message) -> bool {
        self.engine().add_to_cache(msg)
    }

    pub fn cache_len(&self) -> usize {
        self.engine().cache().len()
    }

    pub fn stats(&self) -> GossipStats {
        self.engine().stats().clone()
    }

    // ========================================================================
    // CALLBACKS
    // ========================================================================

    fn next_callback_id(&self) -> CallbackId {
        CallbackId(self.inner.next_callback_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_message_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Message, Option<&Arc<Peer>>) + Send + Sync + 'static,
    {
        let id = self.next_callback_id();
        self.inner
            .message_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        id
    }

    pub fn remove_message_callback(&self, id: CallbackId) -> bool {
        self.inner
            .message_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn add_peer_connected_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Arc<Peer>) + Send + Sync + 'static,
    {
        let id = self.next_callback_id();
        self.inner
            .peer_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        id
    }

    pub fn remove_peer_connected_callback(&self, id: CallbackId) -> bool {
        self.inner
            .peer_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn deliver(&self, msg: Message, from: Option<Arc<Peer>>) {
        let callbacks: Vec<MessageCallback> = self
            .inner
            .message_callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        if callbacks.is_empty() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(key = %msg.key(), "No async runtime, skipping message callbacks");
            return;
        };

        runtime.spawn(async move {
            for callback in callbacks {
                callback(&msg, from.as_ref());
            }
        });
    }

    fn peer_connected(&self, peer: &Arc<Peer>) {
        let callbacks: Vec<PeerConnectedCallback> = self
            .inner
            .peer_callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        if callbacks.is_empty() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(peer = %peer, "No async runtime, skipping peer callbacks");
            return;
        };

        let peer = Arc::clone(peer);
        runtime.spawn(async move {
            for callback in callbacks {
                callback(&peer);
            }
        });
    }
}
