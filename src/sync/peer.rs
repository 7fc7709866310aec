// Peer Management - one neighbour and its connection lifecycle
//
// A Peer outlives any number of connections. It owns:
// - the current framed connection and the task forwarding its frames
// - a bounded outbound queue drained by a dedicated task
// - for outbound peers, a reconnect timer
//
// Disconnected -> Connecting -> Active on a successful dial, straight to
// Active when an accepted stream is bound, back to Disconnected when the
// stream closes or the retry budget runs out.

use crate::transport::{dial, Connection, ConnectionId, PeerAddress, TransportConfig, TransportError};
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Identifier of a peer within one node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub(crate) u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Connection state of a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// No usable connection
    Disconnected,
    /// Dial in progress
    Connecting,
    /// Connection bound and draining
    Active,
}

/// Which side created the peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerOrigin {
    /// Configured peer this node dials and redials
    Outbound { address: PeerAddress },
    /// Accepted from the listener; waits to be rebound by a new accept
    Inbound { remote: SocketAddr },
}

/// Configuration for peer links
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Outbound queue capacity in frames
    pub queue_size: usize,
    /// Failed sends tolerated before the connection is dropped
    pub retries: u32,
    /// Period of the reconnect timer
    pub reconnect_interval: Duration,
    /// Settings for the framed connection
    pub transport: TransportConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            queue_size: 100,
            retries: 3,
            reconnect_interval: Duration::from_secs(10),
            transport: TransportConfig::default(),
        }
    }
}

impl PeerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// Notifications from peers to the node
pub enum PeerEvent {
    /// A connection was bound and the peer is active
    Connected(Arc<Peer>),
    /// A frame payload arrived
    Frame { peer: Arc<Peer>, data: Vec<u8> },
}

struct QueuedFrame {
    id: u64,
    data: Vec<u8>,
}

struct ReceivePath {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

struct PeerInner {
    state: PeerState,
    connection: Option<Connection>,
    receiver: Option<ReceivePath>,
    queue: VecDeque<QueuedFrame>,
    next_frame_id: u64,
    retries: u32,
}

/// One directly connected neighbour
pub struct Peer {
    id: PeerId,
    origin: PeerOrigin,
    config: PeerConfig,
    inner: Mutex<PeerInner>,
    /// Wakes the drain task
    wake: Notify,
    /// Serializes connection rebinding
    bind_lock: tokio::sync::Mutex<()>,
    close: CancellationToken,
    events: mpsc::Sender<PeerEvent>,
}

impl Peer {
    /// Create a disconnected peer; no task runs until `start`
    pub fn new(
        id: PeerId,
        origin: PeerOrigin,
        config: PeerConfig,
        parent: &CancellationToken,
        events: mpsc::Sender<PeerEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            origin,
            config,
            inner: Mutex::new(PeerInner {
                state: PeerState::Disconnected,
                connection: None,
                receiver: None,
                queue: VecDeque::new(),
                next_frame_id: 0,
                retries: 0,
            }),
            wake: Notify::new(),
            bind_lock: tokio::sync::Mutex::new(()),
            close: parent.child_token(),
            events,
        })
    }

    /// Spawn the drain task, and the reconnect timer for outbound peers
    pub fn start(self: &Arc<Self>) {
        tokio::spawn(Arc::clone(self).drain_loop());
        if let PeerOrigin::Outbound { address } = &self.origin {
            tokio::spawn(Arc::clone(self).reconnect_loop(address.clone()));
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn origin(&self) -> &PeerOrigin {
        &self.origin
    }

    pub fn is_inbound(&self) -> bool {
        matches!(self.origin, PeerOrigin::Inbound { .. })
    }

    /// Remote address of the current connection, or the one the peer was created from
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        if let Some(conn) = &self.lock().connection {
            return Some(conn.remote_addr());
        }
        match &self.origin {
            PeerOrigin::Inbound { remote } => Some(*remote),
            PeerOrigin::Outbound { .. } => None,
        }
    }

    pub fn state(&self) -> PeerState {
        self.lock().state
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Copy of the queued frames, oldest first
    pub fn queued_frames(&self) -> Vec<Vec<u8>> {
        self.lock().queue.iter().map(|f| f.data.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    fn lock(&self) -> MutexGuard<'_, PeerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // OUTBOUND QUEUE
    // ========================================================================

    /// Append an encoded frame, dropping the oldest one when the queue is full
    pub fn queue_message(&self, data: Vec<u8>) {
        {
            let mut inner = self.lock();
            while inner.queue.len() >= self.config.queue_size {
                if inner.queue.pop_front().is_none() {
                    break;
                }
                tracing::warn!(peer = %self.id, "Outbound queue full, dropping oldest frame");
            }
            let id = inner.next_frame_id;
            inner.next_frame_id += 1;
            inner.queue.push_back(QueuedFrame { id, data });
        }
        self.wake.notify_one();
    }

    async fn drain_loop(self: Arc<Self>) {
        loop {
            let next = {
                let inner = self.lock();
                match (&inner.connection, inner.queue.front()) {
                    (Some(conn), Some(frame)) if inner.state == PeerState::Active => {
                        Some((conn.clone(), frame.id, frame.data.clone()))
                    }
                    _ => None,
                }
            };

            let Some((conn, frame_id, data)) = next else {
                tokio::select! {
                    _ = self.close.cancelled() => break,
                    _ = self.wake.notified() => {}
                }
                continue;
            };

            let result = tokio::select! {
                _ = self.close.cancelled() => break,
                sent = conn.send(data) => sent,
            };
            self.finish_send(&conn, frame_id, result);
        }
        tracing::debug!(peer = %self.id, "Drain task stopped");
    }

    fn finish_send(&self, conn: &Connection, frame_id: u64, result: Result<(), TransportError>) {
        let mut inner = self.lock();
        match result {
            Ok(()) => {
                pop_head(&mut inner, frame_id);
                inner.retries = 0;
            }
            Err(TransportError::FrameTooLarge { size, max }) => {
                tracing::warn!(peer = %self.id, size, max, "Frame too large, dropping");
                pop_head(&mut inner, frame_id);
            }
            Err(TransportError::Closed) => {
                drop(inner);
                self.connection_lost(conn.id());
            }
            Err(e) if e.is_retryable() => {
                inner.retries += 1;
                if inner.retries <= self.config.retries {
                    tracing::debug!(peer = %self.id, error = %e, retry = inner.retries, "Send failed");
                    return;
                }
                tracing::warn!(
                    peer = %self.id,
                    error = %e,
                    "Retry budget exhausted, closing connection"
                );
                inner.retries = 0;
                drop(inner);
                self.connection_lost(conn.id());
                conn.close();
            }
            Err(e) => {
                tracing::warn!(peer = %self.id, error = %e, "Unrecoverable send error, closing connection");
                drop(inner);
                self.connection_lost(conn.id());
                conn.close();
            }
        }
    }

    // ========================================================================
    // CONNECTION LIFECYCLE
    // ========================================================================

    /// Bind a connection, replacing and closing any previous one
    ///
    /// The previous receive path is stopped and awaited before the new one
    /// starts, so frames from two connections never interleave.
    pub async fn set_connection(self: &Arc<Self>, conn: Connection, frames: mpsc::Receiver<Vec<u8>>) {
        let bind = self.bind_lock.lock().await;

        let (old_conn, old_receiver) = {
            let mut inner = self.lock();
            (inner.connection.take(), inner.receiver.take())
        };
        if let Some(receiver) = old_receiver {
            receiver.stop.cancel();
            let _ = receiver.handle.await;
        }
        if let Some(old) = old_conn {
            tracing::debug!(peer = %self.id, conn = %old.id(), "Replacing connection");
            old.close();
        }

        if self.close.is_cancelled() {
            conn.close();
            return;
        }

        let remote = conn.remote_addr();
        {
            let mut inner = self.lock();
            inner.connection = Some(conn.clone());
            inner.state = PeerState::Active;
            inner.retries = 0;
        }
        let stop = self.close.child_token();
        let handle = self.spawn_forwarder(conn, frames, stop.clone());
        self.lock().receiver = Some(ReceivePath { stop, handle });
        drop(bind);
        self.wake.notify_one();

        tracing::info!(peer = %self.id, remote = %remote, "Peer connected");
        let _ = self.events.send(PeerEvent::Connected(Arc::clone(self))).await;
    }

    fn spawn_forwarder(
        self: &Arc<Self>,
        conn: Connection,
        mut frames: mpsc::Receiver<Vec<u8>>,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let data = tokio::select! {
                    _ = stop.cancelled() => return,
                    frame = frames.recv() => match frame {
                        Some(data) => data,
                        None => break,
                    },
                };

                let event = PeerEvent::Frame {
                    peer: Arc::clone(&peer),
                    data,
                };
                tokio::select! {
                    _ = stop.cancelled() => return,
                    sent = peer.events.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            peer.connection_lost(conn.id());
        })
    }

    /// Mark the peer disconnected if `conn_id` is still the bound connection
    fn connection_lost(&self, conn_id: ConnectionId) {
        let mut inner = self.lock();
        if !is_current(&inner, conn_id) {
            return;
        }
        if let Some(conn) = inner.connection.take() {
            conn.close();
        }
        inner.receiver = None;
        inner.state = PeerState::Disconnected;
        drop(inner);
        tracing::info!(peer = %self.id, "Peer disconnected");
    }

    /// Atomically move Disconnected to Connecting
    fn begin_connect(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != PeerState::Disconnected {
            return false;
        }
        inner.state = PeerState::Connecting;
        true
    }

    async fn reconnect_loop(self: Arc<Self>, address: PeerAddress) {
        let mut ticker = interval(self.config.reconnect_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.close.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.begin_connect() {
                continue;
            }

            tracing::debug!(peer = %self.id, address = %address, "Connecting");
            let dialed = tokio::select! {
                _ = self.close.cancelled() => break,
                dialed = dial(&address, &self.config.transport) => dialed,
            };

            match dialed {
                Ok((conn, frames)) => self.set_connection(conn, frames).await,
                Err(e) => {
                    tracing::debug!(peer = %self.id, address = %address, error = %e, "Connection attempt failed");
                    let mut inner = self.lock();
                    if inner.state == PeerState::Connecting {
                        inner.state = PeerState::Disconnected;
                    }
                }
            }
        }
        tracing::debug!(peer = %self.id, "Reconnect task stopped");
    }

    /// Stop every task of this peer and close its connection
    pub fn close(&self) {
        self.close.cancel();
        let mut inner = self.lock();
        if let Some(conn) = inner.connection.take() {
            conn.close();
        }
        inner.receiver = None;
        inner.state = PeerState::Disconnected;
    }
}

fn is_current(inner: &PeerInner, conn_id: ConnectionId) -> bool {
    inner.connection.as_ref().map(Connection::id) == Some(conn_id)
}

fn pop_head(inner: &mut PeerInner, frame_id: u64) {
    if inner.queue.front().map(|f| f.id) == Some(frame_id) {
        inner.queue.pop_front();
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            PeerOrigin::Outbound { address } => write!(f, "{} ({})", self.id, address),
            PeerOrigin::Inbound { remote } => write!(f, "{} (inbound {})", self.id, remote),
        }
    }
}
