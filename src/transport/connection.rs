// Framed Connection
// One TCP stream split into a receive task and a send task that speak the frame codec

use crate::transport::framing::FrameCodec;
use crate::transport::types::{TransportConfig, TransportError};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

struct OutboundFrame {
    data: Vec<u8>,
    done: oneshot::Sender<Result<(), TransportError>>,
}

/// Handle to a framed stream
///
/// Cloning yields another handle to the same stream. Closing through any
/// handle stops both tasks, fails pending sends with `Closed` and ends the
/// inbound frame channel.
///
/// A failed write is reported to its sender and leaves the stream open.
/// Only a read failure, the remote closing or `close` ends it.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    remote: SocketAddr,
    outbound: mpsc::Sender<OutboundFrame>,
    closed: CancellationToken,
}

impl Connection {
    /// Take ownership of a stream and start its send and receive tasks
    ///
    /// Returns the handle and the channel of inbound frame payloads.
    pub fn spawn(
        stream: TcpStream,
        config: &TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), TransportError> {
        let remote = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(config.nodelay) {
            tracing::debug!(remote = %remote, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = ConnectionId::next();
        let closed = CancellationToken::new();
        let (reader, writer) = stream.into_split();
        let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(config.receive_buffer);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(config.send_buffer);

        // Receive task
        let mut frames = FramedRead::new(reader, FrameCodec::new(config.max_frame_size));
        let recv_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = recv_closed.cancelled() => break,
                    next = frames.next() => match next {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            tracing::debug!(conn = %id, error = %e, "Read failed");
                            break;
                        }
                        None => {
                            tracing::debug!(conn = %id, "Remote closed the stream");
                            break;
                        }
                    },
                };

                tokio::select! {
                    _ = recv_closed.cancelled() => break,
                    sent = inbound_tx.send(frame) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            recv_closed.cancel();
        });

        // Send task
        let mut sink = FramedWrite::new(writer, FrameCodec::new(config.max_frame_size));
        let send_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = send_closed.cancelled() => break,
                    next = outbound_rx.recv() => match next {
                        Some(frame) => frame,
                        None => break,
                    },
                };

                let result = tokio::select! {
                    _ = send_closed.cancelled() => {
                        let _ = frame.done.send(Err(TransportError::Closed));
                        break;
                    }
                    sent = sink.send(frame.data) => sent.map_err(|e| match e {
                        TransportError::IoError(reason) => TransportError::SendFailed(reason),
                        other => other,
                    }),
                };

                if let Err(ref e) = result {
                    // Discard the unwritten tail; the remote resyncs on the next start marker
                    sink.write_buffer_mut().clear();
                    tracing::debug!(conn = %id, error = %e, "Send failed");
                }
                let _ = frame.done.send(result);
            }
            send_closed.cancel();
        });

        let connection = Self {
            id,
            remote,
            outbound: outbound_tx,
            closed,
        };
        Ok((connection, inbound_rx))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Send one frame payload and wait for the write to complete
    pub async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let (done, result) = oneshot::channel();
        tokio::select! {
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            queued = self.outbound.send(OutboundFrame { data, done }) => {
                queued.map_err(|_| TransportError::Closed)?;
            }
        }

        tokio::select! {
            biased;
            outcome = result => outcome.unwrap_or(Err(TransportError::Closed)),
            _ = self.closed.cancelled() => Err(TransportError::Closed),
        }
    }

    /// Close the stream; idempotent
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the stream is closed from either side
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}
