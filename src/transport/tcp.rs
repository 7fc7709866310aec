// TCP Transport Implementation
// Dials outbound peers and accepts inbound ones, handing each stream to a framed Connection

use crate::transport::connection::Connection;
use crate::transport::types::{PeerAddress, TransportConfig, TransportError};
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// A live connection together with its inbound frame channel
pub type Link = (Connection, mpsc::Receiver<Vec<u8>>);

/// Connect to a peer, bounded by the configured dial timeout
///
/// Resolution and every connect attempt share the timeout. A host that is
/// empty or does not resolve yields `InvalidAddress`.
pub async fn dial(address: &PeerAddress, config: &TransportConfig) -> Result<Link, TransportError> {
    if address.host.trim().is_empty() {
        return Err(TransportError::InvalidAddress(format!("empty host in {}", address)));
    }

    let connect_timeout = Duration::from_secs(config.connection_timeout_secs);
    let stream = timeout(connect_timeout, connect(address))
        .await
        .map_err(|_| TransportError::Timeout)??;

    Connection::spawn(stream, config)
}

/// Try each resolved address in turn
async fn connect(address: &PeerAddress) -> Result<TcpStream, TransportError> {
    let resolved = lookup_host((address.host.as_str(), address.port))
        .await
        .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", address, e)))?;

    let mut last_error = None;
    for addr in resolved {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) => TransportError::ConnectionFailed(e.to_string()),
        None => TransportError::InvalidAddress(format!("{} resolved to no address", address)),
    })
}

/// Listening socket producing framed connections
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    config: TransportConfig,
}

impl Listener {
    /// Bind to `host:port`; port 0 picks a free one
    pub async fn bind(host: &str, port: u16, config: TransportConfig) -> Result<Self, TransportError> {
        let bind_addr = PeerAddress::new(host, port).to_string();
        let inner = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {}: {}", bind_addr, e)))?;
        let local_addr = inner.local_addr()?;

        Ok(Self {
            inner,
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next inbound stream
    pub async fn accept(&self) -> Result<Link, TransportError> {
        let (stream, _) = self.inner.accept().await?;
        Connection::spawn(stream, &self.config)
    }
}
