// Transport Core Types
// Configuration, addressing and errors shared by the framing codec and TCP links

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default bound on a wrapped frame, markers and escapes included
pub const DEFAULT_MAX_FRAME_SIZE: usize = 262_144;

/// Smallest frame bound accepted by validation
pub const MIN_FRAME_SIZE: usize = 16;

// ============================================================================
// TRANSPORT CONFIG
// ============================================================================

/// Configuration for framed TCP links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Dial timeout in seconds
    pub connection_timeout_secs: u64,
    /// Maximum wrapped frame size in bytes
    pub max_frame_size: usize,
    /// Frames buffered between a connection's owner and its send task
    pub send_buffer: usize,
    /// Frames buffered between a connection's receive task and its owner
    pub receive_buffer: usize,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 10,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_buffer: 16,
            receive_buffer: 64,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_send_buffer(mut self, frames: usize) -> Self {
        self.send_buffer = frames;
        self
    }

    pub fn with_receive_buffer(mut self, frames: usize) -> Self {
        self.receive_buffer = frames;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(TransportError::InvalidConfig(format!(
                "max_frame_size must be at least {}",
                MIN_FRAME_SIZE
            )));
        }
        if self.send_buffer == 0 || self.receive_buffer == 0 {
            return Err(TransportError::InvalidConfig(
                "channel buffers cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// PEER ADDRESS
// ============================================================================

/// Host and port of a peer this node dials
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Connection closed")]
    Closed,

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl TransportError {
    /// Check if the operation can be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed(_) | Self::SendFailed(_) | Self::IoError(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}
