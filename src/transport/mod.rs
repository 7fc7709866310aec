// Transport module - THE WIRE
// Byte-stuffed framing over TCP streams, with dial and accept helpers

mod connection;
pub mod framing;
pub mod tcp;
mod types;

pub use connection::{Connection, ConnectionId};
pub use framing::FrameCodec;
pub use tcp::{dial, Link, Listener};
pub use types::{
    PeerAddress, TransportConfig, TransportError, DEFAULT_MAX_FRAME_SIZE, MIN_FRAME_SIZE,
};
