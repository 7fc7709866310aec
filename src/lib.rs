// hammesh - gossip node for radio-network station discovery
//
// Stations flood short announcements across a multi-hop overlay of TCP links.
//
// protocol  - binary codec for contacts, messages and their payloads
// transport - byte-stuffed framing over TCP, dial and accept
// sync      - message cache, flood engine, peer lifecycle, node
// handlers  - acknowledgement logging and cache reconciliation
// config    - JSON configuration file

pub mod config;
pub mod handlers;
pub mod protocol;
pub mod sync;
pub mod transport;

pub use config::{Config, ConfigError};
pub use protocol::{Contact, Message, MessageKey, PayloadType, ProtocolError};
pub use sync::{GossipError, Node, NodeConfig, NodeError, Peer, WeakNode};
pub use transport::TransportError;
