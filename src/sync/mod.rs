// Sync module - HOW NODES TALK
// Handles flooding, the message cache, peer lifecycles and the node that ties them together

mod cache;
mod gossip;
mod node;
mod peer;

pub use cache::MessageCache;
pub use gossip::{GossipConfig, GossipEngine, GossipError, GossipEvent, GossipStats};
pub use node::{
    CallbackId, MessageCallback, Node, NodeConfig, NodeError, PeerConnectedCallback, WeakNode,
};
pub use peer::{Peer, PeerConfig, PeerEvent, PeerId, PeerOrigin, PeerState};
