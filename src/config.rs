// Configuration - JSON config file with node and station sections
//
// {
//   "node": { "port": 7000, "peers": [{ "host": "10.0.0.2", "port": 7000 }],
//             "logic": { "cache_size": 1000 } },
//   "station": { "callsign": "DL1ABC", "contact_type": "fixed", "ips": ["10.0.0.1"] }
// }
//
// Every field except the callsign has a default. The camelCase names used by
// older deployments are accepted as aliases.

use crate::protocol::contact::MAX_FIELD_LEN;
use crate::protocol::{Contact, ContactType, ProtocolError};
use crate::sync::{GossipConfig, NodeConfig, PeerConfig};
use crate::transport::{PeerAddress, TransportConfig, DEFAULT_MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default listener port
pub const DEFAULT_PORT: u16 = 7000;
/// Default outbound queue capacity per peer
pub const DEFAULT_PEER_QUEUE_SIZE: usize = 100;
/// Default failed sends tolerated per connection
pub const DEFAULT_RETRIES: u32 = 3;
/// Default reconnect period in seconds
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 10;
/// Default dial timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default cache capacity in messages
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Complete configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeSettings,
    pub station: Station,
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogicSettings {
    #[serde(alias = "cacheSize")]
    pub cache_size: usize,
    #[serde(alias = "readonly")]
    pub read_only: bool,
}

impl Default for LogicSettings {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            read_only: false,
        }
    }
}

/// Listener, peer and logic settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    #[serde(alias = "bindAddress")]
    pub bind_address: String,
    pub port: u16,
    #[serde(alias = "peerQueueSize")]
    pub peer_queue_size: usize,
    pub retries: u32,
    #[serde(alias = "reconnectTimeout")]
    pub reconnect_interval_secs: u64,
    #[serde(alias = "connectTimeout")]
    pub connect_timeout_secs: u64,
    #[serde(alias = "maxFrameSize")]
    pub max_frame_size: usize,
    pub peers: Vec<PeerAddress>,
    pub logic: LogicSettings,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            peer_queue_size: DEFAULT_PEER_QUEUE_SIZE,
            retries: DEFAULT_RETRIES,
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            peers: Vec::new(),
            logic: LogicSettings::default(),
        }
    }
}

impl NodeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_peer(mut self, host: &str, port: u16) -> Self {
        self.peers.push(PeerAddress::new(host, port));
        self
    }

    pub fn with_peer_queue_size(mut self, size: usize) -> Self {
        self.peer_queue_size = size;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_reconnect_interval(mut self, secs: u64) -> Self {
        self.reconnect_interval_secs = secs;
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.logic.cache_size = size;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.logic.read_only = read_only;
        self
    }

    /// Runtime configuration for the node
    pub fn node_config(&self) -> NodeConfig {
        let transport = TransportConfig::new()
            .with_connection_timeout(self.connect_timeout_secs)
            .with_max_frame_size(self.max_frame_size);
        let peer = PeerConfig::new()
            .with_queue_size(self.peer_queue_size)
            .with_retries(self.retries)
            .with_reconnect_interval(Duration::from_secs(self.reconnect_interval_secs))
            .with_transport(transport);
        let gossip = GossipConfig::new()
            .with_cache_size(self.logic.cache_size)
            .with_read_only(self.logic.read_only);

        let mut config = NodeConfig::new()
            .with_bind_address(&self.bind_address)
            .with_port(self.port)
            .with_peer_config(peer)
            .with_gossip_config(gossip);
        config.peers = self.peers.clone();
        config
    }
}

/// Identity of the local station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub callsign: String,
    #[serde(default, alias = "contactType")]
    pub contact_type: ContactType,
    #[serde(default)]
    pub ips: Vec<IpAddr>,
}

impl Station {
    pub fn new(callsign: &str) -> Self {
        Self {
            callsign: callsign.to_string(),
            contact_type: ContactType::default(),
            ips: Vec::new(),
        }
    }

    /// Contact record announced as the source of local messages
    pub fn contact(&self) -> Result<Contact, ProtocolError> {
        self.ips
            .iter()
            .try_fold(Contact::new(self.contact_type, self.callsign.as_bytes())?, |contact, ip| {
                contact.with_ip(*ip)
            })
    }
}

impl Config {
    pub fn new(station: Station) -> Self {
        Self {
            node: NodeSettings::default(),
            station,
        }
    }

    /// Read and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON document
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let callsign = self.station.callsign.trim();
        if callsign.is_empty() {
            return Err(ConfigError::Invalid("station callsign cannot be empty".to_string()));
        }
        if self.station.callsign.len() > MAX_FIELD_LEN {
            return Err(ConfigError::Invalid(format!(
                "station callsign longer than {} bytes",
                MAX_FIELD_LEN
            )));
        }
        if self.station.callsign.contains(';') {
            return Err(ConfigError::Invalid(
                "station callsign cannot contain ';'".to_string(),
            ));
        }
        if self.node.logic.cache_size == 0 {
            return Err(ConfigError::Invalid("cache_size cannot be 0".to_string()));
        }
        if self.node.peer_queue_size == 0 {
            return Err(ConfigError::Invalid("peer_queue_size cannot be 0".to_string()));
        }
        if self.node.reconnect_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconnect_interval_secs cannot be 0".to_string(),
            ));
        }
        self.node_config()
            .peer
            .transport
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn node_config(&self) -> NodeConfig {
        self.node.node_config()
    }

    pub fn local_contact(&self) -> Result<Contact, ConfigError> {
        self.station
            .contact()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
