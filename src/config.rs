//! Endpoint configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Network magic bytes prefixing every frame.
pub const MAGIC: [u8; 4] = [0xE9, 0xBE, 0xB4, 0xD9];

/// Maximum payload size in bytes (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Current protocol version advertised in `version` messages.
pub const PROTOCOL_VERSION: u32 = 3;

/// Service bitmask flag: node relays application messages.
pub const SERVICE_NODE_NETWORK: u64 = 1;

/// Default handshake timeout: a peer that has not completed the
/// version/verack exchange within this window is disconnected.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Default idle timeout once a connection is established.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Default timeout for establishing outbound TCP connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default user agent string.
pub const DEFAULT_USER_AGENT: &str = "/peerlink:0.1.0/";

/// Default advertised listening port.
pub const DEFAULT_PORT: u16 = 8444;

/// Configuration for a transport endpoint (dialing or listening).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Service-feature bitmask advertised during the handshake.
    pub services: u64,

    /// User agent string sent in `version` messages.
    pub user_agent: String,

    /// Stream numbers this endpoint accepts traffic for.
    pub streams: Vec<u32>,

    /// Listening port advertised to peers.
    pub port: u16,

    /// Bootstrap seed addresses, returned as-is by `bootstrap()`.
    pub seeds: Vec<SocketAddr>,

    /// Timeout for completing the handshake.
    pub handshake_timeout: Duration,

    /// Inactivity timeout once established.
    pub idle_timeout: Duration,

    /// Timeout for establishing outbound TCP connections.
    pub connect_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            services: SERVICE_NODE_NETWORK,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            streams: vec![1],
            port: DEFAULT_PORT,
            seeds: Vec::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl EndpointConfig {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised service bitmask.
    pub fn with_services(mut self, services: u64) -> Self {
        self.services = services;
        self
    }

    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the accepted stream numbers.
    pub fn with_streams(mut self, streams: Vec<u32>) -> Self {
        self.streams = streams;
        self
    }

    /// Set the advertised listening port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bootstrap seed addresses.
    pub fn with_seeds(mut self, seeds: Vec<SocketAddr>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the post-establishment idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the outbound connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
