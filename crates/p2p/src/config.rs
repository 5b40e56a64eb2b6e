use std::net::SocketAddr;

/// Runtime configuration for the networking core.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Address on which to accept inbound peers.
    pub listen: SocketAddr,
    /// Streams this node serves.
    pub streams: Vec<u64>,
    /// User agent advertised in the version handshake.
    pub user_agent: String,
    /// Maximum number of fully connected peers.
    pub max_connections: usize,
    /// Maximum frames queued per peer before disconnecting.
    pub outbound_queue: usize,
    /// Maximum bytes per frame payload.
    pub max_message_size: usize,
    /// Network-wide proof-of-work difficulty: trials per payload byte.
    pub nonce_trials_per_byte: u64,
    /// Network-wide proof-of-work difficulty: padding added to the payload
    /// length before computing the target.
    pub extra_bytes: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8444".parse().expect("loopback"),
            streams: vec![1],
            user_agent: "/gossip:0.1/".to_string(),
            max_connections: 32,
            outbound_queue: 64,
            max_message_size: protocol::MAX_PAYLOAD_LENGTH,
            nonce_trials_per_byte: 1_000,
            extra_bytes: 1_000,
        }
    }
}

impl NetworkConfig {
    /// The stream this node primarily serves.
    pub fn primary_stream(&self) -> u64 {
        self.streams.first().copied().unwrap_or(1)
    }
}
