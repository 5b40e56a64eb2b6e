use std::sync::Arc;

use crypto::Cryptography;
use protocol::{unix_time, NetworkAddress, Version};
use storage::{Inventory, NodeRegistry};

use crate::config::NetworkConfig;
use crate::dispatch::{CustomCommandHandler, MessageListener};

/// Minimum protocol version we are willing to talk to.
pub const CURRENT_VERSION: u32 = 3;

/// Capability bundle handed to every subsystem at construction.
pub struct Context {
    config: NetworkConfig,
    inventory: Arc<dyn Inventory>,
    node_registry: Arc<dyn NodeRegistry>,
    crypto: Arc<dyn Cryptography>,
    listener: Arc<dyn MessageListener>,
    custom_handler: Option<Arc<dyn CustomCommandHandler>>,
    client_nonce: u64,
}

impl Context {
    pub fn new(
        config: NetworkConfig,
        inventory: Arc<dyn Inventory>,
        node_registry: Arc<dyn NodeRegistry>,
        crypto: Arc<dyn Cryptography>,
        listener: Arc<dyn MessageListener>,
    ) -> Self {
        let client_nonce = crypto.random_nonce();
        Self {
            config,
            inventory,
            node_registry,
            crypto,
            listener,
            custom_handler: None,
            client_nonce,
        }
    }

    pub fn with_custom_handler(mut self, handler: Arc<dyn CustomCommandHandler>) -> Self {
        self.custom_handler = Some(handler);
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn inventory(&self) -> &dyn Inventory {
        self.inventory.as_ref()
    }

    pub fn node_registry(&self) -> &dyn NodeRegistry {
        self.node_registry.as_ref()
    }

    pub fn crypto(&self) -> &dyn Cryptography {
        self.crypto.as_ref()
    }

    pub fn listener(&self) -> &dyn MessageListener {
        self.listener.as_ref()
    }

    pub fn custom_handler(&self) -> Option<&dyn CustomCommandHandler> {
        self.custom_handler.as_deref()
    }

    /// Nonce identifying this node instance; a peer echoing it back in its
    /// version message is ourselves.
    pub fn client_nonce(&self) -> u64 {
        self.client_nonce
    }

    /// The version announcement sent to `peer`.
    pub fn local_version(&self, peer: &NetworkAddress) -> Version {
        let mut addr_from = NetworkAddress::any_local();
        addr_from.port = self.config.listen.port();
        addr_from.stream = self.config.primary_stream();
        Version {
            version: CURRENT_VERSION,
            services: NetworkAddress::NODE_NETWORK,
            timestamp: unix_time::now(),
            addr_recv: peer.clone(),
            addr_from,
            nonce: self.client_nonce,
            user_agent: self.config.user_agent.clone(),
            streams: self.config.streams.clone(),
        }
    }
}
