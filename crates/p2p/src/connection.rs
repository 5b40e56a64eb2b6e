use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use protocol::{
    unix_time, InventoryVector, NetworkAddress, NetworkMessage, ObjectMessage, Version,
    MAX_INV_LENGTH,
};
use tracing::{debug, info, warn};

use crate::context::{Context, CURRENT_VERSION};
use crate::error::NodeError;
use crate::handler::NetworkRelay;

/// Cross-connection map of outstanding `getdata` requests, keyed by
/// inventory vector with the request timestamp as value.
pub type RequestMap = Arc<Mutex<HashMap<InventoryVector, i64>>>;

/// Recently advertised vectors are remembered for this long.
const IV_CACHE_TTL_SECONDS: i64 = 5 * unix_time::MINUTE;
/// Addresses offered to a freshly activated peer.
const ADDRESSES_PER_CONNECTION: usize = 1000;
/// Read silence after which an idle sync connection is considered done.
const READ_IDLE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Accepted inbound; sends its version only after seeing the peer's.
    Server,
    /// Dialed outbound; sends its version immediately.
    Client,
    /// Outbound one-shot exchange that ends once the link goes idle.
    Sync,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Disconnected,
}

/// Per-peer handshake and exchange state machine.
///
/// The connection is exclusively owned by the network handler; frames are
/// fed in through [`Connection::handle_message`] and outbound frames are
/// collected from the FIFO sending queue via [`Connection::take_outbound`].
/// A [`NodeError`] from `handle_message` means the peer broke protocol and
/// the caller should disconnect.
pub struct Connection {
    ctx: Arc<Context>,
    relay: Arc<dyn NetworkRelay>,
    mode: Mode,
    node: NetworkAddress,
    state: ConnectionState,
    peer_nonce: u64,
    peer_version: u32,
    streams: Vec<u64>,
    verack_sent: bool,
    verack_received: bool,
    iv_cache: HashMap<InventoryVector, i64>,
    sending_queue: VecDeque<NetworkMessage>,
    requested_objects: HashSet<InventoryVector>,
    common_requested: RequestMap,
    last_object_time: i64,
    sync_deadline: Option<i64>,
    sync_read_deadline: Option<Instant>,
}

impl Connection {
    pub fn new(
        ctx: Arc<Context>,
        relay: Arc<dyn NetworkRelay>,
        mode: Mode,
        node: NetworkAddress,
        common_requested: RequestMap,
        sync_timeout_seconds: Option<i64>,
    ) -> Self {
        let mut connection = Self {
            sync_deadline: sync_timeout_seconds.map(unix_time::now_plus),
            ctx,
            relay,
            mode,
            node,
            state: ConnectionState::Connecting,
            peer_nonce: 0,
            peer_version: 0,
            streams: Vec::new(),
            verack_sent: false,
            verack_received: false,
            iv_cache: HashMap::new(),
            sending_queue: VecDeque::new(),
            requested_objects: HashSet::new(),
            common_requested,
            last_object_time: 0,
            sync_read_deadline: None,
        };
        if connection.mode != Mode::Server {
            let version = connection.ctx.local_version(&connection.node);
            connection.send(NetworkMessage::Version(version));
        }
        connection
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn node(&self) -> &NetworkAddress {
        &self.node
    }

    pub fn streams(&self) -> &[u64] {
        &self.streams
    }

    /// Nonce the peer presented in its version message.
    pub fn peer_nonce(&self) -> u64 {
        self.peer_nonce
    }

    pub fn peer_version(&self) -> u32 {
        self.peer_version
    }

    pub fn last_object_time(&self) -> i64 {
        self.last_object_time
    }

    /// Whether the peer recently advertised or was offered this vector.
    pub fn knows_of(&self, iv: &InventoryVector) -> bool {
        self.iv_cache.contains_key(iv)
    }

    /// Whether this connection is awaiting the object from its peer.
    pub fn has_requested(&self, iv: &InventoryVector) -> bool {
        self.requested_objects.contains(iv)
    }

    pub fn serves_stream(&self, stream: u64) -> bool {
        self.streams.contains(&stream)
    }

    /// Drain the FIFO sending queue for the transport.
    pub fn take_outbound(&mut self) -> Vec<NetworkMessage> {
        self.sending_queue.drain(..).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.sending_queue.len()
    }

    /// Feed one inbound frame through the state machine.
    pub fn handle_message(&mut self, message: NetworkMessage) -> Result<(), NodeError> {
        match self.state {
            ConnectionState::Active => self.receive_data(message),
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connecting => self.handle_command(message),
        }
    }

    fn handle_command(&mut self, message: NetworkMessage) -> Result<(), NodeError> {
        match message {
            NetworkMessage::Version(version) => {
                self.handle_version(&version);
                Ok(())
            }
            NetworkMessage::VerAck => {
                self.verack_received = true;
                if self.verack_sent {
                    self.activate();
                }
                Ok(())
            }
            NetworkMessage::Custom(data) => {
                self.handle_custom(&data);
                Ok(())
            }
            other => Err(NodeError::UnexpectedCommand {
                command: other.command(),
                state: self.state,
            }),
        }
    }

    fn handle_version(&mut self, version: &Version) {
        if version.nonce == self.ctx.client_nonce() {
            info!("connected to self, disconnecting");
            self.disconnect();
        } else if version.version >= CURRENT_VERSION {
            self.peer_nonce = version.nonce;
            self.peer_version = version.version;
            self.streams = version.streams.clone();
            self.verack_sent = true;
            self.send(NetworkMessage::VerAck);
            if self.mode == Mode::Server {
                let local = self.ctx.local_version(&self.node);
                self.send(NetworkMessage::Version(local));
            }
            if self.verack_received {
                self.activate();
            }
        } else {
            info!(
                version = version.version,
                "unsupported peer version, disconnecting"
            );
            self.disconnect();
        }
    }

    fn activate(&mut self) {
        info!(peer = %self.node.socket_addr(), mode = ?self.mode, "connection established");
        self.state = ConnectionState::Active;
        self.node.time = unix_time::now();
        if self.mode != Mode::Sync {
            self.send_addresses();
            self.send_inventory();
            self.ctx
                .node_registry()
                .offer_addresses(std::slice::from_ref(&self.node));
        }
    }

    fn send_addresses(&mut self) {
        let addresses = self
            .ctx
            .node_registry()
            .get_known_addresses(ADDRESSES_PER_CONNECTION, &self.streams);
        self.send(NetworkMessage::Addr(addresses));
    }

    fn send_inventory(&mut self) {
        let inventory = self.ctx.inventory().get_inventory(&self.streams);
        for chunk in inventory.chunks(MAX_INV_LENGTH) {
            self.send(NetworkMessage::Inv(chunk.to_vec()));
        }
    }

    fn receive_data(&mut self, message: NetworkMessage) -> Result<(), NodeError> {
        match message {
            NetworkMessage::Inv(inventory) => {
                self.receive_inv(inventory);
                Ok(())
            }
            NetworkMessage::GetData(inventory) => {
                self.receive_getdata(&inventory);
                Ok(())
            }
            NetworkMessage::Object(object) => {
                self.receive_object(object);
                Ok(())
            }
            NetworkMessage::Addr(addresses) => {
                debug!(count = addresses.len(), "received addresses");
                self.ctx.node_registry().offer_addresses(&addresses);
                Ok(())
            }
            other => Err(NodeError::UnexpectedCommand {
                command: other.command(),
                state: self.state,
            }),
        }
    }

    fn receive_inv(&mut self, inventory: Vec<InventoryVector>) {
        let offered = inventory.len();
        self.update_iv_cache(&inventory);
        let mut missing = self.ctx.inventory().missing(&inventory, &self.streams);
        {
            let common = self.common_requested.lock();
            missing.retain(|iv| !common.contains_key(iv));
        }
        debug!(offered, missing = missing.len(), "received inventory offer");
        if !missing.is_empty() {
            self.request_objects(missing);
        }
    }

    fn request_objects(&mut self, missing: Vec<InventoryVector>) {
        let now = unix_time::now();
        {
            let mut common = self.common_requested.lock();
            for iv in &missing {
                common.insert(*iv, now);
            }
        }
        self.requested_objects.extend(missing.iter().copied());
        self.send(NetworkMessage::GetData(missing));
    }

    fn receive_getdata(&mut self, inventory: &[InventoryVector]) {
        for iv in inventory {
            if let Some(object) = self.ctx.inventory().get_object(iv) {
                self.send(NetworkMessage::Object(object));
            }
        }
    }

    fn receive_object(&mut self, object: ObjectMessage) {
        let iv = match object.inventory_vector() {
            Ok(iv) => iv,
            Err(err) => {
                warn!(error = %err, "dropping unaddressable object");
                return;
            }
        };
        self.requested_objects.remove(&iv);
        if self.ctx.inventory().contains(&iv) {
            debug!(%iv, "object already in inventory");
        } else {
            self.admit_object(iv, object);
        }
        if self.common_requested.lock().remove(&iv).is_none() {
            debug!(%iv, "received object that was not requested");
        }
    }

    /// Proof of work is the admission gate: unverified objects never reach
    /// the inventory or the flood-fill path.
    fn admit_object(&mut self, iv: InventoryVector, object: ObjectMessage) {
        self.ctx.listener().receive(&object);
        let (nonce, payload) = match (object.nonce(), object.payload_bytes_without_nonce()) {
            (Some(nonce), Ok(payload)) => (nonce, payload),
            _ => {
                warn!(%iv, "dropping object without wire form");
                return;
            }
        };
        let config = self.ctx.config();
        let checked = self.ctx.crypto().check_proof_of_work(
            nonce,
            payload,
            object.expires_time(),
            config.nonce_trials_per_byte,
            config.extra_bytes,
        );
        match checked {
            Ok(()) => {
                self.ctx.inventory().store_object(object);
                self.relay.offer(iv);
                self.last_object_time = unix_time::now();
            }
            Err(err) => {
                warn!(%iv, error = %err, "dropping object");
            }
        }
    }

    fn handle_custom(&mut self, data: &[u8]) {
        let response = self
            .ctx
            .custom_handler()
            .and_then(|handler| handler.handle(data));
        match response {
            Some(message) => self.send(message),
            None => self.disconnect(),
        }
    }

    fn update_iv_cache(&mut self, inventory: &[InventoryVector]) {
        self.cleanup_iv_cache();
        let now = unix_time::now();
        for iv in inventory {
            self.iv_cache.insert(*iv, now);
        }
    }

    fn cleanup_iv_cache(&mut self) {
        let cutoff = unix_time::now() - IV_CACHE_TTL_SECONDS;
        self.iv_cache.retain(|_, last_seen| *last_seen >= cutoff);
    }

    /// Offer a single object to this peer (flood-fill fan-out).
    pub fn offer(&mut self, iv: InventoryVector) {
        self.send(NetworkMessage::Inv(vec![iv]));
        self.update_iv_cache(&[iv]);
    }

    fn send(&mut self, message: NetworkMessage) {
        self.sending_queue.push_back(message);
    }

    /// Terminal transition. Outstanding requests are handed back to the
    /// network handler so other connections can pick them up.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnected;
        let outstanding: Vec<_> = self.requested_objects.drain().collect();
        self.relay.request(outstanding);
    }

    /// Whether a sync-mode exchange is complete. `message` is the frame just
    /// received, or `None` when the read window elapsed without one.
    pub fn sync_finished(&mut self, message: Option<&NetworkMessage>) -> bool {
        if self.mode != Mode::Sync {
            return false;
        }
        if self.state != ConnectionState::Active {
            return false;
        }
        if let Some(deadline) = self.sync_deadline {
            if unix_time::now() > deadline {
                info!("synchronization timed out");
                return true;
            }
        }
        if !self.sending_queue.is_empty() || message.is_some() {
            self.sync_read_deadline = Some(Instant::now() + READ_IDLE_WINDOW);
            return false;
        }
        self.sync_read_deadline
            .map_or(false, |deadline| Instant::now() > deadline)
    }
}
