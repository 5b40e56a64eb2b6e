use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use protocol::{unix_time, InventoryVector, NetworkMessage};
use rand::seq::SliceRandom;
use rand::RngCore;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionState, Mode, RequestMap};
use crate::context::Context;
use crate::error::NetworkError;
use crate::peer::{run_sync, spawn_peer};

const EVENT_CHANNEL_SIZE: usize = 2048;
/// Admitted objects are offered to this many random peers.
const OFFER_FANOUT: usize = 8;
/// Requests older than this are considered stale and forgotten, so the
/// objects get re-requested on the next matching `inv`.
const STALE_REQUEST_SECONDS: i64 = 10 * unix_time::MINUTE;

/// Unique identifier assigned to each connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

impl PeerId {
    fn random() -> Self {
        Self(rand::rngs::OsRng.next_u64())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Connection lifecycle notifications for observers and tests.
#[derive(Clone, Debug)]
pub enum NetworkEvent {
    Connected {
        peer_id: PeerId,
        address: SocketAddr,
        mode: Mode,
    },
    Disconnected {
        peer_id: PeerId,
        reason: String,
    },
}

/// How connections reach back into the handler: flood-fill fan-out of
/// admitted objects, and reassignment of requests a dying connection still
/// had outstanding.
pub trait NetworkRelay: Send + Sync {
    fn offer(&self, iv: InventoryVector);
    fn request(&self, inventory: Vec<InventoryVector>);
}

struct PeerHandle {
    connection: Arc<Mutex<Connection>>,
    outbound: mpsc::Sender<NetworkMessage>,
}

pub(crate) struct HandlerInner {
    pub(crate) ctx: Arc<Context>,
    connections: RwLock<HashMap<PeerId, PeerHandle>>,
    pub(crate) common_requested: RequestMap,
    events: broadcast::Sender<NetworkEvent>,
}

impl HandlerInner {
    /// Relay handle for a connection. Holds a weak reference; a relay call
    /// after shutdown is a no-op.
    pub(crate) fn relay(self: &Arc<Self>) -> Arc<dyn NetworkRelay> {
        Arc::new(Relay {
            inner: Arc::downgrade(self),
        })
    }

    pub(crate) fn register(
        &self,
        connection: Connection,
        outbound: mpsc::Sender<NetworkMessage>,
        address: SocketAddr,
    ) -> Result<PeerId, NetworkError> {
        let mode = connection.mode();
        let mut connections = self.connections.write();
        if connections.len() >= self.ctx.config().max_connections {
            return Err(NetworkError::Capacity);
        }
        let peer_id = PeerId::random();
        connections.insert(
            peer_id,
            PeerHandle {
                connection: Arc::new(Mutex::new(connection)),
                outbound,
            },
        );
        drop(connections);
        let _ = self.events.send(NetworkEvent::Connected {
            peer_id,
            address,
            mode,
        });
        Ok(peer_id)
    }

    fn lookup(&self, peer_id: PeerId) -> Option<(Arc<Mutex<Connection>>, mpsc::Sender<NetworkMessage>)> {
        self.connections
            .read()
            .get(&peer_id)
            .map(|handle| (handle.connection.clone(), handle.outbound.clone()))
    }

    /// Feed an inbound frame to the connection; returns false once the
    /// connection is gone and the read loop should exit.
    pub(crate) fn deliver(&self, peer_id: PeerId, message: NetworkMessage) -> bool {
        let Some((connection, _)) = self.lookup(peer_id) else {
            return false;
        };
        let mut keep = true;
        {
            let mut conn = connection.lock();
            if let Err(err) = conn.handle_message(message) {
                warn!(%peer_id, error = %err, "peer broke protocol");
                conn.disconnect();
            }
            if conn.state() == ConnectionState::Disconnected {
                keep = false;
            }
        }
        self.flush(peer_id);
        if !keep {
            self.drop_connection(peer_id, "disconnected");
        }
        keep
    }

    /// Move queued frames from the connection to its transport channel.
    pub(crate) fn flush(&self, peer_id: PeerId) {
        let Some((connection, outbound)) = self.lookup(peer_id) else {
            return;
        };
        let queued = connection.lock().take_outbound();
        for message in queued {
            if outbound.try_send(message).is_err() {
                warn!(%peer_id, "outbound queue overflow, disconnecting");
                self.disconnect_peer(peer_id, "outbound queue overflow");
                return;
            }
        }
    }

    pub(crate) fn disconnect_peer(&self, peer_id: PeerId, reason: &str) {
        if let Some((connection, _)) = self.lookup(peer_id) {
            connection.lock().disconnect();
        }
        self.drop_connection(peer_id, reason);
    }

    pub(crate) fn drop_connection(&self, peer_id: PeerId, reason: &str) {
        let removed = self.connections.write().remove(&peer_id);
        if let Some(handle) = removed {
            handle.connection.lock().disconnect();
            let _ = self.events.send(NetworkEvent::Disconnected {
                peer_id,
                reason: reason.to_string(),
            });
        }
    }

    /// Offer an admitted object to a random subset of other peers.
    fn offer(&self, iv: InventoryVector) {
        let stream = match self.ctx.inventory().get_object(&iv) {
            Some(object) => object.stream(),
            None => return,
        };
        // The originating connection is still locked by its own read loop
        // when the relay fans out, and two peers may fan out at once, so
        // every acquisition here must be non-blocking: try_lock skips the
        // origin and any peer busy with its own frame.
        let mut candidates: Vec<(PeerId, Arc<Mutex<Connection>>, mpsc::Sender<NetworkMessage>)> =
            self.connections
                .read()
                .iter()
                .filter(|(_, handle)| {
                    handle.connection.try_lock().is_some_and(|conn| {
                        conn.state() == ConnectionState::Active
                            && conn.serves_stream(stream)
                            && !conn.knows_of(&iv)
                            && !conn.has_requested(&iv)
                    })
                })
                .map(|(peer_id, handle)| {
                    (*peer_id, handle.connection.clone(), handle.outbound.clone())
                })
                .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(OFFER_FANOUT);
        debug!(%iv, peers = candidates.len(), "offering object");
        for (peer_id, connection, outbound) in candidates {
            let queued = match connection.try_lock() {
                Some(mut conn) => {
                    conn.offer(iv);
                    conn.take_outbound()
                }
                None => continue,
            };
            for message in queued {
                if outbound.try_send(message).is_err() {
                    warn!(%peer_id, "outbound queue full, dropping offer");
                    break;
                }
            }
        }
    }

    /// Forget outstanding requests so later `inv` exchanges re-request the
    /// objects from whoever still has them.
    fn request(&self, inventory: Vec<InventoryVector>) {
        if inventory.is_empty() {
            return;
        }
        debug!(count = inventory.len(), "reassigning outstanding requests");
        let mut common = self.common_requested.lock();
        for iv in &inventory {
            common.remove(iv);
        }
    }

    fn prune_stale_requests(&self) {
        let cutoff = unix_time::now() - STALE_REQUEST_SECONDS;
        self.common_requested
            .lock()
            .retain(|_, requested| *requested >= cutoff);
    }
}

struct Relay {
    inner: Weak<HandlerInner>,
}

impl NetworkRelay for Relay {
    fn offer(&self, iv: InventoryVector) {
        if let Some(inner) = self.inner.upgrade() {
            inner.offer(iv);
        }
    }

    fn request(&self, inventory: Vec<InventoryVector>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.request(inventory);
        }
    }
}

/// Owns the set of live connections and the cross-connection request map.
#[derive(Clone)]
pub struct NetworkHandler {
    inner: Arc<HandlerInner>,
}

impl NetworkHandler {
    pub fn new(ctx: Arc<Context>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(HandlerInner {
                ctx,
                connections: RwLock::new(HashMap::new()),
                common_requested: RequestMap::default(),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.events.subscribe()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Bind the configured listen address and start accepting peers.
    /// Returns the bound address (useful with an ephemeral port).
    pub async fn start(&self) -> Result<SocketAddr, NetworkError> {
        let listener = TcpListener::bind(self.inner.ctx.config().listen).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "listening for peers");
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            if let Err(err) = spawn_peer(inner, stream, Mode::Server, addr).await {
                                warn!(remote = %addr, error = %err, "failed to accept peer");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "listener accept failed");
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        Ok(local)
    }

    /// Dial a peer and drive it as a client connection.
    pub async fn connect(&self, addr: SocketAddr) -> Result<PeerId, NetworkError> {
        let stream = TcpStream::connect(addr).await?;
        spawn_peer(self.inner.clone(), stream, Mode::Client, addr).await
    }

    /// One-shot exchange with a trusted peer: runs until the sync deadline
    /// passes or the link has gone idle, then returns.
    pub async fn synchronize(
        &self,
        addr: SocketAddr,
        timeout_seconds: i64,
    ) -> Result<(), NetworkError> {
        let stream = TcpStream::connect(addr).await?;
        run_sync(&self.inner, stream, addr, timeout_seconds).await
    }

    /// Flood-fill an admitted or locally created object.
    pub fn offer(&self, iv: InventoryVector) {
        self.inner.offer(iv);
    }

    /// Number of `getdata` requests currently outstanding network-wide.
    pub fn pending_requests(&self) -> usize {
        self.inner.common_requested.lock().len()
    }

    /// Periodic hygiene: evict expired objects and forget stale requests.
    pub async fn run_maintenance(&self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.inner.ctx.inventory().cleanup();
            self.inner.prune_stale_requests();
        }
    }

}

impl NetworkRelay for NetworkHandler {
    fn offer(&self, iv: InventoryVector) {
        self.inner.offer(iv);
    }

    fn request(&self, inventory: Vec<InventoryVector>) {
        self.inner.request(inventory);
    }
}
