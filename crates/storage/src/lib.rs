//! Persistence capabilities behind narrow traits.
//!
//! The network core only ever sees these interfaces; a SQL-backed adapter
//! can be slotted in without touching it. The in-memory implementations in
//! [`memory`] are complete and thread-safe, serving tests and embedded
//! nodes.

mod memory;

pub use memory::{MemoryInventory, MemoryMessageRepository, MemoryNodeRegistry};

use protocol::{InventoryVector, NetworkAddress, ObjectMessage, Plaintext, Status};

/// Content-addressed set of currently valid objects.
///
/// For any vector returned by `get_inventory`, `get_object` yields a message
/// whose `expires_time` was in the future at the moment of the query.
pub trait Inventory: Send + Sync {
    /// All unexpired vectors in the given streams (empty = every stream).
    fn get_inventory(&self, streams: &[u64]) -> Vec<InventoryVector>;

    /// The subset of `offer` not locally known.
    fn missing(&self, offer: &[InventoryVector], streams: &[u64]) -> Vec<InventoryVector>;

    fn get_object(&self, iv: &InventoryVector) -> Option<ObjectMessage>;

    /// Filtered scan; `None` is a wildcard.
    fn get_objects(
        &self,
        stream: Option<u64>,
        version: Option<u64>,
        object_type: Option<u32>,
    ) -> Vec<ObjectMessage>;

    /// Idempotent insert keyed by inventory vector.
    fn store_object(&self, object: ObjectMessage);

    fn contains(&self, iv: &InventoryVector) -> bool;

    /// Evict objects expired for longer than the re-request grace period.
    fn cleanup(&self);
}

/// The set of known peer addresses.
pub trait NodeRegistry: Send + Sync {
    /// Up to `limit` known peers serving any of the given streams.
    fn get_known_addresses(&self, limit: usize, streams: &[u64]) -> Vec<NetworkAddress>;

    /// Merge newly learned peers; fresher timestamps win.
    fn offer_addresses(&self, addresses: &[NetworkAddress]);
}

/// Durable store for locally submitted and received plaintexts.
pub trait MessageRepository: Send + Sync {
    /// Insert or update; assigns an id on first save.
    fn save(&self, message: &mut Plaintext);

    fn find_by_status(&self, status: Status) -> Vec<Plaintext>;

    /// Look up the message a 32-byte acknowledgment blob belongs to.
    fn find_by_ack_data(&self, ack_data: &[u8; 32]) -> Option<Plaintext>;
}
