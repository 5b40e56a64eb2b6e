//! Thread-safe in-memory stores.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use protocol::{unix_time, InventoryVector, NetworkAddress, ObjectMessage, Plaintext, Status};
use tracing::warn;

use crate::{Inventory, MessageRepository, NodeRegistry};

/// Objects expired for longer than this are eligible for eviction. The grace
/// period keeps us from re-requesting objects we just dropped.
const EVICTION_GRACE_SECONDS: i64 = 300;

struct StoredObject {
    object: ObjectMessage,
    stream: u64,
    expires_time: i64,
    object_type: u32,
    version: u64,
}

/// In-memory [`Inventory`] keyed by inventory vector.
#[derive(Default)]
pub struct MemoryInventory {
    objects: RwLock<HashMap<InventoryVector, StoredObject>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

fn stream_matches(streams: &[u64], stream: u64) -> bool {
    streams.is_empty() || streams.contains(&stream)
}

impl Inventory for MemoryInventory {
    fn get_inventory(&self, streams: &[u64]) -> Vec<InventoryVector> {
        let now = unix_time::now();
        self.objects
            .read()
            .iter()
            .filter(|(_, stored)| stored.expires_time > now && stream_matches(streams, stored.stream))
            .map(|(iv, _)| *iv)
            .collect()
    }

    fn missing(&self, offer: &[InventoryVector], _streams: &[u64]) -> Vec<InventoryVector> {
        let objects = self.objects.read();
        offer
            .iter()
            .filter(|iv| !objects.contains_key(iv))
            .copied()
            .collect()
    }

    fn get_object(&self, iv: &InventoryVector) -> Option<ObjectMessage> {
        self.objects.read().get(iv).map(|stored| stored.object.clone())
    }

    fn get_objects(
        &self,
        stream: Option<u64>,
        version: Option<u64>,
        object_type: Option<u32>,
    ) -> Vec<ObjectMessage> {
        self.objects
            .read()
            .values()
            .filter(|stored| stream.map_or(true, |wanted| stored.stream == wanted))
            .filter(|stored| version.map_or(true, |wanted| stored.version == wanted))
            .filter(|stored| object_type.map_or(true, |wanted| stored.object_type == wanted))
            .map(|stored| stored.object.clone())
            .collect()
    }

    fn store_object(&self, object: ObjectMessage) {
        let iv = match object.inventory_vector() {
            Ok(iv) => iv,
            Err(err) => {
                warn!(error = %err, "refusing to store unaddressable object");
                return;
            }
        };
        let mut objects = self.objects.write();
        objects.entry(iv).or_insert_with(|| StoredObject {
            stream: object.stream(),
            expires_time: object.expires_time(),
            object_type: object.object_type(),
            version: object.version(),
            object,
        });
    }

    fn contains(&self, iv: &InventoryVector) -> bool {
        self.objects.read().contains_key(iv)
    }

    fn cleanup(&self) {
        let cutoff = unix_time::now() - EVICTION_GRACE_SECONDS;
        self.objects
            .write()
            .retain(|_, stored| stored.expires_time >= cutoff);
    }
}

/// In-memory [`NodeRegistry`] deduplicating by host and port.
#[derive(Default)]
pub struct MemoryNodeRegistry {
    nodes: Mutex<HashMap<([u8; 16], u16), NetworkAddress>>,
}

impl MemoryNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with fixed peers, e.g. bootstrap nodes.
    pub fn with_nodes(addresses: impl IntoIterator<Item = NetworkAddress>) -> Self {
        let registry = Self::new();
        let seeded: Vec<_> = addresses.into_iter().collect();
        registry.offer_addresses(&seeded);
        registry
    }
}

impl NodeRegistry for MemoryNodeRegistry {
    fn get_known_addresses(&self, limit: usize, streams: &[u64]) -> Vec<NetworkAddress> {
        let mut known: Vec<_> = self
            .nodes
            .lock()
            .values()
            .filter(|address| stream_matches(streams, address.stream))
            .cloned()
            .collect();
        known.sort_by_key(|address| std::cmp::Reverse(address.time));
        known.truncate(limit);
        known
    }

    fn offer_addresses(&self, addresses: &[NetworkAddress]) {
        let mut nodes = self.nodes.lock();
        for address in addresses {
            nodes
                .entry(address.host_key())
                .and_modify(|known| {
                    if address.time > known.time {
                        *known = address.clone();
                    }
                })
                .or_insert_with(|| address.clone());
        }
    }
}

/// In-memory [`MessageRepository`] with sequential ids.
#[derive(Default)]
pub struct MemoryMessageRepository {
    inner: Mutex<RepositoryInner>,
}

#[derive(Default)]
struct RepositoryInner {
    messages: HashMap<u64, Plaintext>,
    next_id: u64,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageRepository for MemoryMessageRepository {
    fn save(&self, message: &mut Plaintext) {
        let mut inner = self.inner.lock();
        let id = match message.id() {
            Some(id) => id,
            None => {
                inner.next_id += 1;
                let id = inner.next_id;
                if let Err(err) = message.set_id(id) {
                    warn!(error = %err, "failed to assign message id");
                    return;
                }
                id
            }
        };
        inner.messages.insert(id, message.clone());
    }

    fn find_by_status(&self, status: Status) -> Vec<Plaintext> {
        self.inner
            .lock()
            .messages
            .values()
            .filter(|message| message.status == status)
            .cloned()
            .collect()
    }

    fn find_by_ack_data(&self, ack_data: &[u8; 32]) -> Option<Plaintext> {
        self.inner
            .lock()
            .messages
            .values()
            .find(|message| message.ack_data.as_ref() == Some(ack_data))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::payload::{GenericPayload, ObjectPayload};
    use protocol::{Address, PlaintextDraft, Sender};

    fn object(stream: u64, expires_in: i64, data: &[u8]) -> ObjectMessage {
        let mut object = ObjectMessage::draft()
            .expires_time(unix_time::now_plus(expires_in))
            .payload(ObjectPayload::Generic(GenericPayload {
                object_type: 42,
                version: 1,
                stream,
                data: data.to_vec(),
            }))
            .build()
            .expect("build");
        object.set_nonce([1; 8]);
        object
    }

    fn sender() -> Sender {
        Sender {
            version: 4,
            stream: 1,
            behavior_bitfield: 0,
            signing_key: [1; 64],
            encryption_key: [2; 64],
            nonce_trials_per_byte: 1_000,
            extra_bytes: 1_000,
        }
    }

    #[test]
    fn storing_twice_is_idempotent() {
        let inventory = MemoryInventory::new();
        let object = object(1, 300, b"dup");
        inventory.store_object(object.clone());
        inventory.store_object(object.clone());
        assert_eq!(inventory.len(), 1);
        let iv = object.inventory_vector().expect("iv");
        assert!(inventory.contains(&iv));
        assert_eq!(inventory.get_object(&iv), Some(object));
    }

    #[test]
    fn inventory_filters_by_stream_and_expiry() {
        let inventory = MemoryInventory::new();
        inventory.store_object(object(1, 300, b"one"));
        inventory.store_object(object(2, 300, b"two"));
        inventory.store_object(object(1, -10, b"stale"));

        assert_eq!(inventory.get_inventory(&[1]).len(), 1);
        assert_eq!(inventory.get_inventory(&[1, 2]).len(), 2);
        // Wildcard still excludes the expired object.
        assert_eq!(inventory.get_inventory(&[]).len(), 2);
    }

    #[test]
    fn cleanup_honors_the_grace_period() {
        let inventory = MemoryInventory::new();
        let expired_long_ago = object(1, -400, b"gone");
        let just_expired = object(1, -10, b"grace");
        inventory.store_object(expired_long_ago.clone());
        inventory.store_object(just_expired.clone());
        inventory.cleanup();

        assert!(!inventory.contains(&expired_long_ago.inventory_vector().expect("iv")));
        // Recently expired objects survive so we don't re-request them.
        assert!(inventory.contains(&just_expired.inventory_vector().expect("iv")));
        assert!(inventory.get_inventory(&[]).is_empty());
    }

    #[test]
    fn missing_reports_unknown_vectors() {
        let inventory = MemoryInventory::new();
        let known = object(1, 300, b"known");
        inventory.store_object(known.clone());
        let known_iv = known.inventory_vector().expect("iv");
        let unknown_iv = InventoryVector::new([0xcc; 32]);

        assert_eq!(
            inventory.missing(&[known_iv, unknown_iv], &[1]),
            vec![unknown_iv]
        );
    }

    #[test]
    fn get_objects_applies_wildcards() {
        let inventory = MemoryInventory::new();
        inventory.store_object(object(1, 300, b"a"));
        inventory.store_object(object(2, 300, b"b"));

        assert_eq!(inventory.get_objects(None, None, None).len(), 2);
        assert_eq!(inventory.get_objects(Some(2), None, None).len(), 1);
        assert_eq!(inventory.get_objects(None, Some(1), Some(42)).len(), 2);
        assert!(inventory.get_objects(None, None, Some(7)).is_empty());
    }

    #[test]
    fn registry_keeps_freshest_sighting() {
        let registry = MemoryNodeRegistry::new();
        let mut first = NetworkAddress::new("10.0.0.1:8444".parse().expect("addr"), 1);
        first.time = 100;
        let mut fresher = first.clone();
        fresher.time = 200;

        registry.offer_addresses(&[first.clone()]);
        registry.offer_addresses(&[fresher.clone()]);
        let known = registry.get_known_addresses(10, &[1]);
        assert_eq!(known, vec![fresher.clone()]);

        // Stale re-announcements do not roll the clock back.
        registry.offer_addresses(&[first]);
        assert_eq!(registry.get_known_addresses(10, &[1]), vec![fresher]);
    }

    #[test]
    fn registry_limits_and_filters_by_stream() {
        let registry = MemoryNodeRegistry::new();
        let mut offered = Vec::new();
        for index in 0..5u8 {
            let mut address = NetworkAddress::new(
                format!("10.0.0.{}:8444", index + 1).parse().expect("addr"),
                u64::from(index % 2) + 1,
            );
            address.time = i64::from(index);
            offered.push(address);
        }
        registry.offer_addresses(&offered);

        assert_eq!(registry.get_known_addresses(2, &[1, 2]).len(), 2);
        let stream_two = registry.get_known_addresses(10, &[2]);
        assert!(stream_two.iter().all(|address| address.stream == 2));
        assert_eq!(stream_two.len(), 2);
    }

    #[test]
    fn repository_assigns_ids_and_finds_by_status() {
        let repository = MemoryMessageRepository::new();
        let mut message = PlaintextDraft::new(sender())
            .to(Address::new(4, 1, [3; 20]))
            .message(b"hello".to_vec())
            .build()
            .expect("build");
        repository.save(&mut message);
        assert_eq!(message.id(), Some(1));

        message.status = Status::DoingProofOfWork;
        repository.save(&mut message);
        assert_eq!(message.id(), Some(1));
        assert!(repository.find_by_status(Status::PubkeyRequested).is_empty());
        assert_eq!(
            repository.find_by_status(Status::DoingProofOfWork).len(),
            1
        );
    }

    #[test]
    fn repository_finds_by_ack_data() {
        let repository = MemoryMessageRepository::new();
        let mut message = PlaintextDraft::new(sender())
            .to(Address::new(4, 1, [3; 20]))
            .message(b"hello".to_vec())
            .build()
            .expect("build");
        message.ack_data = Some([0xaa; 32]);
        repository.save(&mut message);

        assert!(repository.find_by_ack_data(&[0xaa; 32]).is_some());
        assert!(repository.find_by_ack_data(&[0xbb; 32]).is_none());
    }
}
