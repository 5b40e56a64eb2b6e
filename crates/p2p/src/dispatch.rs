use std::sync::Arc;

use protocol::payload::{Broadcast, Getpubkey, GetpubkeyTarget, Msg, ObjectPayload};
use protocol::{unix_time, NetworkMessage, ObjectMessage, Plaintext, ProtocolError, Status};
use storage::MessageRepository;
use tracing::{debug, warn};

use crate::context::Context;
use crate::handler::NetworkHandler;

/// Receives every inbound object before admission, and admitted decrypted
/// content thereafter; the application side of the network core.
pub trait MessageListener: Send + Sync {
    fn receive(&self, object: &ObjectMessage);
}

/// Application hook for `custom` frames. Returning `None` drops the
/// connection, mirroring an unsupported request.
pub trait CustomCommandHandler: Send + Sync {
    fn handle(&self, payload: &[u8]) -> Option<NetworkMessage>;
}

/// Feeds locally submitted plaintexts into the gossip: sign, encrypt,
/// stamp, store, offer.
///
/// Submission is fire-and-forget: once a message is persisted, progress and
/// failure are reported through its [`Status`] and the logs, never raised to
/// the caller.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<Context>,
    repository: Arc<dyn MessageRepository>,
    handler: NetworkHandler,
}

impl Dispatcher {
    pub fn new(
        ctx: Arc<Context>,
        repository: Arc<dyn MessageRepository>,
        handler: NetworkHandler,
    ) -> Self {
        Self {
            ctx,
            repository,
            handler,
        }
    }

    /// Submit a person-to-person message. The proof of work runs on a
    /// blocking worker; the returned handle is ready once the object has
    /// been offered to the network.
    pub fn submit_msg(
        &self,
        mut plaintext: Plaintext,
        recipient_encryption_key: [u8; 64],
        private_signing_key: Vec<u8>,
        ttl_seconds: i64,
    ) -> tokio::task::JoinHandle<()> {
        plaintext.status = Status::DoingProofOfWork;
        plaintext.sent = Some(unix_time::now());
        plaintext.ttl = ttl_seconds;
        self.repository.save(&mut plaintext);

        let dispatcher = self.clone();
        tokio::task::spawn_blocking(move || {
            let stream = plaintext.stream();
            let payload = ObjectPayload::Msg(Msg::plain(stream, plaintext.clone()));
            match dispatcher.seal_and_send(
                payload,
                &recipient_encryption_key,
                &private_signing_key,
                ttl_seconds,
            ) {
                Ok(iv) => {
                    debug!(%iv, "message sent");
                    plaintext.status = Status::Sent;
                    dispatcher.repository.save(&mut plaintext);
                }
                Err(err) => {
                    warn!(error = %err, "failed to send message");
                }
            }
        })
    }

    /// Submit a broadcast, encrypted to the sender's own key material so
    /// subscribers can open it.
    pub fn submit_broadcast(
        &self,
        mut plaintext: Plaintext,
        own_encryption_key: [u8; 64],
        private_signing_key: Vec<u8>,
        ttl_seconds: i64,
    ) -> tokio::task::JoinHandle<()> {
        plaintext.status = Status::DoingProofOfWork;
        plaintext.sent = Some(unix_time::now());
        plaintext.ttl = ttl_seconds;
        self.repository.save(&mut plaintext);

        let dispatcher = self.clone();
        tokio::task::spawn_blocking(move || {
            let stream = plaintext.stream();
            // Version 4: the untagged form. Tagged v5 broadcasts need the
            // address-derived tag, which lives outside this core.
            let payload =
                ObjectPayload::Broadcast(Broadcast::plain(4, stream, None, plaintext.clone()));
            match dispatcher.seal_and_send(
                payload,
                &own_encryption_key,
                &private_signing_key,
                ttl_seconds,
            ) {
                Ok(iv) => {
                    debug!(%iv, "broadcast sent");
                    plaintext.status = Status::Sent;
                    dispatcher.repository.save(&mut plaintext);
                }
                Err(err) => {
                    warn!(error = %err, "failed to send broadcast");
                }
            }
        })
    }

    /// Ask the network for a recipient's pubkey before the message itself
    /// can be encrypted and sent.
    pub fn request_pubkey(
        &self,
        mut plaintext: Plaintext,
        target: GetpubkeyTarget,
        ttl_seconds: i64,
    ) -> tokio::task::JoinHandle<()> {
        plaintext.status = Status::PubkeyRequested;
        self.repository.save(&mut plaintext);

        let stream = plaintext.destination().stream.max(1);
        let version = match target {
            GetpubkeyTarget::Ripe(_) => 3,
            GetpubkeyTarget::Tag(_) => 4,
        };
        let dispatcher = self.clone();
        tokio::task::spawn_blocking(move || {
            let payload = ObjectPayload::Getpubkey(Getpubkey {
                version,
                stream,
                target,
            });
            match dispatcher.stamp_and_offer(payload, ttl_seconds) {
                Ok(iv) => debug!(%iv, "pubkey requested"),
                Err(err) => warn!(error = %err, "failed to request pubkey"),
            }
        })
    }

    /// Mark the message a 32-byte acknowledgment blob belongs to.
    pub fn acknowledged(&self, ack_data: &[u8; 32]) {
        if let Some(mut message) = self.repository.find_by_ack_data(ack_data) {
            message.status = Status::Acknowledged;
            message.received = Some(unix_time::now());
            self.repository.save(&mut message);
        } else {
            debug!("acknowledgment for unknown message");
        }
    }

    fn seal_and_send(
        &self,
        payload: ObjectPayload,
        encryption_key: &[u8; 64],
        private_signing_key: &[u8],
        ttl_seconds: i64,
    ) -> Result<protocol::InventoryVector, ProtocolError> {
        let crypto = self.ctx.crypto();
        let mut object = ObjectMessage::draft()
            .expires_time(unix_time::now_plus(ttl_seconds))
            .payload(payload)
            .build()?;
        object.sign(crypto, private_signing_key)?;
        object.encrypt(crypto, encryption_key)?;
        self.stamp_store_offer(object)
    }

    fn stamp_and_offer(
        &self,
        payload: ObjectPayload,
        ttl_seconds: i64,
    ) -> Result<protocol::InventoryVector, ProtocolError> {
        let object = ObjectMessage::draft()
            .expires_time(unix_time::now_plus(ttl_seconds))
            .payload(payload)
            .build()?;
        self.stamp_store_offer(object)
    }

    fn stamp_store_offer(
        &self,
        mut object: ObjectMessage,
    ) -> Result<protocol::InventoryVector, ProtocolError> {
        let crypto = self.ctx.crypto();
        let config = self.ctx.config();
        let nonce = {
            let bytes = object.payload_bytes_without_nonce()?;
            crypto.do_proof_of_work(
                bytes,
                object.expires_time(),
                config.nonce_trials_per_byte,
                config.extra_bytes,
            )
        };
        object.set_nonce(nonce);
        let iv = object.inventory_vector()?;
        self.ctx.inventory().store_object(object);
        self.handler.offer(iv);
        Ok(iv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crypto::stub::{StubCryptography, StubKeyPair};
    use protocol::{Address, Sender};
    use storage::{Inventory, MemoryInventory, MemoryMessageRepository, MemoryNodeRegistry};

    struct NullListener;

    impl MessageListener for NullListener {
        fn receive(&self, _object: &ObjectMessage) {}
    }

    fn fixture() -> (Dispatcher, Arc<MemoryInventory>, Arc<MemoryMessageRepository>) {
        let inventory = Arc::new(MemoryInventory::new());
        let repository = Arc::new(MemoryMessageRepository::new());
        let config = NetworkConfig {
            nonce_trials_per_byte: 1,
            extra_bytes: 20,
            ..NetworkConfig::default()
        };
        let ctx = Arc::new(Context::new(
            config,
            inventory.clone(),
            Arc::new(MemoryNodeRegistry::new()),
            Arc::new(StubCryptography),
            Arc::new(NullListener),
        ));
        let handler = NetworkHandler::new(ctx.clone());
        (
            Dispatcher::new(ctx, repository.clone(), handler),
            inventory,
            repository,
        )
    }

    fn plaintext(keys: &StubKeyPair) -> Plaintext {
        let sender = Sender {
            version: 4,
            stream: 1,
            behavior_bitfield: 0,
            signing_key: keys.public_signing,
            encryption_key: keys.public_encryption,
            nonce_trials_per_byte: 1_000,
            extra_bytes: 1_000,
        };
        Plaintext::draft(sender)
            .to(Address::new(4, 1, [6; 20]))
            .simple("status", "on its way")
            .build()
            .expect("build")
    }

    #[tokio::test]
    async fn submitted_message_reaches_inventory_and_sent_status() {
        let (dispatcher, inventory, repository) = fixture();
        let keys = StubKeyPair::from_seed(31);
        let recipient = StubKeyPair::from_seed(32);

        dispatcher
            .submit_msg(
                plaintext(&keys),
                recipient.public_encryption,
                keys.private_signing.to_vec(),
                300,
            )
            .await
            .expect("worker");

        assert_eq!(inventory.len(), 1);
        assert!(repository.find_by_status(Status::DoingProofOfWork).is_empty());
        let sent = repository.find_by_status(Status::Sent);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].sent.is_some());

        // The stored object decrypts and verifies for the recipient.
        let iv = inventory.get_inventory(&[1])[0];
        let mut object = inventory.get_object(&iv).expect("object");
        object
            .decrypt(&StubCryptography, &recipient.private_encryption)
            .expect("decrypt");
        assert!(object
            .is_signature_valid(&StubCryptography, &keys.public_signing)
            .expect("verify"));
    }

    #[tokio::test]
    async fn submitted_broadcast_opens_with_own_key() {
        let (dispatcher, inventory, _repository) = fixture();
        let keys = StubKeyPair::from_seed(33);

        dispatcher
            .submit_broadcast(
                plaintext(&keys),
                keys.public_encryption,
                keys.private_signing.to_vec(),
                300,
            )
            .await
            .expect("worker");

        let iv = inventory.get_inventory(&[1])[0];
        let mut object = inventory.get_object(&iv).expect("object");
        object
            .decrypt(&StubCryptography, &keys.private_encryption)
            .expect("decrypt");
        assert!(object.is_decrypted());
    }

    #[tokio::test]
    async fn pubkey_request_emits_getpubkey_object() {
        let (dispatcher, inventory, repository) = fixture();
        let keys = StubKeyPair::from_seed(35);

        dispatcher
            .request_pubkey(plaintext(&keys), GetpubkeyTarget::Ripe([6; 20]), 300)
            .await
            .expect("worker");

        let requested = repository.find_by_status(Status::PubkeyRequested);
        assert_eq!(requested.len(), 1);
        let objects = inventory.get_objects(None, None, Some(0));
        assert_eq!(objects.len(), 1);
        match objects[0].payload() {
            ObjectPayload::Getpubkey(getpubkey) => {
                assert_eq!(getpubkey.target, GetpubkeyTarget::Ripe([6; 20]));
            }
            other => panic!("expected getpubkey, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn acknowledgment_updates_status() {
        let (dispatcher, _inventory, repository) = fixture();
        let keys = StubKeyPair::from_seed(34);
        let mut message = plaintext(&keys);
        message.ack_data = Some([0x5a; 32]);
        message.status = Status::Sent;
        repository.save(&mut message);

        dispatcher.acknowledged(&[0x5a; 32]);
        let acknowledged = repository.find_by_status(Status::Acknowledged);
        assert_eq!(acknowledged.len(), 1);
        assert!(acknowledged[0].received.is_some());

        // Unknown blobs are ignored.
        dispatcher.acknowledged(&[0x00; 32]);
        assert_eq!(repository.find_by_status(Status::Acknowledged).len(), 1);
    }
}
