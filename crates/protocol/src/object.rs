use std::sync::OnceLock;

use codec::{encode, Reader};
use crypto::Cryptography;

use crate::error::ProtocolError;
use crate::iv::InventoryVector;
use crate::payload::ObjectPayload;

/// An object shared throughout the network: the proof-of-work nonce, the
/// expiry header and a typed payload.
///
/// The encoded `header_without_nonce ‖ payload` bytes are memoized on first
/// use and byte-stable from then on; `sign` and `encrypt` are rejected once
/// the bytes are frozen. Objects decoded from the wire keep the received
/// bytes verbatim, so their inventory vector always matches the sender's.
#[derive(Debug)]
pub struct ObjectMessage {
    nonce: Option<[u8; 8]>,
    expires_time: i64,
    object_type: u32,
    version: u64,
    stream: u64,
    payload: ObjectPayload,
    wire_cache: OnceLock<Vec<u8>>,
}

impl Clone for ObjectMessage {
    fn clone(&self) -> Self {
        let wire_cache = OnceLock::new();
        if let Some(bytes) = self.wire_cache.get() {
            let _ = wire_cache.set(bytes.clone());
        }
        Self {
            nonce: self.nonce,
            expires_time: self.expires_time,
            object_type: self.object_type,
            version: self.version,
            stream: self.stream,
            payload: self.payload.clone(),
            wire_cache,
        }
    }
}

impl PartialEq for ObjectMessage {
    fn eq(&self, other: &Self) -> bool {
        self.nonce == other.nonce
            && self.expires_time == other.expires_time
            && self.object_type == other.object_type
            && self.version == other.version
            && self.stream == other.stream
            && self.payload == other.payload
    }
}

impl Eq for ObjectMessage {}

impl ObjectMessage {
    pub fn draft() -> ObjectDraft {
        ObjectDraft::new()
    }

    /// Reconstruct an object from its wire bytes (everything after the
    /// `object` frame header).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(bytes);
        let nonce: [u8; 8] = reader.array()?;
        let expires_time = reader.i64()?;
        let object_type = reader.u32()?;
        let version = reader.var_int()?;
        let stream = reader.var_int()?;
        let body = reader.take_rest();
        let payload = ObjectPayload::read(object_type, version, stream, body)?;
        let message = Self {
            nonce: Some(nonce),
            expires_time,
            object_type,
            version,
            stream,
            payload,
            wire_cache: OnceLock::new(),
        };
        // Keep the received encoding verbatim; re-encoding an unknown or
        // newer payload could otherwise shift the content address.
        let _ = message.wire_cache.set(bytes[8..].to_vec());
        Ok(message)
    }

    pub fn nonce(&self) -> Option<[u8; 8]> {
        self.nonce
    }

    /// Attach the proof-of-work stamp. The nonce sits outside the memoized
    /// bytes, so this is allowed at any time.
    pub fn set_nonce(&mut self, nonce: [u8; 8]) {
        self.nonce = Some(nonce);
    }

    pub fn expires_time(&self) -> i64 {
        self.expires_time
    }

    pub fn object_type(&self) -> u32 {
        self.object_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stream(&self) -> u64 {
        self.stream
    }

    pub fn payload(&self) -> &ObjectPayload {
        &self.payload
    }

    pub fn is_signed(&self) -> bool {
        self.payload.is_signed()
    }

    pub fn is_decrypted(&self) -> bool {
        self.payload.is_decrypted()
    }

    fn write_header_without_nonce(&self, out: &mut Vec<u8>) {
        encode::i64(self.expires_time, out);
        encode::u32(self.object_type, out);
        encode::var_int(self.version, out);
        encode::var_int(self.stream, out);
    }

    /// `header_without_nonce ‖ payload`, memoized on first call.
    pub fn payload_bytes_without_nonce(&self) -> Result<&[u8], ProtocolError> {
        if let Some(bytes) = self.wire_cache.get() {
            return Ok(bytes);
        }
        let mut bytes = Vec::new();
        self.write_header_without_nonce(&mut bytes);
        self.payload.write(&mut bytes)?;
        Ok(self.wire_cache.get_or_init(|| bytes))
    }

    fn frozen(&self) -> bool {
        self.wire_cache.get().is_some()
    }

    /// Content address; requires the proof-of-work nonce.
    pub fn inventory_vector(&self) -> Result<InventoryVector, ProtocolError> {
        let nonce = self.nonce.ok_or(ProtocolError::MissingNonce)?;
        Ok(InventoryVector::compute(
            nonce,
            self.payload_bytes_without_nonce()?,
        ))
    }

    /// Canonical signature pre-image: `header_without_nonce ‖
    /// payload_bytes_to_sign`.
    pub fn bytes_to_sign(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        self.write_header_without_nonce(&mut out);
        self.payload.write_bytes_to_sign(&mut out)?;
        Ok(out)
    }

    /// Sign the payload in place. No-op for unsigned payload types.
    pub fn sign(
        &mut self,
        crypto: &dyn Cryptography,
        private_signing_key: &[u8],
    ) -> Result<(), ProtocolError> {
        if !self.payload.is_signed() {
            return Ok(());
        }
        if self.frozen() {
            return Err(ProtocolError::Frozen);
        }
        let signature = crypto.sign(&self.bytes_to_sign()?, private_signing_key);
        self.payload.set_signature(signature)
    }

    /// Verify the payload signature; the payload must be decrypted first.
    pub fn is_signature_valid(
        &self,
        crypto: &dyn Cryptography,
        public_signing_key: &[u8; 64],
    ) -> Result<bool, ProtocolError> {
        if !self.payload.is_decrypted() {
            return Err(ProtocolError::Encrypted);
        }
        let signature = match self.payload.signature() {
            Some(signature) => signature,
            None => return Ok(false),
        };
        Ok(crypto.verify(&self.bytes_to_sign()?, signature, public_signing_key))
    }

    pub fn encrypt(
        &mut self,
        crypto: &dyn Cryptography,
        public_encryption_key: &[u8; 64],
    ) -> Result<(), ProtocolError> {
        if self.frozen() {
            return Err(ProtocolError::Frozen);
        }
        self.payload.encrypt(crypto, public_encryption_key)
    }

    /// Decrypting never changes the wire bytes, so it is allowed even after
    /// they are frozen.
    pub fn decrypt(
        &mut self,
        crypto: &dyn Cryptography,
        private_encryption_key: &[u8],
    ) -> Result<(), ProtocolError> {
        self.payload.decrypt(crypto, private_encryption_key)
    }

    /// Full wire form: nonce (zeros until stamped) followed by the payload
    /// bytes.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        out.extend_from_slice(&self.nonce.unwrap_or([0u8; 8]));
        out.extend_from_slice(self.payload_bytes_without_nonce()?);
        Ok(())
    }
}

/// Partial object tolerated during construction; `build` validates.
pub struct ObjectDraft {
    nonce: Option<[u8; 8]>,
    expires_time: i64,
    object_type: Option<u32>,
    stream: u64,
    payload: Option<ObjectPayload>,
}

impl ObjectDraft {
    fn new() -> Self {
        Self {
            nonce: None,
            expires_time: 0,
            object_type: None,
            stream: 0,
            payload: None,
        }
    }

    pub fn nonce(mut self, nonce: [u8; 8]) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn expires_time(mut self, expires_time: i64) -> Self {
        self.expires_time = expires_time;
        self
    }

    pub fn object_type(mut self, object_type: u32) -> Self {
        self.object_type = Some(object_type);
        self
    }

    /// Override the payload's stream number.
    pub fn stream(mut self, stream: u64) -> Self {
        self.stream = stream;
        self
    }

    pub fn payload(mut self, payload: ObjectPayload) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn build(self) -> Result<ObjectMessage, ProtocolError> {
        let payload = self
            .payload
            .ok_or(ProtocolError::InvalidObject("payload required"))?;
        if self.expires_time <= 0 {
            return Err(ProtocolError::InvalidObject("expiry required"));
        }
        Ok(ObjectMessage {
            nonce: self.nonce,
            expires_time: self.expires_time,
            object_type: self.object_type.unwrap_or_else(|| payload.object_type()),
            version: payload.version(),
            stream: if self.stream > 0 {
                self.stream
            } else {
                payload.stream()
            },
            payload,
            wire_cache: OnceLock::new(),
        })
    }
}
