use std::collections::BTreeSet;

use codec::{encode, Reader};

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_LENGTH;

/// Destination identity: version, stream and the 20-byte ripe.
///
/// Version 0 marks the unresolved sentinel used while only the ripe is known
/// (e.g. a message decrypted before its recipient was looked up).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub version: u64,
    pub stream: u64,
    pub ripe: [u8; 20],
}

impl Address {
    pub fn new(version: u64, stream: u64, ripe: [u8; 20]) -> Self {
        Self {
            version,
            stream,
            ripe,
        }
    }

    pub fn unresolved(ripe: [u8; 20]) -> Self {
        Self::new(0, 0, ripe)
    }

    pub fn is_unresolved(&self) -> bool {
        self.version == 0
    }
}

/// Message body encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Recipient should discard the body.
    Ignore = 0,
    /// The body is the message.
    Trivial = 1,
    /// UTF-8 `"Subject:<s>\nBody:<b>"`.
    Simple = 2,
}

impl Encoding {
    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Ignore),
            1 => Some(Self::Trivial),
            2 => Some(Self::Simple),
            _ => None,
        }
    }
}

/// Delivery progress of a locally submitted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    PubkeyRequested,
    DoingProofOfWork,
    Sent,
    Acknowledged,
}

/// Sender identity embedded in the plaintext: address metadata, both public
/// keys, and the proof-of-work difficulty the sender demands for replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub version: u64,
    pub stream: u64,
    pub behavior_bitfield: u32,
    pub signing_key: [u8; 64],
    pub encryption_key: [u8; 64],
    pub nonce_trials_per_byte: u64,
    pub extra_bytes: u64,
}

/// The unencrypted envelope carried inside `msg` and `broadcast` objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plaintext {
    id: Option<u64>,
    pub sender: Sender,
    destination: Address,
    pub encoding: u64,
    pub message: Vec<u8>,
    pub ack: Vec<u8>,
    signature: Option<Vec<u8>>,
    pub status: Status,
    pub sent: Option<i64>,
    pub received: Option<i64>,
    pub labels: BTreeSet<String>,
    pub ack_data: Option<[u8; 32]>,
    pub ttl: i64,
    pub retries: u32,
    pub next_try: Option<i64>,
}

impl Plaintext {
    pub fn draft(sender: Sender) -> PlaintextDraft {
        PlaintextDraft::new(sender)
    }

    /// Decode including the trailing signature.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let mut plaintext = Self::read_without_signature(reader)?;
        plaintext.signature = Some(reader.var_bytes(MAX_PAYLOAD_LENGTH)?);
        Ok(plaintext)
    }

    /// Decode the signature-less prefix, i.e. the signed pre-image.
    pub fn read_without_signature(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let version = reader.var_int()?;
        let stream = reader.var_int()?;
        let behavior_bitfield = reader.u32()?;
        let signing_key = reader.array()?;
        let encryption_key = reader.array()?;
        let nonce_trials_per_byte = reader.var_int()?;
        let extra_bytes = reader.var_int()?;
        let destination_ripe = reader.array()?;
        let encoding = reader.var_int()?;
        let message = reader.var_bytes(MAX_PAYLOAD_LENGTH)?;
        let ack = reader.var_bytes(MAX_PAYLOAD_LENGTH)?;
        Ok(Self {
            id: None,
            sender: Sender {
                version,
                stream,
                behavior_bitfield,
                signing_key,
                encryption_key,
                nonce_trials_per_byte,
                extra_bytes,
            },
            destination: Address::unresolved(destination_ripe),
            encoding,
            message,
            ack,
            signature: None,
            status: Status::PubkeyRequested,
            sent: None,
            received: None,
            labels: BTreeSet::new(),
            ack_data: None,
            ttl: 0,
            retries: 0,
            next_try: None,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>, include_signature: bool) {
        encode::var_int(self.sender.version, out);
        encode::var_int(self.sender.stream, out);
        encode::u32(self.sender.behavior_bitfield, out);
        out.extend_from_slice(&self.sender.signing_key);
        out.extend_from_slice(&self.sender.encryption_key);
        encode::var_int(self.sender.nonce_trials_per_byte, out);
        encode::var_int(self.sender.extra_bytes, out);
        out.extend_from_slice(&self.destination.ripe);
        encode::var_int(self.encoding, out);
        encode::var_bytes(&self.message, out);
        encode::var_bytes(&self.ack, out);
        if include_signature {
            encode::var_bytes(self.signature.as_deref().unwrap_or(&[]), out);
        }
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Repository hook; an id may be assigned exactly once.
    pub fn set_id(&mut self, id: u64) -> Result<(), ProtocolError> {
        if self.id.is_some() {
            return Err(ProtocolError::InvalidObject("id already set"));
        }
        self.id = Some(id);
        Ok(())
    }

    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// Replace the unresolved destination sentinel with the full address.
    ///
    /// Accepted only while the current destination is the version-0 sentinel
    /// and the resolved ripe matches the sentinel's ripe.
    pub fn resolve_destination(&mut self, resolved: Address) -> Result<(), ProtocolError> {
        if !self.destination.is_unresolved() {
            return Err(ProtocolError::DestinationAlreadyResolved);
        }
        if resolved.ripe != self.destination.ripe {
            return Err(ProtocolError::RipeMismatch);
        }
        self.destination = resolved;
        Ok(())
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = Some(signature);
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn stream(&self) -> u64 {
        self.sender.stream
    }
}

/// Builder tolerating partial construction; `build` validates.
pub struct PlaintextDraft {
    sender: Sender,
    destination: Option<Address>,
    encoding: u64,
    message: Vec<u8>,
    ack: Vec<u8>,
    labels: BTreeSet<String>,
    ttl: i64,
}

impl PlaintextDraft {
    pub fn new(sender: Sender) -> Self {
        Self {
            sender,
            destination: None,
            encoding: Encoding::Simple.code(),
            message: Vec::new(),
            ack: Vec::new(),
            labels: BTreeSet::new(),
            ttl: 0,
        }
    }

    pub fn to(mut self, destination: Address) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding.code();
        self
    }

    pub fn message(mut self, message: Vec<u8>) -> Self {
        self.message = message;
        self
    }

    /// Subject/body pair in the `Simple` encoding.
    pub fn simple(mut self, subject: &str, body: &str) -> Self {
        self.encoding = Encoding::Simple.code();
        self.message = format!("Subject:{subject}\nBody:{body}").into_bytes();
        self
    }

    pub fn ack(mut self, ack: Vec<u8>) -> Self {
        self.ack = ack;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn build(self) -> Result<Plaintext, ProtocolError> {
        if Encoding::from_code(self.encoding).is_none() {
            return Err(ProtocolError::InvalidObject("unknown encoding"));
        }
        let destination = self
            .destination
            .ok_or(ProtocolError::InvalidObject("destination required"))?;
        Ok(Plaintext {
            id: None,
            sender: self.sender,
            destination,
            encoding: self.encoding,
            message: self.message,
            ack: self.ack,
            signature: None,
            status: Status::PubkeyRequested,
            sent: None,
            received: None,
            labels: self.labels,
            ack_data: None,
            ttl: self.ttl,
            retries: 0,
            next_try: None,
        })
    }
}
