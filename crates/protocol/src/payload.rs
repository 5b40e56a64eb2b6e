//! Typed object payloads and the encrypted-or-plain duality.
//!
//! Payloads are a tagged variant; capability predicates (`is_signed`,
//! `is_encrypted`) are variant-level functions. Encrypted variants hold a
//! [`CryptoState`] that moves `Sealed → Both` on decrypt and `Open → Both`
//! on encrypt; the sealed half is what goes on the wire.

use codec::{encode, Reader};
use crypto::Cryptography;

use crate::error::ProtocolError;
use crate::plaintext::Plaintext;
use crate::MAX_PAYLOAD_LENGTH;

/// Object type numbers assigned by the protocol.
pub mod object_type {
    pub const GETPUBKEY: u32 = 0;
    pub const PUBKEY: u32 = 1;
    pub const MSG: u32 = 2;
    pub const BROADCAST: u32 = 3;
}

/// Opaque ciphertext envelope sealed to an encryption key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CryptoBox {
    ciphertext: Vec<u8>,
}

impl CryptoBox {
    pub fn new(ciphertext: Vec<u8>) -> Self {
        Self { ciphertext }
    }

    pub fn seal(plain: &[u8], crypto: &dyn Cryptography, public_key: &[u8; 64]) -> Self {
        Self {
            ciphertext: crypto.encrypt(plain, public_key),
        }
    }

    pub fn open(
        &self,
        crypto: &dyn Cryptography,
        private_key: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        Ok(crypto.decrypt(&self.ciphertext, private_key)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.ciphertext
    }
}

/// Whether an encrypted payload currently holds ciphertext, plaintext or both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CryptoState<T> {
    Sealed(CryptoBox),
    Open(T),
    Both { sealed: CryptoBox, open: T },
}

impl<T> CryptoState<T> {
    pub fn open_ref(&self) -> Option<&T> {
        match self {
            Self::Sealed(_) => None,
            Self::Open(open) | Self::Both { open, .. } => Some(open),
        }
    }

    pub fn open_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Sealed(_) => None,
            Self::Open(open) | Self::Both { open, .. } => Some(open),
        }
    }

    pub fn sealed_ref(&self) -> Option<&CryptoBox> {
        match self {
            Self::Open(_) => None,
            Self::Sealed(sealed) | Self::Both { sealed, .. } => Some(sealed),
        }
    }

    pub fn is_decrypted(&self) -> bool {
        self.open_ref().is_some()
    }
}

/// Request for a recipient's pubkey, by ripe below version 4, by tag from
/// version 4 on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Getpubkey {
    pub version: u64,
    pub stream: u64,
    pub target: GetpubkeyTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GetpubkeyTarget {
    Ripe([u8; 20]),
    Tag([u8; 32]),
}

impl Getpubkey {
    fn read(version: u64, stream: u64, reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let target = if version < 4 {
            GetpubkeyTarget::Ripe(reader.array()?)
        } else {
            GetpubkeyTarget::Tag(reader.array()?)
        };
        Ok(Self {
            version,
            stream,
            target,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        match &self.target {
            GetpubkeyTarget::Ripe(ripe) => out.extend_from_slice(ripe),
            GetpubkeyTarget::Tag(tag) => out.extend_from_slice(tag),
        }
    }
}

/// Key material published for an address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PubkeyData {
    pub behavior_bitfield: u32,
    pub signing_key: [u8; 64],
    pub encryption_key: [u8; 64],
    pub nonce_trials_per_byte: u64,
    pub extra_bytes: u64,
    pub signature: Option<Vec<u8>>,
}

impl PubkeyData {
    fn read_v2(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            behavior_bitfield: reader.u32()?,
            signing_key: reader.array()?,
            encryption_key: reader.array()?,
            nonce_trials_per_byte: 0,
            extra_bytes: 0,
            signature: None,
        })
    }

    fn read_v3(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let mut data = Self::read_v2(reader)?;
        data.nonce_trials_per_byte = reader.var_int()?;
        data.extra_bytes = reader.var_int()?;
        data.signature = Some(reader.var_bytes(MAX_PAYLOAD_LENGTH)?);
        Ok(data)
    }

    fn write_v2(&self, out: &mut Vec<u8>) {
        encode::u32(self.behavior_bitfield, out);
        out.extend_from_slice(&self.signing_key);
        out.extend_from_slice(&self.encryption_key);
    }

    fn write_v3(&self, out: &mut Vec<u8>, include_signature: bool) {
        self.write_v2(out);
        encode::var_int(self.nonce_trials_per_byte, out);
        encode::var_int(self.extra_bytes, out);
        if include_signature {
            encode::var_bytes(self.signature.as_deref().unwrap_or(&[]), out);
        }
    }
}

/// Published pubkey object; version 4 hides the key material behind a tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pubkey {
    V2 {
        stream: u64,
        data: PubkeyData,
    },
    V3 {
        stream: u64,
        data: PubkeyData,
    },
    V4 {
        stream: u64,
        tag: [u8; 32],
        state: CryptoState<PubkeyData>,
    },
}

impl Pubkey {
    fn read(
        version: u64,
        stream: u64,
        reader: &mut Reader<'_>,
    ) -> Result<Option<Self>, ProtocolError> {
        match version {
            2 => Ok(Some(Self::V2 {
                stream,
                data: PubkeyData::read_v2(reader)?,
            })),
            3 => Ok(Some(Self::V3 {
                stream,
                data: PubkeyData::read_v3(reader)?,
            })),
            4 => Ok(Some(Self::V4 {
                stream,
                tag: reader.array()?,
                state: CryptoState::Sealed(CryptoBox::new(reader.take_rest().to_vec())),
            })),
            _ => Ok(None),
        }
    }

    fn version(&self) -> u64 {
        match self {
            Self::V2 { .. } => 2,
            Self::V3 { .. } => 3,
            Self::V4 { .. } => 4,
        }
    }

    fn stream(&self) -> u64 {
        match self {
            Self::V2 { stream, .. } | Self::V3 { stream, .. } | Self::V4 { stream, .. } => *stream,
        }
    }

    /// The key material, available unless still sealed.
    pub fn data(&self) -> Option<&PubkeyData> {
        match self {
            Self::V2 { data, .. } | Self::V3 { data, .. } => Some(data),
            Self::V4 { state, .. } => state.open_ref(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        match self {
            Self::V2 { data, .. } => data.write_v2(out),
            Self::V3 { data, .. } => data.write_v3(out, true),
            Self::V4 { tag, state, .. } => {
                out.extend_from_slice(tag);
                let sealed = state.sealed_ref().ok_or(ProtocolError::NotEncrypted)?;
                out.extend_from_slice(sealed.as_bytes());
            }
        }
        Ok(())
    }

    fn write_bytes_to_sign(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        match self {
            Self::V2 { .. } => Ok(()),
            Self::V3 { data, .. } => {
                data.write_v3(out, false);
                Ok(())
            }
            Self::V4 { tag, state, .. } => {
                let data = state.open_ref().ok_or(ProtocolError::Encrypted)?;
                out.extend_from_slice(tag);
                data.write_v3(out, false);
                Ok(())
            }
        }
    }
}

/// Person-to-person message; the body is always encrypted on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Msg {
    pub stream: u64,
    pub state: CryptoState<Plaintext>,
}

impl Msg {
    pub const VERSION: u64 = 1;

    pub fn plain(stream: u64, plaintext: Plaintext) -> Self {
        Self {
            stream,
            state: CryptoState::Open(plaintext),
        }
    }
}

/// Subscription broadcast, versions 4 (untagged) and 5 (tagged).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Broadcast {
    pub version: u64,
    pub stream: u64,
    pub tag: Option<[u8; 32]>,
    pub state: CryptoState<Plaintext>,
}

impl Broadcast {
    pub fn plain(version: u64, stream: u64, tag: Option<[u8; 32]>, plaintext: Plaintext) -> Self {
        Self {
            version,
            stream,
            tag,
            state: CryptoState::Open(plaintext),
        }
    }

    fn read(version: u64, stream: u64, reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let tag = if version >= 5 {
            Some(reader.array()?)
        } else {
            None
        };
        Ok(Self {
            version,
            stream,
            tag,
            state: CryptoState::Sealed(CryptoBox::new(reader.take_rest().to_vec())),
        })
    }
}

/// Catch-all for unknown types and versions; carried and re-gossiped as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericPayload {
    pub object_type: u32,
    pub version: u64,
    pub stream: u64,
    pub data: Vec<u8>,
}

/// The typed payload of an object message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectPayload {
    Getpubkey(Getpubkey),
    Pubkey(Pubkey),
    Msg(Msg),
    Broadcast(Broadcast),
    Generic(GenericPayload),
}

impl ObjectPayload {
    /// Reconstruct the concrete variant from the wire; the factory.
    ///
    /// Unknown types and versions fall back to [`GenericPayload`] so that
    /// objects from newer peers are still stored and redistributed.
    pub fn read(
        object_type: u32,
        version: u64,
        stream: u64,
        body: &[u8],
    ) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(body);
        let payload = match object_type {
            object_type::GETPUBKEY => {
                Self::Getpubkey(Getpubkey::read(version, stream, &mut reader)?)
            }
            object_type::PUBKEY => match Pubkey::read(version, stream, &mut reader)? {
                Some(pubkey) => Self::Pubkey(pubkey),
                None => return Ok(Self::generic(object_type, version, stream, body)),
            },
            object_type::MSG => Self::Msg(Msg {
                stream,
                state: CryptoState::Sealed(CryptoBox::new(reader.take_rest().to_vec())),
            }),
            object_type::BROADCAST if version == 4 || version == 5 => {
                Self::Broadcast(Broadcast::read(version, stream, &mut reader)?)
            }
            _ => return Ok(Self::generic(object_type, version, stream, body)),
        };
        Ok(payload)
    }

    fn generic(object_type: u32, version: u64, stream: u64, body: &[u8]) -> Self {
        Self::Generic(GenericPayload {
            object_type,
            version,
            stream,
            data: body.to_vec(),
        })
    }

    pub fn object_type(&self) -> u32 {
        match self {
            Self::Getpubkey(_) => object_type::GETPUBKEY,
            Self::Pubkey(_) => object_type::PUBKEY,
            Self::Msg(_) => object_type::MSG,
            Self::Broadcast(_) => object_type::BROADCAST,
            Self::Generic(generic) => generic.object_type,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Self::Getpubkey(getpubkey) => getpubkey.version,
            Self::Pubkey(pubkey) => pubkey.version(),
            Self::Msg(_) => Msg::VERSION,
            Self::Broadcast(broadcast) => broadcast.version,
            Self::Generic(generic) => generic.version,
        }
    }

    pub fn stream(&self) -> u64 {
        match self {
            Self::Getpubkey(getpubkey) => getpubkey.stream,
            Self::Pubkey(pubkey) => pubkey.stream(),
            Self::Msg(msg) => msg.stream,
            Self::Broadcast(broadcast) => broadcast.stream,
            Self::Generic(generic) => generic.stream,
        }
    }

    pub fn is_signed(&self) -> bool {
        match self {
            Self::Getpubkey(_) | Self::Generic(_) => false,
            Self::Pubkey(pubkey) => !matches!(pubkey, Pubkey::V2 { .. }),
            Self::Msg(_) | Self::Broadcast(_) => true,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(
            self,
            Self::Msg(_) | Self::Broadcast(_) | Self::Pubkey(Pubkey::V4 { .. })
        )
    }

    /// False only while an encrypted payload is still sealed.
    pub fn is_decrypted(&self) -> bool {
        match self {
            Self::Msg(msg) => msg.state.is_decrypted(),
            Self::Broadcast(broadcast) => broadcast.state.is_decrypted(),
            Self::Pubkey(Pubkey::V4 { state, .. }) => state.is_decrypted(),
            _ => true,
        }
    }

    pub fn signature(&self) -> Option<&[u8]> {
        match self {
            Self::Msg(msg) => msg.state.open_ref().and_then(Plaintext::signature),
            Self::Broadcast(broadcast) => {
                broadcast.state.open_ref().and_then(Plaintext::signature)
            }
            Self::Pubkey(pubkey) => pubkey.data().and_then(|data| data.signature.as_deref()),
            _ => None,
        }
    }

    pub fn set_signature(&mut self, signature: Vec<u8>) -> Result<(), ProtocolError> {
        match self {
            Self::Msg(msg) => {
                let open = msg.state.open_mut().ok_or(ProtocolError::Encrypted)?;
                open.set_signature(signature);
            }
            Self::Broadcast(broadcast) => {
                let open = broadcast.state.open_mut().ok_or(ProtocolError::Encrypted)?;
                open.set_signature(signature);
            }
            Self::Pubkey(Pubkey::V3 { data, .. }) => data.signature = Some(signature),
            Self::Pubkey(Pubkey::V4 { state, .. }) => {
                let open = state.open_mut().ok_or(ProtocolError::Encrypted)?;
                open.signature = Some(signature);
            }
            _ => return Err(ProtocolError::InvalidObject("payload is not signed")),
        }
        Ok(())
    }

    /// Full wire form of the payload body.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        match self {
            Self::Getpubkey(getpubkey) => {
                getpubkey.write(out);
                Ok(())
            }
            Self::Pubkey(pubkey) => pubkey.write(out),
            Self::Msg(msg) => {
                let sealed = msg.state.sealed_ref().ok_or(ProtocolError::NotEncrypted)?;
                out.extend_from_slice(sealed.as_bytes());
                Ok(())
            }
            Self::Broadcast(broadcast) => {
                if let Some(tag) = &broadcast.tag {
                    out.extend_from_slice(tag);
                }
                let sealed = broadcast
                    .state
                    .sealed_ref()
                    .ok_or(ProtocolError::NotEncrypted)?;
                out.extend_from_slice(sealed.as_bytes());
                Ok(())
            }
            Self::Generic(generic) => {
                out.extend_from_slice(&generic.data);
                Ok(())
            }
        }
    }

    /// The payload's contribution to the canonical signature pre-image.
    pub fn write_bytes_to_sign(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        match self {
            Self::Msg(msg) => {
                let open = msg.state.open_ref().ok_or(ProtocolError::Encrypted)?;
                open.write(out, false);
                Ok(())
            }
            Self::Broadcast(broadcast) => {
                if let Some(tag) = &broadcast.tag {
                    out.extend_from_slice(tag);
                }
                let open = broadcast.state.open_ref().ok_or(ProtocolError::Encrypted)?;
                open.write(out, false);
                Ok(())
            }
            Self::Pubkey(pubkey) => pubkey.write_bytes_to_sign(out),
            Self::Getpubkey(_) | Self::Generic(_) => {
                Err(ProtocolError::InvalidObject("payload is not signed"))
            }
        }
    }

    /// Seal the open plaintext to the given encryption key.
    pub fn encrypt(
        &mut self,
        crypto: &dyn Cryptography,
        public_encryption_key: &[u8; 64],
    ) -> Result<(), ProtocolError> {
        match self {
            Self::Msg(msg) => {
                let open = msg.state.open_ref().ok_or(ProtocolError::Encrypted)?;
                let mut plain = Vec::new();
                open.write(&mut plain, true);
                msg.state = CryptoState::Both {
                    sealed: CryptoBox::seal(&plain, crypto, public_encryption_key),
                    open: open.clone(),
                };
                Ok(())
            }
            Self::Broadcast(broadcast) => {
                let open = broadcast.state.open_ref().ok_or(ProtocolError::Encrypted)?;
                let mut plain = Vec::new();
                open.write(&mut plain, true);
                broadcast.state = CryptoState::Both {
                    sealed: CryptoBox::seal(&plain, crypto, public_encryption_key),
                    open: open.clone(),
                };
                Ok(())
            }
            Self::Pubkey(Pubkey::V4 { state, .. }) => {
                let open = state.open_ref().ok_or(ProtocolError::Encrypted)?;
                let mut plain = Vec::new();
                open.write_v3(&mut plain, true);
                *state = CryptoState::Both {
                    sealed: CryptoBox::seal(&plain, crypto, public_encryption_key),
                    open: open.clone(),
                };
                Ok(())
            }
            _ => Err(ProtocolError::InvalidObject("payload is not encrypted")),
        }
    }

    /// Open the sealed ciphertext with the given decryption key.
    pub fn decrypt(
        &mut self,
        crypto: &dyn Cryptography,
        private_encryption_key: &[u8],
    ) -> Result<(), ProtocolError> {
        match self {
            Self::Msg(msg) => {
                if msg.state.is_decrypted() {
                    return Ok(());
                }
                let sealed = msg.state.sealed_ref().ok_or(ProtocolError::NotEncrypted)?;
                let plain = sealed.open(crypto, private_encryption_key)?;
                let mut reader = Reader::new(&plain);
                let open = Plaintext::read(&mut reader)?;
                msg.state = CryptoState::Both {
                    sealed: sealed.clone(),
                    open,
                };
                Ok(())
            }
            Self::Broadcast(broadcast) => {
                if broadcast.state.is_decrypted() {
                    return Ok(());
                }
                let sealed = broadcast
                    .state
                    .sealed_ref()
                    .ok_or(ProtocolError::NotEncrypted)?;
                let plain = sealed.open(crypto, private_encryption_key)?;
                let mut reader = Reader::new(&plain);
                let open = Plaintext::read(&mut reader)?;
                broadcast.state = CryptoState::Both {
                    sealed: sealed.clone(),
                    open,
                };
                Ok(())
            }
            Self::Pubkey(Pubkey::V4 { state, .. }) => {
                if state.is_decrypted() {
                    return Ok(());
                }
                let sealed = state.sealed_ref().ok_or(ProtocolError::NotEncrypted)?;
                let plain = sealed.open(crypto, private_encryption_key)?;
                let mut reader = Reader::new(&plain);
                let open = PubkeyData::read_v3(&mut reader)?;
                *state = CryptoState::Both {
                    sealed: sealed.clone(),
                    open,
                };
                Ok(())
            }
            _ => Err(ProtocolError::InvalidObject("payload is not encrypted")),
        }
    }
}
