use codec::CodecError;
use crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("payload checksum mismatch")]
    ChecksumMismatch,
    #[error("payload of {length} bytes exceeds limit of {limit}")]
    PayloadTooLarge { length: usize, limit: usize },
    /// An operation needed the plaintext of a still-sealed payload.
    #[error("payload is encrypted")]
    Encrypted,
    /// A sealed wire form was required but the payload was never encrypted.
    #[error("payload has not been encrypted")]
    NotEncrypted,
    /// The object's wire bytes are memoized; mutation is no longer allowed.
    #[error("object bytes are frozen")]
    Frozen,
    #[error("object has no proof-of-work nonce")]
    MissingNonce,
    #[error("destination already resolved")]
    DestinationAlreadyResolved,
    #[error("destination ripe mismatch")]
    RipeMismatch,
    #[error("invalid object: {0}")]
    InvalidObject(&'static str),
}
