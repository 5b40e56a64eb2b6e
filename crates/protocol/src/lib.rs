//! Wire entities for the object-gossip network.
//!
//! Everything a node puts on the wire lives here: the framed message set
//! exchanged between peers, the object envelope with its typed payloads, and
//! the plaintext carried inside encrypted messages. Serialization is built on
//! the primitives in the `codec` crate; hashing comes from `crypto`.

mod address;
mod error;
mod iv;
mod message;
mod object;
pub mod payload;
mod plaintext;
pub mod unix_time;

pub use address::NetworkAddress;
pub use error::ProtocolError;
pub use iv::InventoryVector;
pub use message::{
    checksum, parse_command, NetworkMessage, Version, MAGIC, MAX_ADDR_LENGTH, MAX_INV_LENGTH,
    MAX_PAYLOAD_LENGTH,
};
pub use object::{ObjectDraft, ObjectMessage};
pub use payload::ObjectPayload;
pub use plaintext::{Address, Encoding, Plaintext, PlaintextDraft, Sender, Status};
