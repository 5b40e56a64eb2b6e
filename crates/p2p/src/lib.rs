//! Peer-to-peer networking core: the per-connection state machine, the
//! network handler owning all live connections, and the dispatcher feeding
//! locally submitted messages into the flood-fill.
//!
//! Every subsystem receives its capabilities (inventory, node registry,
//! cryptography, listener) through a [`Context`] at construction; nothing
//! here reaches for globals.

mod config;
mod connection;
mod context;
mod dispatch;
mod error;
mod handler;
mod peer;

pub use config::NetworkConfig;
pub use connection::{Connection, ConnectionState, Mode, RequestMap};
pub use context::{Context, CURRENT_VERSION};
pub use dispatch::{CustomCommandHandler, Dispatcher, MessageListener};
pub use error::{NetworkError, NodeError};
pub use handler::{NetworkEvent, NetworkHandler, NetworkRelay, PeerId};
