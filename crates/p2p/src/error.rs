use std::io;

use protocol::ProtocolError;
use thiserror::Error;

use crate::connection::ConnectionState;

/// A peer violated the connection state machine; grounds for disconnect.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("command {command:?} not allowed in state {state:?}")]
    UnexpectedCommand {
        command: &'static str,
        state: ConnectionState,
    },
}

/// Failures at the transport boundary. These terminate the offending
/// connection only; global state is never touched.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Wire(#[from] ProtocolError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("maximum connections reached")]
    Capacity,
}
