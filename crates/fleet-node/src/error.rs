//! Error types for the node daemon.

use std::path::PathBuf;

use fleet_core::ParticipantId;
use fleet_store::ServerState;
use thiserror::Error;

/// A result type using `NodeError`.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors that can occur while supervising server processes.
#[derive(Debug, Error)]
pub enum NodeError {
    /// No local process is tracked for the server.
    #[error("server not found: {0}")]
    ServerNotFound(ParticipantId),

    /// The requested state transition is not valid.
    #[error("invalid state transition for server {id}: cannot transition from {from:?} to {to:?}")]
    InvalidState {
        /// The server being transitioned.
        id: ParticipantId,
        /// The current state.
        from: ServerState,
        /// The requested target state.
        to: ServerState,
    },

    /// The process could not be spawned.
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// The working directory could not be prepared or removed.
    #[error("staging failed for {path}: {source}")]
    Staging {
        /// Directory being staged.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration or catalog contents.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] fleet_store::StoreError),

    /// Packet bus error.
    #[error("packet error: {0}")]
    Packet(#[from] fleet_packets::PacketError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Store(_) | Self::Io(_) => true,
            Self::Packet(e) => e.is_retriable(),
            _ => false,
        }
    }
}
