//! Error types for the packet bus.

use thiserror::Error;

/// A result type using `PacketError`.
pub type Result<T> = std::result::Result<T, PacketError>;

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The underlying pub/sub transport cannot be reached.
    #[error("transport unreachable: {0}")]
    Unreachable(String),
}

/// Errors that can occur while publishing or decoding packets.
#[derive(Debug, Error)]
pub enum PacketError {
    /// The packet kind was never registered. Publishing such a packet is a
    /// programming error.
    #[error("packet kind not registered: {0}")]
    Unregistered(String),

    /// The packet could not be encoded.
    #[error("failed to encode packet {kind}: {source}")]
    Encode {
        /// Kind of the packet being encoded.
        kind: String,
        /// The underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// A registered packet could not be decoded.
    #[error("failed to decode packet {kind}: {source}")]
    Decode {
        /// Kind named by the envelope.
        kind: String,
        /// The underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },

    /// The bytes on the wire are not an envelope.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The transport rejected the operation.
    #[error(transparent)]
    Transport(#[from] BusError),
}

impl PacketError {
    /// Returns true if this error might be resolved by retrying.
    ///
    /// The bus itself never retries; this is a hint for callers.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Error returned by a packet listener.
///
/// The dispatcher logs it and continues with the remaining listeners.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Create a handler error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<PacketError> for HandlerError {
    fn from(err: PacketError) -> Self {
        Self(err.to_string())
    }
}
