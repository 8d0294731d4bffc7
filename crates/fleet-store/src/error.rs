//! Store errors.

use fleet_core::ParticipantId;
use thiserror::Error;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Why a store operation failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the server.
    #[error("no record for server {0}")]
    NotFound(ParticipantId),

    /// The backing database rejected the operation.
    #[error("database error: {0}")]
    Database(String),

    /// A record could not be encoded or decoded.
    #[error("record encoding error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether repeating the operation may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Database(e.into_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_database_errors_are_retriable() {
        assert!(StoreError::Database("busy".into()).is_retriable());
        assert!(!StoreError::NotFound(ParticipantId::server(3)).is_retriable());
        assert!(!StoreError::Serialization("eof".into()).is_retriable());
    }

    #[test]
    fn not_found_names_the_server() {
        let err = StoreError::NotFound(ParticipantId::server(3));
        assert_eq!(err.to_string(), "no record for server server-3");
    }
}
