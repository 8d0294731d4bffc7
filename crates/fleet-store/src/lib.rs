//! Authoritative server record storage for fleet.
//!
//! Every participant of the cluster reads server records through the [`Store`]
//! trait; only the owning node's lifecycle coordinator writes them. Two
//! implementations are provided:
//!
//! - [`RocksStore`]: persistent storage in `RocksDB` with column families for
//!   the state and host indexes
//! - [`MemoryStore`]: an in-process map, used by tests and single-process
//!   clusters
//!
//! # Example
//!
//! ```no_run
//! use fleet_store::{RocksStore, ServerState, Store};
//!
//! let store = RocksStore::open("/tmp/fleet-db").unwrap();
//! let running = store.list_servers_by_state(ServerState::Running).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use rocks::RocksStore;
pub use types::{ServerRecord, ServerState};

use fleet_core::ParticipantId;

/// The storage trait defining all record operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    /// Insert or update a server record.
    ///
    /// This also maintains the state and host indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_server(&self, server: &ServerRecord) -> Result<()>;

    /// Get a server by identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_server(&self, id: &ParticipantId) -> Result<Option<ServerRecord>>;

    /// Check whether a record exists for the identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn exists_server(&self, id: &ParticipantId) -> Result<bool> {
        Ok(self.get_server(id)?.is_some())
    }

    /// Delete a server by identity.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no record exists for `id`.
    fn delete_server(&self, id: &ParticipantId) -> Result<()>;

    /// List every server record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_servers(&self) -> Result<Vec<ServerRecord>>;

    /// List all servers in a given state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_servers_by_state(&self, state: ServerState) -> Result<Vec<ServerRecord>>;

    /// List all servers owned by a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_servers_by_host(&self, host: &ParticipantId) -> Result<Vec<ServerRecord>>;
}
