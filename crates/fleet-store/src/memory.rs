//! In-memory storage implementation.

use std::collections::HashMap;

use fleet_core::ParticipantId;
use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::types::{ServerRecord, ServerState};
use crate::Store;

/// A [`Store`] backed by a process-local map.
///
/// Records are cloned in and out, so callers never observe each other's
/// unsaved modifications, matching the semantics of the persistent store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    servers: RwLock<HashMap<ParticipantId, ServerRecord>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn put_server(&self, server: &ServerRecord) -> Result<()> {
        self.servers.write().insert(server.id, server.clone());
        Ok(())
    }

    fn get_server(&self, id: &ParticipantId) -> Result<Option<ServerRecord>> {
        Ok(self.servers.read().get(id).cloned())
    }

    fn delete_server(&self, id: &ParticipantId) -> Result<()> {
        self.servers
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(*id))
    }

    fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        let mut servers: Vec<_> = self.servers.read().values().cloned().collect();
        servers.sort_by_key(|s| s.id);
        Ok(servers)
    }

    fn list_servers_by_state(&self, state: ServerState) -> Result<Vec<ServerRecord>> {
        Ok(self
            .list_servers()?
            .into_iter()
            .filter(|s| s.state == state)
            .collect())
    }

    fn list_servers_by_host(&self, host: &ParticipantId) -> Result<Vec<ServerRecord>> {
        Ok(self
            .list_servers()?
            .into_iter()
            .filter(|s| s.host == *host)
            .collect())
    }
}
