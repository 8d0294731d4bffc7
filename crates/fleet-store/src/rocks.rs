//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use fleet_core::ParticipantId;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{ServerRecord, ServerState};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Resolve every server referenced by an index under `prefix`.
    fn scan_index(&self, index: &str, prefix: &[u8]) -> Result<Vec<ServerRecord>> {
        let cf_index = self.cf(index)?;

        let mut servers = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_index,
            IteratorMode::From(prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            let Some(id) = keys::extract_server_id(&key) else {
                tracing::warn!(index, "Skipping malformed index key");
                continue;
            };
            if let Some(server) = self.get_server(&id)? {
                servers.push(server);
            }
        }

        Ok(servers)
    }
}

impl Store for RocksStore {
    fn put_server(&self, server: &ServerRecord) -> Result<()> {
        let cf_servers = self.cf(cf::SERVERS)?;
        let cf_by_state = self.cf(cf::SERVERS_BY_STATE)?;
        let cf_by_host = self.cf(cf::SERVERS_BY_HOST)?;

        let server_key = keys::server_key(&server.id);
        let value = Self::serialize(server)?;

        // Check the previous record to keep the indexes in sync
        let previous = self
            .db
            .get_cf(&cf_servers, &server_key)?
            .map(|data| Self::deserialize::<ServerRecord>(&data))
            .transpose()?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_servers, &server_key, &value);

        if let Some(old) = previous {
            if old.state != server.state {
                batch.delete_cf(
                    &cf_by_state,
                    keys::state_server_key(old.state.as_u8(), &server.id),
                );
            }
            if old.host != server.host {
                batch.delete_cf(&cf_by_host, keys::host_server_key(&old.host, &server.id));
            }
        }
        batch.put_cf(
            &cf_by_state,
            keys::state_server_key(server.state.as_u8(), &server.id),
            [],
        );
        batch.put_cf(
            &cf_by_host,
            keys::host_server_key(&server.host, &server.id),
            [],
        );

        self.db.write(batch)?;

        Ok(())
    }

    fn get_server(&self, id: &ParticipantId) -> Result<Option<ServerRecord>> {
        let cf = self.cf(cf::SERVERS)?;
        let key = keys::server_key(id);

        self.db
            .get_cf(&cf, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn delete_server(&self, id: &ParticipantId) -> Result<()> {
        let cf_servers = self.cf(cf::SERVERS)?;
        let cf_by_state = self.cf(cf::SERVERS_BY_STATE)?;
        let cf_by_host = self.cf(cf::SERVERS_BY_HOST)?;

        // Get the server to find its index entries
        let server = self.get_server(id)?.ok_or(StoreError::NotFound(*id))?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_servers, keys::server_key(id));
        batch.delete_cf(
            &cf_by_state,
            keys::state_server_key(server.state.as_u8(), id),
        );
        batch.delete_cf(&cf_by_host, keys::host_server_key(&server.host, id));

        self.db.write(batch)?;

        Ok(())
    }

    fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        let cf = self.cf(cf::SERVERS)?;

        let mut servers = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        for item in iter {
            let (_, value) = item?;
            servers.push(Self::deserialize(&value)?);
        }

        Ok(servers)
    }

    fn list_servers_by_state(&self, state: ServerState) -> Result<Vec<ServerRecord>> {
        self.scan_index(cf::SERVERS_BY_STATE, &keys::state_prefix(state.as_u8()))
    }

    fn list_servers_by_host(&self, host: &ParticipantId) -> Result<Vec<ServerRecord>> {
        self.scan_index(cf::SERVERS_BY_HOST, &keys::host_prefix(host))
    }
}
