//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary server records, keyed by the encoded server identity.
    pub const SERVERS: &str = "servers";

    /// Index: servers by lifecycle state, keyed by `state || server_id`.
    pub const SERVERS_BY_STATE: &str = "servers_by_state";

    /// Index: servers by owning node, keyed by `node_id || server_id`.
    pub const SERVERS_BY_HOST: &str = "servers_by_host";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::SERVERS, cf::SERVERS_BY_STATE, cf::SERVERS_BY_HOST]
}
