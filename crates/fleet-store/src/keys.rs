//! Key encoding utilities for `RocksDB`.
//!
//! All identities are encoded with [`ParticipantId::to_bytes`], a fixed five
//! byte form, so index keys can be split without length prefixes.

use fleet_core::ParticipantId;

/// Width of an encoded participant identity.
pub const ID_LEN: usize = 5;

/// Encode a server key (just the identity bytes).
#[must_use]
pub fn server_key(id: &ParticipantId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

/// Encode a state-server index key: `state || server_id`.
#[must_use]
pub fn state_server_key(state: u8, id: &ParticipantId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + ID_LEN);
    key.push(state);
    key.extend_from_slice(&id.to_bytes());
    key
}

/// Encode a state prefix for scanning all servers in a given state.
#[must_use]
pub fn state_prefix(state: u8) -> Vec<u8> {
    vec![state]
}

/// Encode a host-server index key: `node_id || server_id`.
#[must_use]
pub fn host_server_key(host: &ParticipantId, id: &ParticipantId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(&host.to_bytes());
    key.extend_from_slice(&id.to_bytes());
    key
}

/// Encode a host prefix for scanning all servers owned by a node.
#[must_use]
pub fn host_prefix(host: &ParticipantId) -> Vec<u8> {
    host.to_bytes().to_vec()
}

/// Extract the trailing server identity from an index key.
///
/// Returns `None` if the key is too short or the role byte is unknown.
#[must_use]
pub fn extract_server_id(key: &[u8]) -> Option<ParticipantId> {
    let start = key.len().checked_sub(ID_LEN)?;
    let mut bytes = [0u8; ID_LEN];
    bytes.copy_from_slice(&key[start..]);
    ParticipantId::from_bytes(bytes)
}
