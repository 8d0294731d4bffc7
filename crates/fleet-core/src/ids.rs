//! Core identifier types for fleet.
//!
//! This module provides strongly-typed identifiers for bus participants and
//! server sessions. A participant's canonical string form doubles as the name
//! of its unicast topic, so the encoding here is part of the wire contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The role a participant plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    /// A machine that starts and supervises servers.
    Node,
    /// A proxy fronting a set of servers.
    Proxy,
    /// An externally spawned worker process.
    Server,
}

impl ServiceRole {
    /// Every role, in declaration order.
    pub const ALL: [Self; 3] = [Self::Node, Self::Proxy, Self::Server];

    /// The lowercase role name, used as the role-multicast topic.
    #[must_use]
    pub const fn topic_name(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Proxy => "proxy",
            Self::Server => "server",
        }
    }

    /// Convert the role to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Node => 1,
            Self::Proxy => 2,
            Self::Server => 3,
        }
    }

    /// Try to convert a numeric value to a `ServiceRole`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Node),
            2 => Some(Self::Proxy),
            3 => Some(Self::Server),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic_name())
    }
}

impl FromStr for ServiceRole {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(Self::Node),
            "proxy" => Ok(Self::Proxy),
            "server" => Ok(Self::Server),
            other => Err(IdError::UnknownRole(other.to_string())),
        }
    }
}

/// Immutable identity of any bus participant: a role and a numeric index.
///
/// The canonical string form is `"{role}-{index}"`, e.g. `server-7`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId {
    role: ServiceRole,
    index: u32,
}

impl ParticipantId {
    /// Create a new identity.
    #[must_use]
    pub const fn new(role: ServiceRole, index: u32) -> Self {
        Self { role, index }
    }

    /// Shorthand for a node identity.
    #[must_use]
    pub const fn node(index: u32) -> Self {
        Self::new(ServiceRole::Node, index)
    }

    /// Shorthand for a server identity.
    #[must_use]
    pub const fn server(index: u32) -> Self {
        Self::new(ServiceRole::Server, index)
    }

    /// Shorthand for a proxy identity.
    #[must_use]
    pub const fn proxy(index: u32) -> Self {
        Self::new(ServiceRole::Proxy, index)
    }

    /// The participant's role.
    #[must_use]
    pub const fn role(&self) -> ServiceRole {
        self.role
    }

    /// The participant's index within its role.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// The canonical string form, also the unicast topic name.
    #[must_use]
    pub fn to_name(&self) -> String {
        self.to_string()
    }

    /// Fixed-width binary encoding: role byte followed by the big-endian index.
    ///
    /// Big-endian keeps byte order equal to numeric order for prefix scans.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 5] {
        let mut bytes = [0u8; 5];
        bytes[0] = self.role.as_u8();
        bytes[1..].copy_from_slice(&self.index.to_be_bytes());
        bytes
    }

    /// Decode the encoding produced by [`ParticipantId::to_bytes`].
    #[must_use]
    pub fn from_bytes(bytes: [u8; 5]) -> Option<Self> {
        let role = ServiceRole::from_u8(bytes[0])?;
        let index = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        Some(Self { role, index })
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({self})")
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role, self.index)
    }
}

impl FromStr for ParticipantId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (role, index) = s
            .rsplit_once('-')
            .ok_or_else(|| IdError::Malformed(s.to_string()))?;
        let role = role.parse()?;
        let index = index
            .parse()
            .map_err(|_| IdError::InvalidIndex(index.to_string()))?;
        Ok(Self { role, index })
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.to_string()
    }
}

/// A 16-byte session identifier based on UUID v4.
///
/// A server receives a fresh session ID every time it connects to the cluster.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Create a new `SessionId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random `SessionId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = IdError;

    /// Parse a `SessionId` from a UUID string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The role segment does not name a known role.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// The index segment is not a non-negative integer.
    #[error("invalid index: {0}")]
    InvalidIndex(String),

    /// The input is not of the form `role-index`.
    #[error("malformed participant id: {0}")]
    Malformed(String),

    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,
}
