//! Domain types stored in the database.
//!
//! These types represent the persisted, cluster-visible state of servers.

use chrono::{DateTime, Utc};
use fleet_core::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

/// A server record as seen by every participant of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Identity of the server on the packet bus.
    pub id: ParticipantId,
    /// Human-readable name.
    pub name: String,
    /// Name of the configuration template the server was started from.
    pub template: String,
    /// The node that owns the server's process.
    pub host: ParticipantId,
    /// Current lifecycle state.
    pub state: ServerState,
    /// Port the server process was told to bind.
    pub port: Option<u16>,
    /// Whether the server process is currently connected to the cluster.
    pub connected: bool,
    /// The server's current session, if connected.
    #[serde(default)]
    pub session: Option<SessionId>,
    /// Participants currently occupying the server.
    #[serde(default)]
    pub occupants: Vec<String>,
    /// Delete the record once the server has stopped.
    pub unregister_after_disconnect: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ServerRecord {
    /// Create a fresh record in the `Starting` state.
    #[must_use]
    pub fn new(
        id: ParticipantId,
        name: impl Into<String>,
        template: impl Into<String>,
        host: ParticipantId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            template: template.into(),
            host,
            state: ServerState::Starting,
            port: None,
            connected: false,
            session: None,
            occupants: Vec::new(),
            unregister_after_disconnect: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Forget every piece of transient session and occupancy state.
    pub fn clear_session(&mut self) {
        self.connected = false;
        self.session = None;
        self.occupants.clear();
    }

    /// Bump the modification timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Lifecycle states for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServerState {
    /// Process spawned, not yet connected.
    Starting = 1,
    /// Connected and serving.
    Running = 2,
    /// Shutdown in progress.
    Stopping = 3,
    /// Process gone. Terminal.
    Stopped = 4,
}

impl ServerState {
    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `ServerState`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Starting),
            2 => Some(Self::Running),
            3 => Some(Self::Stopping),
            4 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Returns true once no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}
