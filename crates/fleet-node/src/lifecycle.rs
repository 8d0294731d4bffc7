//! Server lifecycle state machine.
//!
//! ```text
//!   Starting ──(connected)──▶ Running
//!      │                        │
//!      └────────┬───────────────┘
//!               ▼ (stop / exit)
//!           Stopping ──▶ Stopped ──(restart)──▶ Starting
//! ```
//!
//! `Stopped` is terminal for one process; a fresh start of the same identity
//! begins again at `Starting`.

use fleet_core::ParticipantId;
use fleet_store::ServerState;

use crate::error::{NodeError, Result};

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `NodeError::InvalidState` if the transition is not allowed.
pub fn validate_transition(
    id: &ParticipantId,
    from: ServerState,
    to: ServerState,
) -> Result<ServerState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(NodeError::InvalidState { id: *id, from, to })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: ServerState, to: ServerState) -> bool {
    use ServerState::{Running, Starting, Stopped, Stopping};

    matches!(
        (from, to),
        (Starting, Running) | (Starting | Running, Stopping) | (Stopping, Stopped) | (Stopped, Starting)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: ServerState) -> Vec<ServerState> {
    use ServerState::{Running, Starting, Stopped, Stopping};

    match state {
        Starting => vec![Running, Stopping],
        Running => vec![Stopping],
        Stopping => vec![Stopped],
        Stopped => vec![Starting],
    }
}

/// Returns true while a process may still be alive for the server.
#[must_use]
pub const fn is_active(state: ServerState) -> bool {
    matches!(
        state,
        ServerState::Starting | ServerState::Running | ServerState::Stopping
    )
}
