//! Common error types for fleet.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::ids::ParticipantId;
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the fleet system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No participant with the specified identity is known.
    #[error("participant not found: {0}")]
    ParticipantNotFound(ParticipantId),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
