//! Core types and utilities for fleet.
//!
//! This crate provides the foundational types used throughout the fleet control plane:
//!
//! - **Identifiers**: participant identities (role + index) and server session IDs
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use fleet_core::{ParticipantId, ServiceRole};
//!
//! let id: ParticipantId = "server-7".parse().unwrap();
//! assert_eq!(id.role(), ServiceRole::Server);
//! assert_eq!(id.to_name(), "server-7");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;

pub use error::{CoreError, Result};
pub use ids::{IdError, ParticipantId, ServiceRole, SessionId};
