//! Node daemon for fleet: owns and supervises the server processes of one
//! host.
//!
//! A node resolves a [`ConfigurationTemplate`] against its [`Catalog`],
//! launches the server process and keeps the cluster-visible record in the
//! [`Store`](fleet_store::Store) in step with the process lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    LifecycleCoordinator                     │
//! │   start / stop / stop_internal / stop_all / record          │
//! └─────────────────────────────────────────────────────────────┘
//!          │                      │                     │
//!          ▼                      ▼                     ▼
//! ┌─────────────────┐   ┌──────────────────┐   ┌────────────────┐
//! │ ProcessSupervisor│   │ PacketDispatcher │   │     Store      │
//! │ catalog, ports,  │   │ ShutdownRequest  │   │ ServerRecord   │
//! │ staging, launch  │   │ / ShutdownAck    │   │ (RocksDB)      │
//! └─────────────────┘   └──────────────────┘   └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleet_core::ParticipantId;
//! use fleet_node::{
//!     Catalog, ConfigurationTemplate, DirectoryStager, LifecycleCoordinator, NodeConfig,
//!     OsLauncher, ProcessSupervisor,
//! };
//! use fleet_packets::{LocalBroker, PacketDispatcher, PacketRegistry};
//! use fleet_store::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NodeConfig::from_env();
//! let dispatcher = PacketDispatcher::connect(
//!     config.node_id(),
//!     Arc::new(LocalBroker::new()),
//!     Arc::new(PacketRegistry::with_builtin()),
//! )?;
//! let supervisor = ProcessSupervisor::new(
//!     &config,
//!     Arc::new(Catalog::load("/opt/fleet/catalog.json")?),
//!     Arc::new(OsLauncher::new()),
//!     Arc::new(DirectoryStager::new(&config.work_root)),
//! );
//! let coordinator = Arc::new(LifecycleCoordinator::new(
//!     config.node_id(),
//!     Arc::new(MemoryStore::new()),
//!     dispatcher,
//!     supervisor,
//!     config.stop,
//! ));
//!
//! let template = ConfigurationTemplate::new("lobby", "paper-1.20", 30000);
//! let outcome = coordinator.start(&template, ParticipantId::server(7)).await;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! Servers follow a strict state machine with valid transitions:
//!
//! - `Starting` → `Running` (connected) or `Stopping`
//! - `Running` → `Stopping`
//! - `Stopping` → `Stopped`
//! - `Stopped` → `Starting` (restart)

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lifecycle;
pub mod port;
pub mod process;
pub mod staging;
pub mod supervisor;
pub mod template;

pub use catalog::{Catalog, Runtime, ServerVersion, VersionType};
pub use command::{build_command, CommandSpec, Placeholders};
pub use config::{NodeConfig, StopTiming};
pub use coordinator::{Escalation, LifecycleCoordinator, ProcessInfo, StopOutcome};
pub use error::{NodeError, Result};
pub use process::{
    KillMode, LaunchRequest, LaunchedProcess, OsLauncher, ProcessHandle, ProcessLauncher,
};
pub use staging::{DirectoryStager, FileStager};
pub use supervisor::{PreparedLaunch, ProcessSupervisor, StartOutcome};
pub use template::ConfigurationTemplate;

#[cfg(any(test, feature = "test-utils"))]
pub use process::mock::MockLauncher;
