//! Process supervisor: turns a template into a running process.
//!
//! Starting is split in two so the coordinator can check its stop guard in
//! between: [`ProcessSupervisor::prepare`] resolves every reference, picks a
//! port and stages the working directory; [`ProcessSupervisor::spawn`] starts
//! the process. Neither step leaves anything behind when it fails.
//!
//! A port handed out by `prepare` stays reserved until the launch is
//! discarded or the owner calls [`ProcessSupervisor::release_port`], so
//! servers that have not bound their port yet never share it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use fleet_core::ParticipantId;
use parking_lot::Mutex;

use crate::catalog::Catalog;
use crate::command::{build_command, CommandSpec, Placeholders};
use crate::config::NodeConfig;
use crate::port;
use crate::process::{LaunchRequest, LaunchedProcess, ProcessLauncher};
use crate::staging::FileStager;
use crate::template::ConfigurationTemplate;

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The process is running on `port`.
    Success {
        /// Port the server was told to bind.
        port: u16,
    },
    /// A process for this identity is already tracked.
    AlreadyRunning,
    /// The template names no version, or an unknown one.
    VersionUnresolved(Option<String>),
    /// The version names no runtime, or an unknown one.
    RuntimeUnresolved(Option<String>),
    /// The version names no type, or an unknown one.
    TypeUnresolved(Option<String>),
    /// The runtime has no installation on this node.
    RuntimeNotInstalled {
        /// Runtime id.
        runtime: String,
    },
    /// A stop was issued for this identity before the start finished.
    PreviouslyStopped,
    /// No usable port; for pinned templates the configured port is taken.
    PortUnavailable {
        /// First port tried.
        port: u16,
    },
    /// The working directory could not be staged.
    StagingFailed(String),
    /// The process could not be spawned.
    SpawnFailed(String),
}

impl StartOutcome {
    /// Whether a process is now running.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = |id: &Option<String>| id.clone().unwrap_or_else(|| "<none>".to_string());
        match self {
            Self::Success { port } => write!(f, "started on port {port}"),
            Self::AlreadyRunning => f.write_str("already running"),
            Self::VersionUnresolved(v) => write!(f, "unknown server version {}", id(v)),
            Self::RuntimeUnresolved(r) => write!(f, "unknown runtime {}", id(r)),
            Self::TypeUnresolved(t) => write!(f, "unknown version type {}", id(t)),
            Self::RuntimeNotInstalled { runtime } => {
                write!(f, "runtime {runtime} is not installed on this node")
            }
            Self::PreviouslyStopped => f.write_str("stopped before start completed"),
            Self::PortUnavailable { port } => write!(f, "port {port} is not available"),
            Self::StagingFailed(e) => write!(f, "staging failed: {e}"),
            Self::SpawnFailed(e) => write!(f, "spawn failed: {e}"),
        }
    }
}

/// A staged, fully resolved launch that has not been spawned yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedLaunch {
    /// What will be spawned.
    pub request: LaunchRequest,
    /// Port the server will bind.
    pub port: u16,
}

/// Resolves templates into launch commands and spawns them.
pub struct ProcessSupervisor {
    node_name: String,
    bind_host: String,
    cloud_path: PathBuf,
    library_folder: PathBuf,
    log_level: String,
    proxy_secret: String,
    catalog: Arc<Catalog>,
    launcher: Arc<dyn ProcessLauncher>,
    stager: Arc<dyn FileStager>,
    reserved_ports: Mutex<HashSet<u16>>,
}

impl ProcessSupervisor {
    /// Create a supervisor for the node described by `config`.
    #[must_use]
    pub fn new(
        config: &NodeConfig,
        catalog: Arc<Catalog>,
        launcher: Arc<dyn ProcessLauncher>,
        stager: Arc<dyn FileStager>,
    ) -> Self {
        Self {
            node_name: config.node_id().to_name(),
            bind_host: config.bind_host.clone(),
            cloud_path: config.cloud_path.clone(),
            library_folder: config.library_folder.clone(),
            log_level: config.log_level.clone(),
            proxy_secret: config.proxy_secret.clone(),
            catalog,
            launcher,
            stager,
            reserved_ports: Mutex::new(HashSet::new()),
        }
    }

    /// The catalog used to resolve templates.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The stager owning working directories.
    #[must_use]
    pub fn stager(&self) -> &dyn FileStager {
        self.stager.as_ref()
    }

    /// Resolve references, pick a port, stage the working directory and build
    /// the command.
    ///
    /// # Errors
    ///
    /// Returns the failing [`StartOutcome`]; nothing is staged in that case.
    pub async fn prepare(
        &self,
        template: &ConfigurationTemplate,
        id: &ParticipantId,
    ) -> Result<PreparedLaunch, StartOutcome> {
        let version_id = template
            .version_id
            .as_deref()
            .ok_or(StartOutcome::VersionUnresolved(None))?;
        let version = self
            .catalog
            .version(version_id)
            .ok_or_else(|| StartOutcome::VersionUnresolved(Some(version_id.to_string())))?;

        let runtime_id = version
            .runtime_id
            .as_deref()
            .ok_or(StartOutcome::RuntimeUnresolved(None))?;
        let runtime = self
            .catalog
            .runtime(runtime_id)
            .ok_or_else(|| StartOutcome::RuntimeUnresolved(Some(runtime_id.to_string())))?;

        let type_id = version
            .type_id
            .as_deref()
            .ok_or(StartOutcome::TypeUnresolved(None))?;
        let version_type = self
            .catalog
            .version_type(type_id)
            .ok_or_else(|| StartOutcome::TypeUnresolved(Some(type_id.to_string())))?;

        let runtime_path =
            runtime
                .path_on(&self.node_name)
                .ok_or_else(|| StartOutcome::RuntimeNotInstalled {
                    runtime: runtime.id.clone(),
                })?;

        let port = self
            .reserve_port(template)
            .ok_or(StartOutcome::PortUnavailable {
                port: template.start_port,
            })?;

        let working_dir = match self.stager.stage(id, template).await {
            Ok(dir) => dir,
            Err(e) => {
                self.release_port(port);
                return Err(StartOutcome::StagingFailed(e.to_string()));
            }
        };

        let executable = if version.executable.is_absolute() {
            version.executable.clone()
        } else {
            working_dir.join(&version.executable)
        };
        let placeholders = Placeholders {
            port,
            service_id: *id,
            hostname: self.bind_host.clone(),
            proxy_secret: self.proxy_secret.clone(),
        };
        let argv = build_command(&CommandSpec {
            template,
            runtime,
            runtime_path,
            version_type,
            executable: &executable,
            placeholders: &placeholders,
        });

        Ok(PreparedLaunch {
            request: LaunchRequest {
                id: *id,
                argv,
                working_dir,
                env: self.environment(template, id, port),
            },
            port,
        })
    }

    /// Spawn a prepared launch.
    ///
    /// # Errors
    ///
    /// Returns `StartOutcome::SpawnFailed` if the launcher fails.
    pub fn spawn(&self, prepared: &PreparedLaunch) -> Result<LaunchedProcess, StartOutcome> {
        self.launcher
            .launch(&prepared.request)
            .map_err(|e| StartOutcome::SpawnFailed(e.to_string()))
    }

    /// Remove the working directory of a launch that will not run and free
    /// its port.
    pub async fn discard(&self, prepared: &PreparedLaunch) {
        self.release_port(prepared.port);
        if let Err(e) = self.stager.cleanup(&prepared.request.working_dir).await {
            tracing::warn!(server = %prepared.request.id, error = %e, "Failed to remove working directory");
        }
    }

    /// Return a port handed out by [`prepare`](Self::prepare).
    pub fn release_port(&self, port: u16) {
        self.reserved_ports.lock().remove(&port);
    }

    /// Ports currently handed out, ascending.
    #[must_use]
    pub fn reserved_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.reserved_ports.lock().iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    fn reserve_port(&self, template: &ConfigurationTemplate) -> Option<u16> {
        let mut reserved = self.reserved_ports.lock();
        let port = port::find_free_port(
            &self.bind_host,
            template.start_port,
            template.static_port,
            &reserved,
        )?;
        reserved.insert(port);
        Some(port)
    }

    fn environment(
        &self,
        template: &ConfigurationTemplate,
        id: &ParticipantId,
        port: u16,
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::from([
            ("FLEET_SERVICE_ID".to_string(), id.to_name()),
            ("FLEET_PATH".to_string(), self.cloud_path.display().to_string()),
            ("FLEET_HOST".to_string(), self.bind_host.clone()),
            ("FLEET_PORT".to_string(), port.to_string()),
            ("FLEET_LOG_LEVEL".to_string(), self.log_level.clone()),
            (
                "LIBRARY_FOLDER".to_string(),
                self.library_folder.display().to_string(),
            ),
        ]);
        env.extend(
            template
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env
    }
}
