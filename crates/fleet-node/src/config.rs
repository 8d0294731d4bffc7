//! Node daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

use fleet_core::ParticipantId;

/// Timing of the graceful stop protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTiming {
    /// How long to wait for a shutdown acknowledgement.
    pub ack_timeout: Duration,
    /// Interval between polls of the `connected` flag after an acknowledgement.
    pub poll_interval: Duration,
    /// Ceiling on polling before the process is stopped manually.
    pub stop_timeout: Duration,
}

impl Default for StopTiming {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(4),
            poll_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(20),
        }
    }
}

/// Configuration for a node daemon.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Index of this node; its bus identity is `node-{index}`.
    pub node_index: u32,
    /// Host servers bind to and that `%HOSTNAME%` expands to.
    pub bind_host: String,
    /// Address of the health endpoints.
    pub listen_addr: String,
    /// `RocksDB` data directory.
    pub data_dir: PathBuf,
    /// Root under which working directories are staged.
    pub work_root: PathBuf,
    /// Installation path handed to servers.
    pub cloud_path: PathBuf,
    /// Shared library folder handed to servers.
    pub library_folder: PathBuf,
    /// Log level handed to servers.
    pub log_level: String,
    /// Cluster secret that `%PROXY_SECRET%` expands to.
    pub proxy_secret: String,
    /// Stop protocol timing.
    pub stop: StopTiming,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_index: 1,
            bind_host: "127.0.0.1".to_string(),
            listen_addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("/data"),
            work_root: PathBuf::from("/data/work"),
            cloud_path: PathBuf::from("/opt/fleet"),
            library_folder: PathBuf::from("/opt/fleet/lib"),
            log_level: "info".to_string(),
            proxy_secret: String::new(),
            stop: StopTiming::default(),
        }
    }
}

impl NodeConfig {
    /// The bus identity of this node.
    #[must_use]
    pub const fn node_id(&self) -> ParticipantId {
        ParticipantId::node(self.node_index)
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `FLEET_NODE_INDEX`: Index of this node
    /// - `FLEET_BIND_HOST`: Host servers bind to
    /// - `LISTEN_ADDR`: Address of the health endpoints
    /// - `DATA_DIR`: `RocksDB` data directory
    /// - `FLEET_WORK_ROOT`: Root of staged working directories
    /// - `FLEET_PATH`: Installation path
    /// - `FLEET_LIBRARY_FOLDER`: Shared library folder
    /// - `FLEET_LOG_LEVEL`: Log level handed to servers
    /// - `FLEET_PROXY_SECRET`: Cluster proxy secret
    /// - `FLEET_ACK_TIMEOUT`: Shutdown acknowledgement timeout in seconds
    /// - `FLEET_POLL_INTERVAL_MS`: Disconnect poll interval in milliseconds
    /// - `FLEET_SERVER_STOP_TIMEOUT`: Disconnect poll ceiling in seconds
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FLEET_NODE_INDEX") {
            if let Ok(n) = val.parse() {
                config.node_index = n;
            }
        }
        if let Ok(val) = std::env::var("FLEET_BIND_HOST") {
            config.bind_host = val;
        }
        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("DATA_DIR") {
            config.work_root = PathBuf::from(&val).join("work");
            config.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FLEET_WORK_ROOT") {
            config.work_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FLEET_PATH") {
            config.library_folder = PathBuf::from(&val).join("lib");
            config.cloud_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FLEET_LIBRARY_FOLDER") {
            config.library_folder = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FLEET_LOG_LEVEL") {
            config.log_level = val;
        }
        if let Ok(val) = std::env::var("FLEET_PROXY_SECRET") {
            config.proxy_secret = val;
        }
        if let Ok(val) = std::env::var("FLEET_ACK_TIMEOUT") {
            if let Ok(n) = val.parse() {
                config.stop.ack_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(val) = std::env::var("FLEET_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.stop.poll_interval = Duration::from_millis(n);
            }
        }
        if let Ok(val) = std::env::var("FLEET_SERVER_STOP_TIMEOUT") {
            if let Ok(n) = val.parse() {
                config.stop.stop_timeout = Duration::from_secs(n);
            }
        }

        config
    }
}
