//! Configuration templates.
//!
//! A template describes how servers of one kind are launched: which version
//! they run, which port they bind, how much memory they get and which extra
//! arguments and environment entries they receive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Launch description shared by every server started from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationTemplate {
    /// Unique template name.
    pub name: String,
    /// Server version to run.
    #[serde(default)]
    pub version_id: Option<String>,
    /// First port to try, or the only port if `static_port` is set.
    pub start_port: u16,
    /// Pin the server to exactly `start_port`.
    #[serde(default)]
    pub static_port: bool,
    /// Heap size in megabytes, used for both the initial and maximum heap.
    pub max_memory_mb: u32,
    /// Extra interpreter arguments, placeholder-substituted.
    #[serde(default)]
    pub runtime_args: Vec<String>,
    /// Extra program arguments, placeholder-substituted.
    #[serde(default)]
    pub program_args: Vec<String>,
    /// Extra environment entries for the process.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Delete the server record once the server has stopped.
    #[serde(default = "default_unregister")]
    pub unregister_after_disconnect: bool,
}

const fn default_unregister() -> bool {
    true
}

impl ConfigurationTemplate {
    /// Create a template with default memory and no extras.
    #[must_use]
    pub fn new(name: impl Into<String>, version_id: impl Into<String>, start_port: u16) -> Self {
        Self {
            name: name.into(),
            version_id: Some(version_id.into()),
            start_port,
            static_port: false,
            max_memory_mb: 1024,
            runtime_args: Vec::new(),
            program_args: Vec::new(),
            environment: BTreeMap::new(),
            unregister_after_disconnect: true,
        }
    }

    /// Pin the template to its start port.
    #[must_use]
    pub const fn pinned(mut self) -> Self {
        self.static_port = true;
        self
    }
}
