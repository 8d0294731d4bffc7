//! Version, runtime and template catalog.
//!
//! The catalog is built once at bootstrap (usually from a JSON file) and
//! shared read-only with the supervisor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::template::ConfigurationTemplate;

/// A runnable server version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    /// Unique version id.
    pub id: String,
    /// Runtime the version needs.
    #[serde(default)]
    pub runtime_id: Option<String>,
    /// Version type supplying extra arguments.
    #[serde(default)]
    pub type_id: Option<String>,
    /// Executable archive; relative paths resolve against the working directory.
    pub executable: PathBuf,
}

/// An interpreter runtime and where it is installed on each node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    /// Unique runtime id.
    pub id: String,
    /// Major version, gates the compatibility flags.
    pub major: u32,
    /// Interpreter path keyed by node name.
    #[serde(default)]
    pub located: HashMap<String, PathBuf>,
}

impl Runtime {
    /// The interpreter path on `node`, if installed there.
    #[must_use]
    pub fn path_on(&self, node: &str) -> Option<&Path> {
        self.located
            .get(node)
            .map(PathBuf::as_path)
            .filter(|p| !p.as_os_str().is_empty())
    }
}

/// A family of versions sharing launch arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionType {
    /// Unique type id.
    pub id: String,
    /// Interpreter arguments, placeholder-substituted.
    #[serde(default)]
    pub runtime_args: Vec<String>,
    /// Program arguments, placeholder-substituted.
    #[serde(default)]
    pub program_args: Vec<String>,
}

/// Lookup tables for everything a start needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    versions: HashMap<String, ServerVersion>,
    #[serde(default)]
    runtimes: HashMap<String, Runtime>,
    #[serde(default)]
    types: HashMap<String, VersionType>,
    #[serde(default)]
    templates: HashMap<String, ConfigurationTemplate>,
}

impl Catalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data)
            .map_err(|e| NodeError::Config(format!("invalid catalog {}: {e}", path.display())))
    }

    /// Add or replace a server version.
    pub fn add_version(&mut self, version: ServerVersion) -> &mut Self {
        self.versions.insert(version.id.clone(), version);
        self
    }

    /// Add or replace a runtime.
    pub fn add_runtime(&mut self, runtime: Runtime) -> &mut Self {
        self.runtimes.insert(runtime.id.clone(), runtime);
        self
    }

    /// Add or replace a version type.
    pub fn add_type(&mut self, version_type: VersionType) -> &mut Self {
        self.types.insert(version_type.id.clone(), version_type);
        self
    }

    /// Add or replace a template.
    pub fn add_template(&mut self, template: ConfigurationTemplate) -> &mut Self {
        self.templates.insert(template.name.clone(), template);
        self
    }

    /// Look up a server version.
    #[must_use]
    pub fn version(&self, id: &str) -> Option<&ServerVersion> {
        self.versions.get(id)
    }

    /// Look up a runtime.
    #[must_use]
    pub fn runtime(&self, id: &str) -> Option<&Runtime> {
        self.runtimes.get(id)
    }

    /// Look up a version type.
    #[must_use]
    pub fn version_type(&self, id: &str) -> Option<&VersionType> {
        self.types.get(id)
    }

    /// Look up a template.
    #[must_use]
    pub fn template(&self, name: &str) -> Option<&ConfigurationTemplate> {
        self.templates.get(name)
    }
}
