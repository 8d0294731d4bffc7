//! Working directory staging.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_core::ParticipantId;

use crate::error::{NodeError, Result};
use crate::template::ConfigurationTemplate;

/// Prepares and removes the working directories of server processes.
#[async_trait]
pub trait FileStager: Send + Sync {
    /// Prepare the working directory for a server and return its path.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Staging` if the directory cannot be prepared.
    async fn stage(&self, id: &ParticipantId, template: &ConfigurationTemplate) -> Result<PathBuf>;

    /// Recursively remove a working directory.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Staging` if the directory cannot be removed.
    async fn cleanup(&self, working_dir: &Path) -> Result<()>;
}

/// Stages each server into `<root>/<identity>`.
#[derive(Debug, Clone)]
pub struct DirectoryStager {
    root: PathBuf,
}

impl DirectoryStager {
    /// Create a stager rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory a server is staged into.
    #[must_use]
    pub fn directory_for(&self, id: &ParticipantId) -> PathBuf {
        self.root.join(id.to_name())
    }
}

#[async_trait]
impl FileStager for DirectoryStager {
    async fn stage(&self, id: &ParticipantId, template: &ConfigurationTemplate) -> Result<PathBuf> {
        let path = self.directory_for(id);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| NodeError::Staging {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(server = %id, template = %template.name, path = %path.display(), "Staged working directory");
        Ok(path)
    }

    async fn cleanup(&self, working_dir: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(working_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(NodeError::Staging {
                path: working_dir.to_path_buf(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stages_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let stager = DirectoryStager::new(root.path());
        let template = ConfigurationTemplate::new("lobby", "paper", 25565);
        let id = ParticipantId::server(7);

        let dir = stager.stage(&id, &template).await.unwrap();
        assert_eq!(dir, root.path().join("server-7"));
        assert!(dir.is_dir());

        std::fs::write(dir.join("server.properties"), "motd=hi").unwrap();
        stager.cleanup(&dir).await.unwrap();
        assert!(!dir.exists());

        // Removing again is not an error
        stager.cleanup(&dir).await.unwrap();
    }
}
