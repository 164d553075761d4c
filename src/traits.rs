use crate::model::{EntityToFix, FixHandlerResultByPlugin};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum PomError {
    #[error("Failed to parse pom.xml: {0}")]
    Malformed(String),
    #[error("pom.xml has no <project> root element")]
    MissingProject,
}

#[derive(Error, Debug)]
pub enum FixError {
    #[error("Provided scan type is not supported: {0}")]
    UnsupportedType(String),
    #[error("No remediation data available")]
    MissingRemediationData,
    #[error("Target file is missing")]
    MissingFileName,
    #[error("Invalid remediation data: {0}")]
    InvalidRemediation(String),
    #[error("No fixes could be applied")]
    NoFixesCouldBeApplied,
    #[error("Could not find dependency {0}")]
    DependencyNotFound(String),
    #[error(transparent)]
    Pom(#[from] PomError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("{0}")]
    HandlerFailed(String),
}

/// Read/write access to the files of one scanned project.
///
/// Paths are relative to the workspace root. The engine never opens files on
/// its own; everything goes through this capability.
#[async_trait]
pub trait Workspace: Send + Sync + std::fmt::Debug {
    async fn read_file(&self, path: &Path) -> Result<String, WorkspaceError>;

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), WorkspaceError>;
}

/// A fix plugin for one family of scan types.
#[async_trait]
pub trait FixHandler: Send + Sync {
    /// Plugin name used to key results (e.g. "python", "maven").
    fn plugin_id(&self) -> &str;

    /// Fixes a group of entities.
    ///
    /// Per-entity problems are reported inside the returned lists. An `Err`
    /// means the whole group could not be processed.
    async fn fix(
        &self,
        entities: Vec<Arc<EntityToFix>>,
    ) -> Result<FixHandlerResultByPlugin, FixError>;
}
