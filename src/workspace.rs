//! Workspace implementations.
//!
//! - [`FsWorkspace`] reads and writes real files under a root directory
//! - [`MemoryWorkspace`] keeps files in memory and records every write,
//!   which makes it the fixture of choice for dry-run and isolation tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::traits::{Workspace, WorkspaceError};

/// Lexically normalizes a relative path: drops `.` components and resolves
/// `..` against preceding components. Leading `..` are kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

// ============================================================================
// Filesystem workspace
// ============================================================================

#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(normalize_path(path))
    }
}

#[async_trait]
impl Workspace for FsWorkspace {
    async fn read_file(&self, path: &Path) -> Result<String, WorkspaceError> {
        let full = self.resolve(path);
        debug!(path = %full.display(), "Reading file");
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| WorkspaceError::from_io(path, e))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), WorkspaceError> {
        let full = self.resolve(path);
        debug!(path = %full.display(), bytes = contents.len(), "Writing file");
        tokio::fs::write(&full, contents)
            .await
            .map_err(|e| WorkspaceError::from_io(path, e))
    }
}

// ============================================================================
// In-memory workspace
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    files: Mutex<HashMap<PathBuf, String>>,
    writes: Mutex<Vec<PathBuf>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper for seeding fixtures.
    pub fn with_file(self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&self, path: impl AsRef<Path>, contents: impl Into<String>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(normalize_path(path.as_ref()), contents.into());
        }
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        let files = self.files.lock().ok()?;
        files.get(&normalize_path(path.as_ref())).cloned()
    }

    /// Paths passed to `write_file`, in call order.
    pub fn writes(&self) -> Vec<PathBuf> {
        self.writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

fn lock_poisoned(path: &Path) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::Other, "workspace lock poisoned"),
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    async fn read_file(&self, path: &Path) -> Result<String, WorkspaceError> {
        self.contents(path)
            .ok_or_else(|| WorkspaceError::NotFound(path.to_path_buf()))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), WorkspaceError> {
        let key = normalize_path(path);
        self.writes
            .lock()
            .map_err(|_| lock_poisoned(path))?
            .push(key.clone());
        self.files
            .lock()
            .map_err(|_| lock_poisoned(path))?
            .insert(key, contents.to_string());
        Ok(())
    }
}
