//! Filesystem-backed artifact store
//!
//! Artifacts are files under the target directory whose extension is in the
//! configured set. Hidden directories and `__pycache__` are never listed.

use async_trait::async_trait;
use refix_core::{RefixError, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::collaborators::ArtifactStore;

/// Directory names skipped while listing
const SKIPPED_DIRS: &[&str] = &["__pycache__", "node_modules", "venv"];

/// Artifact store rooted at a target directory
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .collect(),
        }
    }

    /// Store that lists `.py` files
    pub fn python(root: impl Into<PathBuf>) -> Self {
        Self::new(root, vec!["py".to_string()])
    }

    fn is_artifact(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|wanted| wanted == ext))
            .unwrap_or(false)
    }

    fn artifact_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }
}

/// Reject absolute names and any `..` component
pub fn validate_artifact_name(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);

    if name.is_empty() {
        return Err(RefixError::PathTraversal("empty artifact name".to_string()));
    }

    if path.is_absolute() {
        return Err(RefixError::PathTraversal(format!(
            "absolute paths not allowed: {}",
            name
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RefixError::PathTraversal(name.to_string()));
            }
            _ => {}
        }
    }

    Ok(path.to_path_buf())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                let file_type = entry.file_type().await?;

                if file_type.is_dir() {
                    if file_name.starts_with('.') || SKIPPED_DIRS.contains(&file_name.as_ref()) {
                        continue;
                    }
                    pending.push(path);
                } else if file_type.is_file() && self.is_artifact(&path) {
                    if let Some(name) = self.artifact_name(&path) {
                        names.push(name);
                    }
                }
            }
        }

        names.sort();
        debug!("Listed {} artifacts under {}", names.len(), self.root.display());
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<String> {
        let path = self.resolve(name)?;
        Ok(fs::read_to_string(path).await?)
    }

    async fn write(&self, name: &str, content: &str) -> Result<()> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> bool {
        match self.resolve(name) {
            Ok(path) => fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = validate_artifact_name(name)?;
        Ok(self.root.join(relative))
    }
}
