//! Local artifact repository: stores run artifacts as plain files under the
//! run's artifact directory.
//!
//! The metadata store records each run's `artifact_uri` but never touches
//! artifact bytes itself; this collaborator owns them.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::models::FileInfo;
use crate::storage;

pub struct LocalArtifactRepository {
    artifact_dir: PathBuf,
}

impl LocalArtifactRepository {
    /// `artifact_uri` may be a plain filesystem path or a `file:` URI.
    pub fn new(artifact_uri: &str) -> Self {
        let path = artifact_uri
            .strip_prefix("file://")
            .or_else(|| artifact_uri.strip_prefix("file:"))
            .unwrap_or(artifact_uri);
        Self {
            artifact_dir: PathBuf::from(path),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Resolve an optional destination path, validating it before any I/O.
    fn destination(&self, artifact_path: Option<&str>) -> Result<PathBuf> {
        match artifact_path {
            None => Ok(self.artifact_dir.clone()),
            Some(path) => {
                validate_artifact_path(path)?;
                Ok(self.artifact_dir.join(path))
            }
        }
    }

    /// Copy a single file into the repository under `artifact_path` (or the
    /// repository root).
    pub fn log_artifact(&self, local_file: &Path, artifact_path: Option<&str>) -> Result<()> {
        let dest_dir = self.destination(artifact_path)?;
        let name = local_file.file_name().ok_or_else(|| {
            StoreError::InvalidParameterValue(format!(
                "Invalid artifact source '{}': not a file",
                local_file.display()
            ))
        })?;
        storage::ensure_dir(&dest_dir)?;
        fs::copy(local_file, dest_dir.join(name))?;
        Ok(())
    }

    /// Recursively copy the contents of a local directory into the
    /// repository under `artifact_path` (or the repository root).
    pub fn log_artifacts(&self, local_dir: &Path, artifact_path: Option<&str>) -> Result<()> {
        let dest_dir = self.destination(artifact_path)?;
        copy_tree(local_dir, &dest_dir)
    }

    /// Non-recursive listing of the entries under `path`, sorted by path.
    /// Paths in the result are relative to the repository root; directories
    /// carry no size.
    pub fn list_artifacts(&self, path: Option<&str>) -> Result<Vec<FileInfo>> {
        let list_dir = self.destination(path)?;
        if !list_dir.is_dir() {
            return Ok(vec![]);
        }
        let mut infos = vec![];
        for entry in fs::read_dir(&list_dir)? {
            let entry = entry?;
            let entry_path = entry.path();
            let rel = entry_path
                .strip_prefix(&self.artifact_dir)
                .unwrap_or(&entry_path)
                .to_string_lossy()
                .into_owned();
            let meta = entry.metadata()?;
            infos.push(FileInfo {
                path: rel,
                is_dir: meta.is_dir(),
                file_size: if meta.is_dir() { None } else { Some(meta.len()) },
            });
        }
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }

    /// Resolve an artifact to a local path. The repository is local, so no
    /// bytes move; the caller reads the file in place.
    pub fn fetch(&self, remote_path: &str) -> Result<PathBuf> {
        validate_artifact_path(remote_path)?;
        let local = self.artifact_dir.join(remote_path);
        if !local.exists() {
            return Err(StoreError::ResourceDoesNotExist(format!(
                "Artifact '{remote_path}' not found"
            )));
        }
        Ok(local)
    }
}

/// Destination paths must stay inside the repository: relative, no `..`, and
/// not collapsing to the root itself.
fn validate_artifact_path(path: &str) -> Result<()> {
    storage::validate_relative_path(path).map_err(|reason| {
        StoreError::InvalidParameterValue(format!("Invalid artifact path '{path}': {reason}"))
    })
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    storage::ensure_dir(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
