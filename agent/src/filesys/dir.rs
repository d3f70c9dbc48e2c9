//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), AgentError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), AgentError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List subdirectories
    pub async fn list_dirs(&self) -> Result<Vec<PathBuf>, AgentError> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }

        dirs.sort();
        Ok(dirs)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Copy every file below this directory into `dest`, overwriting
    /// files that exist in both. Files present only in `dest` are kept.
    ///
    /// Returns the number of files copied.
    pub async fn copy_into(&self, dest: &Path) -> Result<usize, AgentError> {
        let mut copied = 0;
        let mut pending = vec![(self.path.clone(), dest.to_path_buf())];

        while let Some((src_dir, dest_dir)) = pending.pop() {
            fs::create_dir_all(&dest_dir).await?;
            let mut entries = fs::read_dir(&src_dir).await?;

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let target = dest_dir.join(entry.file_name());

                if file_type.is_dir() {
                    pending.push((entry.path(), target));
                } else if file_type.is_file() {
                    fs::copy(entry.path(), &target).await?;
                    copied += 1;
                } else {
                    debug!("Skipping non-regular entry {:?}", entry.path());
                }
            }
        }

        Ok(copied)
    }

    /// Create a uniquely named scratch directory under `parent`
    pub async fn create_scratch(parent: &Path, prefix: &str) -> Result<Dir, AgentError> {
        let dir = Dir::new(parent.join(format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())));
        dir.create().await?;
        Ok(dir)
    }
}
