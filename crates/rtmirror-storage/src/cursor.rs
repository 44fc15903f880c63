//! Cursor persistence
//!
//! The cursor is the key of the last replicated record, stored as plain
//! text in a single file. Saves go through a temporary sibling file that is
//! synced and renamed over the target, so a crash right after `save`
//! returns leaves either the old or the new value, never a torn one.

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::error::StorageError;

/// Durable single-value store for the replication cursor
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    /// Create a cursor store backed by the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the cursor file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Durably overwrite the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written, synced, or
    /// renamed into place. The previous cursor is left untouched.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn save(&self, cursor: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .await?;
        file.write_all(cursor.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &self.path).await?;
        sync_parent_dir(&self.path).await;

        debug!(cursor, "Cursor saved");
        Ok(())
    }

    /// Read the cursor, distinguishing "never saved" from read failures
    pub async fn try_load(&self) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => {
                let cursor = content.trim();
                Ok((!cursor.is_empty()).then(|| cursor.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the cursor; any failure is treated as "never saved"
    pub async fn load(&self) -> Option<String> {
        match self.try_load().await {
            Ok(cursor) => {
                debug!(cursor = ?cursor, "Cursor loaded");
                cursor
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read cursor, starting from the beginning");
                None
            }
        }
    }
}

/// Make the rename itself durable where the platform allows it
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    if let Ok(dir) = fs::File::open(&parent).await
        && let Err(e) = dir.sync_all().await
    {
        debug!(error = %e, "Directory sync not supported");
    }
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) {}
