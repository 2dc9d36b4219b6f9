//! Persistence of tailer positions for resumable watching.
//!
//! A single JSON state file stores one position per watched file, keyed by
//! path and gated on `(device, inode)` identity at load time. Writes are
//! atomic: the state is written to a temporary sibling, fsynced, then
//! renamed over the target.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Current state file format version.
const STATE_VERSION: u32 = 1;

/// Errors from saving state. Loading never fails: corrupt or missing files
/// start fresh.
#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A resumable position in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePosition {
    pub path: String,
    pub device: u64,
    pub inode: u64,
    pub offset: u64,
    pub last_modified_ns: u64,
}

/// Persistent watcher state: all tailer positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherState {
    pub version: u32,
    pub positions: Vec<FilePosition>,
}

impl Default for WatcherState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            positions: Vec::new(),
        }
    }
}

impl WatcherState {
    #[must_use]
    pub fn new(positions: Vec<FilePosition>) -> Self {
        Self {
            version: STATE_VERSION,
            positions,
        }
    }

    /// Look up the saved position for a path.
    #[must_use]
    pub fn position_for(&self, path: &Path) -> Option<&FilePosition> {
        let wanted = path.display().to_string();
        self.positions.iter().find(|p| p.path == wanted)
    }

    /// Positions indexed by path.
    #[must_use]
    pub fn by_path(&self) -> HashMap<String, &FilePosition> {
        self.positions.iter().map(|p| (p.path.clone(), p)).collect()
    }

    /// Drop positions for files that no longer exist.
    pub fn prune_missing(&mut self) -> usize {
        let before = self.positions.len();
        self.positions.retain(|p| Path::new(&p.path).exists());
        let removed = before - self.positions.len();
        if removed > 0 {
            tracing::debug!(removed, "Pruned stale position entries");
        }
        removed
    }

    /// Load state from a JSON file.
    ///
    /// A missing, corrupt, or newer-versioned file yields empty state; the
    /// problem is logged once and watching starts fresh.
    #[must_use]
    pub async fn load(path: &Path) -> Self {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No state file, starting fresh");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read state file, starting fresh");
                return Self::default();
            }
        };

        match serde_json::from_slice::<WatcherState>(&data) {
            Ok(state) if state.version <= STATE_VERSION => {
                tracing::debug!(
                    path = %path.display(),
                    positions = state.positions.len(),
                    "Loaded watcher state"
                );
                state
            }
            Ok(state) => {
                tracing::warn!(
                    version = state.version,
                    supported = STATE_VERSION,
                    "State file version too new, starting fresh"
                );
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt state file, starting fresh");
                Self::default()
            }
        }
    }

    /// Save state atomically: write to `<path>.tmp`, fsync, rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or renamed.
    pub async fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = tmp_sibling(path);
        let data = serde_json::to_vec_pretty(self)?;

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, path).await?;
        tracing::debug!(path = %path.display(), positions = self.positions.len(), "Saved watcher state");
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("state"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}
