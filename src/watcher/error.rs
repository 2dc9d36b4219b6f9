//! Watcher error types.

use std::path::PathBuf;

/// Errors that can occur while watching session directories.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// The projects directory cannot be read at startup.
    #[error("Cannot read projects directory {path}: {source}")]
    ProjectsUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Filesystem notification setup failed.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify_debouncer_full::notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State persistence failed.
    #[error("State persistence error: {0}")]
    State(#[from] crate::state::StateError),
}
