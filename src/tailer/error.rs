//! Tailer error types.

use std::path::PathBuf;

/// Errors that can occur while tailing a file.
#[derive(thiserror::Error, Debug)]
pub enum TailerError {
    /// Tailed file was deleted or never existed.
    #[error("Tailed file gone: {0}")]
    FileGone(PathBuf),

    /// Permission denied accessing the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
