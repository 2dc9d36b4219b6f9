//! Incremental JSONL file tailer.
//!
//! Reads new entries from a JSONL file as they are appended, buffering
//! partial lines and detecting rotation via file identity.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::state::FilePosition;

use super::error::TailerError;

/// Maximum bytes read from one file per poll, so a single busy file cannot
/// starve the others.
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Cap on the error backoff, expressed as a multiple of the base interval.
const MAX_BACKOFF_MULTIPLIER: u32 = 16;

/// `(device, inode)` identity of a file, used to detect rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
}

#[cfg(unix)]
fn identity_of(metadata: &std::fs::Metadata) -> FileIdentity {
    use std::os::unix::fs::MetadataExt;
    FileIdentity {
        device: metadata.dev(),
        inode: metadata.ino(),
    }
}

#[cfg(not(unix))]
fn identity_of(_metadata: &std::fs::Metadata) -> FileIdentity {
    FileIdentity::default()
}

/// One line yielded by the tailer.
///
/// Lines that fail JSON decoding are yielded as [`TailedLine::Malformed`]
/// so the caller can surface an error event and continue.
#[derive(Debug, Clone)]
pub enum TailedLine {
    Entry(serde_json::Value),
    Malformed(String),
}

/// Incremental JSONL reader that tracks a resumable byte position.
///
/// The checkpointed offset always points just past the last complete line;
/// bytes of a partial trailing line are buffered in memory and are not part
/// of the checkpoint until the line completes.
#[derive(Debug)]
pub struct JsonlTailer {
    path: PathBuf,
    /// Offset of the first byte not yet consumed as a complete line.
    offset: u64,
    identity: FileIdentity,
    partial: Vec<u8>,
    /// Error backoff state; reading is skipped until the deadline passes.
    backoff_base: Duration,
    error_streak: u32,
    backoff_until: Option<Instant>,
}

impl JsonlTailer {
    /// Open a tailer at offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed.
    pub fn open(path: impl Into<PathBuf>, backoff_base: Duration) -> Result<Self, TailerError> {
        let path = path.into();
        let identity = Self::stat_identity(&path)?.0;
        Ok(Self {
            path,
            offset: 0,
            identity,
            partial: Vec::new(),
            backoff_base,
            error_streak: 0,
            backoff_until: None,
        })
    }

    /// Open a tailer at the current end of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed.
    pub fn open_at_end(path: impl Into<PathBuf>, backoff_base: Duration) -> Result<Self, TailerError> {
        let path = path.into();
        let (identity, size) = Self::stat_identity(&path)?;
        Ok(Self {
            path,
            offset: size,
            identity,
            partial: Vec::new(),
            backoff_base,
            error_streak: 0,
            backoff_until: None,
        })
    }

    /// Open a tailer, resuming from a saved position when the file identity
    /// still matches; otherwise starts at offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed.
    pub fn open_resumed(
        path: impl Into<PathBuf>,
        position: &FilePosition,
        backoff_base: Duration,
    ) -> Result<Self, TailerError> {
        let path = path.into();
        let (identity, size) = Self::stat_identity(&path)?;

        let offset = if identity.device == position.device
            && identity.inode == position.inode
            && position.offset <= size
        {
            position.offset
        } else {
            tracing::debug!(
                path = %path.display(),
                "Saved position does not match current file, starting fresh"
            );
            0
        };

        Ok(Self {
            path,
            offset,
            identity,
            partial: Vec::new(),
            backoff_base,
            error_streak: 0,
            backoff_until: None,
        })
    }

    fn stat_identity(path: &Path) -> Result<(FileIdentity, u64), TailerError> {
        let metadata = std::fs::metadata(path).map_err(|e| Self::map_io_error(path, e))?;
        Ok((identity_of(&metadata), metadata.len()))
    }

    fn map_io_error(path: &Path, e: std::io::Error) -> TailerError {
        match e.kind() {
            std::io::ErrorKind::NotFound => TailerError::FileGone(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => TailerError::PermissionDenied(path.to_path_buf()),
            _ => TailerError::Io(e),
        }
    }

    /// Current checkpointed byte offset.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Path being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file identity.
    #[must_use]
    pub fn identity(&self) -> FileIdentity {
        self.identity
    }

    /// Whether a partial line is buffered.
    #[must_use]
    pub fn has_pending_data(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Snapshot the resumable position of this tailer.
    #[must_use]
    pub fn position(&self) -> FilePosition {
        let last_modified_ns = std::fs::metadata(&self.path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));

        FilePosition {
            path: self.path.display().to_string(),
            device: self.identity.device,
            inode: self.identity.inode,
            offset: self.offset,
            last_modified_ns,
        }
    }

    /// Read any new complete lines since the last call.
    ///
    /// Re-stats the file first: an identity change or a size below the
    /// current offset is treated as rotation, resetting the position to 0.
    /// Calls while a previous error's backoff window is open return nothing.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is gone, unreadable, or an I/O error
    /// occurs; the internal backoff advances so the next poll retries later.
    pub async fn read_new(&mut self) -> Result<Vec<TailedLine>, TailerError> {
        if let Some(until) = self.backoff_until {
            if Instant::now() < until {
                return Ok(Vec::new());
            }
        }

        match self.read_new_inner().await {
            Ok(lines) => {
                self.error_streak = 0;
                self.backoff_until = None;
                Ok(lines)
            }
            Err(e) => {
                let multiplier = 1u32
                    .checked_shl(self.error_streak)
                    .unwrap_or(MAX_BACKOFF_MULTIPLIER)
                    .min(MAX_BACKOFF_MULTIPLIER);
                self.backoff_until = Some(Instant::now() + self.backoff_base * multiplier);
                self.error_streak = self.error_streak.saturating_add(1);
                Err(e)
            }
        }
    }

    async fn read_new_inner(&mut self) -> Result<Vec<TailedLine>, TailerError> {
        let (identity, size) = Self::stat_identity(&self.path)?;

        if identity != self.identity || size < self.offset {
            tracing::debug!(
                path = %self.path.display(),
                old_offset = self.offset,
                new_size = size,
                "File rotated or truncated, re-reading from start"
            );
            self.offset = 0;
            self.partial.clear();
            self.identity = identity;
        }

        let read_from = self.offset + self.partial.len() as u64;
        if size <= read_from {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| Self::map_io_error(&self.path, e))?;
        file.seek(SeekFrom::Start(read_from)).await?;

        let want = (size - read_from).min(MAX_READ_BYTES);
        let mut buf = vec![0u8; usize::try_from(want).unwrap_or(usize::MAX)];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        self.partial.extend_from_slice(&buf);

        let mut lines = Vec::new();
        while let Some(newline) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=newline).collect();
            self.offset += line.len() as u64;

            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(value) => lines.push(TailedLine::Entry(value)),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Malformed JSONL line"
                    );
                    lines.push(TailedLine::Malformed(trimmed.to_string()));
                }
            }
        }

        Ok(lines)
    }

    /// Reset to the beginning of the file.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }
}
