//! Tailing over a dynamic set of files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::error::TailerError;
use super::jsonl::{JsonlTailer, TailedLine};

/// Coordinates tailers over multiple files.
///
/// Within one poll cycle entries are ordered by `(path, file offset)`:
/// deterministic per file, stable across the set of paths known before the
/// cycle began.
#[derive(Debug, Default)]
pub struct MultiFileTailer {
    tailers: BTreeMap<PathBuf, JsonlTailer>,
}

impl MultiFileTailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tailer for a path. Adding an already-tracked path is a no-op.
    pub fn add(&mut self, path: PathBuf, tailer: JsonlTailer) {
        self.tailers.entry(path).or_insert(tailer);
    }

    /// Stop tailing a path, returning its tailer if it was tracked.
    pub fn remove(&mut self, path: &Path) -> Option<JsonlTailer> {
        self.tailers.remove(path)
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.tailers.contains_key(path)
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&JsonlTailer> {
        self.tailers.get(path)
    }

    /// Paths currently being tailed.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.tailers.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tailers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tailers.is_empty()
    }

    /// Iterate over all tailers, for position snapshotting.
    pub fn tailers(&self) -> impl Iterator<Item = (&PathBuf, &JsonlTailer)> {
        self.tailers.iter()
    }

    /// Read new lines from every tracked file.
    ///
    /// Per-file read failures are reported alongside the successful reads so
    /// one broken file does not block the rest.
    pub async fn poll(&mut self) -> (Vec<(PathBuf, TailedLine)>, Vec<(PathBuf, TailerError)>) {
        let mut lines = Vec::new();
        let mut errors = Vec::new();

        for (path, tailer) in &mut self.tailers {
            match tailer.read_new().await {
                Ok(new_lines) => {
                    lines.extend(new_lines.into_iter().map(|l| (path.clone(), l)));
                }
                Err(e) => errors.push((path.clone(), e)),
            }
        }

        (lines, errors)
    }
}
