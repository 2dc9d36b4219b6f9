//! Session file discovery under the base path.
//!
//! Session files live at `<base>/projects/<project_slug>/<session>.jsonl`.
//! The project slug is an opaque directory name. Files whose stem begins
//! with `agent-` are sidechain transcripts belonging to a peer session.

use std::path::{Path, PathBuf};

/// A discovered session file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub project_slug: String,
    /// Filename stem: the session id for main files, `agent-<id>` for
    /// sidechains.
    pub stem: String,
    pub is_agent_file: bool,
}

impl DiscoveredFile {
    /// Classify a path under a project directory, if it is a session file.
    #[must_use]
    pub fn classify(path: &Path) -> Option<Self> {
        if path.extension().is_none_or(|ext| ext != "jsonl") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?.to_string();
        let project_slug = path.parent()?.file_name()?.to_str()?.to_string();
        let is_agent_file = stem.starts_with("agent-");
        Some(Self {
            path: path.to_path_buf(),
            project_slug,
            stem,
            is_agent_file,
        })
    }
}

/// Scan `projects/*/*.jsonl` under the base path.
///
/// A missing projects directory yields an empty list; per-directory read
/// failures are logged and skipped.
#[must_use]
pub fn scan_projects(projects_path: &Path) -> Vec<DiscoveredFile> {
    let mut found = Vec::new();

    let Ok(entries) = std::fs::read_dir(projects_path) else {
        tracing::debug!(path = %projects_path.display(), "Projects path not readable");
        return found;
    };

    for entry in entries.filter_map(Result::ok) {
        let project_dir = entry.path();
        if !project_dir.is_dir() {
            continue;
        }

        let Ok(files) = std::fs::read_dir(&project_dir) else {
            tracing::warn!(path = %project_dir.display(), "Cannot read project directory");
            continue;
        };

        for file in files.filter_map(Result::ok) {
            if let Some(discovered) = DiscoveredFile::classify(&file.path()) {
                found.push(discovered);
            }
        }
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_main_file() {
        let file = DiscoveredFile::classify(Path::new("/base/projects/my-proj/abc-123.jsonl"))
            .unwrap();
        assert_eq!(file.project_slug, "my-proj");
        assert_eq!(file.stem, "abc-123");
        assert!(!file.is_agent_file);
    }

    #[test]
    fn test_classify_agent_file() {
        let file = DiscoveredFile::classify(Path::new("/base/projects/p/agent-ab12.jsonl"))
            .unwrap();
        assert_eq!(file.stem, "agent-ab12");
        assert!(file.is_agent_file);
    }

    #[test]
    fn test_classify_rejects_non_jsonl() {
        assert!(DiscoveredFile::classify(Path::new("/base/projects/p/notes.txt")).is_none());
        assert!(DiscoveredFile::classify(Path::new("/base/projects/p/plain")).is_none());
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        assert!(scan_projects(Path::new("/tmp/no-such-dir-98765")).is_empty());
    }

    #[test]
    fn test_scan_finds_session_files() {
        let base = TempDir::new().unwrap();
        let proj_a = base.path().join("proj-a");
        let proj_b = base.path().join("proj-b");
        std::fs::create_dir_all(&proj_a).unwrap();
        std::fs::create_dir_all(&proj_b).unwrap();
        std::fs::write(proj_a.join("s1.jsonl"), "").unwrap();
        std::fs::write(proj_a.join("agent-x1.jsonl"), "").unwrap();
        std::fs::write(proj_a.join("readme.md"), "").unwrap();
        std::fs::write(proj_b.join("s2.jsonl"), "").unwrap();

        let found = scan_projects(base.path());
        assert_eq!(found.len(), 3);
        assert_eq!(found.iter().filter(|f| f.is_agent_file).count(), 1);

        let slugs: Vec<&str> = found.iter().map(|f| f.project_slug.as_str()).collect();
        assert!(slugs.contains(&"proj-a"));
        assert!(slugs.contains(&"proj-b"));
    }
}
