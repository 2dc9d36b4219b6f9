//! Watcher configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::live::{LiveSessionConfig, RetentionPolicy};

/// Configuration for the session watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Base Claude directory; sessions live under `<base>/projects/`.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// How often the poll loop runs.
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub poll_interval: Duration,
    /// Inactivity before a session is considered idle.
    #[serde(default = "default_idle_timeout", with = "duration_secs")]
    pub idle_timeout: Duration,
    /// Idle time before a session is considered ended.
    #[serde(default = "default_end_timeout", with = "duration_secs")]
    pub end_timeout: Duration,
    /// Read pre-existing file content on startup instead of starting at EOF.
    #[serde(default = "default_true")]
    pub process_existing: bool,
    /// Emit session start/idle/resume/end events.
    #[serde(default = "default_true")]
    pub emit_session_events: bool,
    /// Truncate oversized tool inputs.
    #[serde(default = "default_true")]
    pub truncate_inputs: bool,
    /// Maximum length of tool input strings before truncation.
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
    /// Path for resumable tailer positions; `None` disables persistence.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// How often to auto-save state.
    #[serde(default = "default_save_interval", with = "duration_secs")]
    pub save_interval: Duration,
    /// Message retention for live sessions.
    #[serde(default)]
    pub retention_policy: RetentionPolicy,
    /// Per-thread message cap under the sliding retention policy.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Capacity of the async event stream queue.
    #[serde(default = "default_async_queue_capacity")]
    pub async_queue_capacity: usize,
}

fn default_base_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_end_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_save_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_max_input_length() -> usize {
    1024
}

fn default_max_messages() -> usize {
    1000
}

fn default_async_queue_capacity() -> usize {
    1024
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            poll_interval: default_poll_interval(),
            idle_timeout: default_idle_timeout(),
            end_timeout: default_end_timeout(),
            process_existing: true,
            emit_session_events: true,
            truncate_inputs: true,
            max_input_length: default_max_input_length(),
            state_file: None,
            save_interval: default_save_interval(),
            retention_policy: RetentionPolicy::Full,
            max_messages: default_max_messages(),
            async_queue_capacity: default_async_queue_capacity(),
        }
    }
}

impl WatcherConfig {
    /// Path to the projects directory under the base path.
    #[must_use]
    pub fn projects_path(&self) -> PathBuf {
        self.base_path.join("projects")
    }

    /// Live session configuration derived from the watcher options.
    #[must_use]
    pub fn live_config(&self) -> LiveSessionConfig {
        LiveSessionConfig {
            retention_policy: self.retention_policy,
            max_messages: self.max_messages,
            ..Default::default()
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatcherConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.end_timeout, Duration::from_secs(300));
        assert!(config.process_existing);
        assert!(config.emit_session_events);
        assert!(config.truncate_inputs);
        assert_eq!(config.max_input_length, 1024);
        assert!(config.state_file.is_none());
        assert_eq!(config.save_interval, Duration::from_secs(30));
        assert_eq!(config.async_queue_capacity, 1024);
        assert!(config.base_path.ends_with(".claude"));
    }

    #[test]
    fn test_projects_path() {
        let config = WatcherConfig {
            base_path: PathBuf::from("/data/claude"),
            ..Default::default()
        };
        assert_eq!(config.projects_path(), PathBuf::from("/data/claude/projects"));
    }

    #[test]
    fn test_serde_round_trip() {
        let config = WatcherConfig {
            poll_interval: Duration::from_millis(250),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: WatcherConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.poll_interval, Duration::from_millis(250));
    }
}
