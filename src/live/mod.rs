//! In-memory live session tracking with bounded retention.

mod manager;
mod session;

use serde::{Deserialize, Serialize};

pub use manager::LiveSessionManager;
pub use session::{LiveOutcome, LiveSession};

/// Memory management strategy for live session history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep all messages.
    #[default]
    Full,
    /// Keep only the last `max_messages` per thread.
    Sliding,
    /// Keep only counters and pending tool calls.
    None,
}

/// Configuration for live session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSessionConfig {
    #[serde(default)]
    pub retention_policy: RetentionPolicy,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Orphan tool results retained past this bound discard the oldest.
    #[serde(default = "default_max_orphan_results")]
    pub max_orphan_results: usize,
}

fn default_max_messages() -> usize {
    1000
}

fn default_max_orphan_results() -> usize {
    1024
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            retention_policy: RetentionPolicy::Full,
            max_messages: default_max_messages(),
            max_orphan_results: default_max_orphan_results(),
        }
    }
}

/// Errors from live session operations.
#[derive(thiserror::Error, Debug)]
pub enum LiveSessionError {
    /// The retention policy stores no messages to snapshot.
    #[error("Cannot snapshot a session with the none retention policy")]
    NoRetainedMessages,

    /// No session with the requested id is tracked.
    #[error("Unknown session")]
    UnknownSession,
}
