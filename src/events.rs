//! Event types emitted by the realtime pipeline.
//!
//! All events are immutable records sharing a common envelope (timestamp,
//! session id, event type, optional agent id). [`SessionEvent::to_json`]
//! produces the serialization used by webhooks and the JSON formatter.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::time::Duration;

use crate::model::{Message, ToolCall};

/// Tag identifying an event variant, used for handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Message,
    ToolUse,
    ToolResult,
    ToolCallCompleted,
    Error,
    SessionStart,
    SessionIdle,
    SessionResume,
    SessionEnd,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Message => "message",
            EventType::ToolUse => "tool_use",
            EventType::ToolResult => "tool_result",
            EventType::ToolCallCompleted => "tool_call_completed",
            EventType::Error => "error",
            EventType::SessionStart => "session_start",
            EventType::SessionIdle => "session_idle",
            EventType::SessionResume => "session_resume",
            EventType::SessionEnd => "session_end",
        }
    }

    /// Parse a tag name as used on the CLI and in filters.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(EventType::Message),
            "tool_use" => Some(EventType::ToolUse),
            "tool_result" => Some(EventType::ToolResult),
            "tool_call_completed" => Some(EventType::ToolCallCompleted),
            "error" => Some(EventType::Error),
            "session_start" => Some(EventType::SessionStart),
            "session_idle" => Some(EventType::SessionIdle),
            "session_resume" => Some(EventType::SessionResume),
            "session_end" => Some(EventType::SessionEnd),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    IdleTimeout,
    FileGone,
    Shutdown,
}

impl EndReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::IdleTimeout => "idle_timeout",
            EndReason::FileGone => "file_gone",
            EndReason::Shutdown => "shutdown",
        }
    }
}

/// Emitted for every parsed message.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub message: Message,
}

/// Emitted when the assistant invokes a tool.
#[derive(Debug, Clone)]
pub struct ToolUseEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub tool_name: String,
    pub tool_category: &'static str,
    pub tool_input: Value,
    pub tool_use_id: String,
    pub message: Message,
}

/// Emitted when a tool result arrives.
#[derive(Debug, Clone)]
pub struct ToolResultEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
    pub message: Message,
}

/// Emitted once a tool use has been paired with its result.
#[derive(Debug, Clone)]
pub struct ToolCallCompletedEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub tool_call: ToolCall,
    pub tool_name: String,
    pub is_error: bool,
    pub duration: Duration,
}

/// Emitted for parse failures, schema violations, and handler errors.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub error_message: String,
    pub raw_entry: Option<String>,
}

/// Emitted when a new session file starts being tracked.
#[derive(Debug, Clone)]
pub struct SessionStartEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub project_slug: String,
    pub file_path: std::path::PathBuf,
    pub cwd: Option<String>,
}

/// Emitted when a session passes the idle timeout.
#[derive(Debug, Clone)]
pub struct SessionIdleEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub idle_since: DateTime<Utc>,
}

/// Emitted when an idle session sees new activity.
#[derive(Debug, Clone)]
pub struct SessionResumeEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub idle_duration: Duration,
}

/// Emitted when a session ends.
#[derive(Debug, Clone)]
pub struct SessionEndEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub reason: EndReason,
    pub idle_duration: Option<Duration>,
    pub message_count: u64,
    pub tool_count: u64,
}

/// Any event produced by the pipeline.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Message(MessageEvent),
    ToolUse(ToolUseEvent),
    ToolResult(ToolResultEvent),
    ToolCallCompleted(ToolCallCompletedEvent),
    Error(ErrorEvent),
    SessionStart(SessionStartEvent),
    SessionIdle(SessionIdleEvent),
    SessionResume(SessionResumeEvent),
    SessionEnd(SessionEndEvent),
}

impl SessionEvent {
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            SessionEvent::Message(_) => EventType::Message,
            SessionEvent::ToolUse(_) => EventType::ToolUse,
            SessionEvent::ToolResult(_) => EventType::ToolResult,
            SessionEvent::ToolCallCompleted(_) => EventType::ToolCallCompleted,
            SessionEvent::Error(_) => EventType::Error,
            SessionEvent::SessionStart(_) => EventType::SessionStart,
            SessionEvent::SessionIdle(_) => EventType::SessionIdle,
            SessionEvent::SessionResume(_) => EventType::SessionResume,
            SessionEvent::SessionEnd(_) => EventType::SessionEnd,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::Message(e) => e.timestamp,
            SessionEvent::ToolUse(e) => e.timestamp,
            SessionEvent::ToolResult(e) => e.timestamp,
            SessionEvent::ToolCallCompleted(e) => e.timestamp,
            SessionEvent::Error(e) => e.timestamp,
            SessionEvent::SessionStart(e) => e.timestamp,
            SessionEvent::SessionIdle(e) => e.timestamp,
            SessionEvent::SessionResume(e) => e.timestamp,
            SessionEvent::SessionEnd(e) => e.timestamp,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Message(e) => &e.session_id,
            SessionEvent::ToolUse(e) => &e.session_id,
            SessionEvent::ToolResult(e) => &e.session_id,
            SessionEvent::ToolCallCompleted(e) => &e.session_id,
            SessionEvent::Error(e) => &e.session_id,
            SessionEvent::SessionStart(e) => &e.session_id,
            SessionEvent::SessionIdle(e) => &e.session_id,
            SessionEvent::SessionResume(e) => &e.session_id,
            SessionEvent::SessionEnd(e) => &e.session_id,
        }
    }

    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            SessionEvent::Message(e) => e.agent_id.as_deref(),
            SessionEvent::ToolUse(e) => e.agent_id.as_deref(),
            SessionEvent::ToolResult(e) => e.agent_id.as_deref(),
            SessionEvent::ToolCallCompleted(e) => e.agent_id.as_deref(),
            SessionEvent::Error(e) => e.agent_id.as_deref(),
            _ => None,
        }
    }

    /// Serialize to the JSON envelope used by webhooks and the JSON formatter.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "event_type": self.event_type().as_str(),
            "timestamp": self.timestamp().to_rfc3339_opts(SecondsFormat::AutoSi, true),
            "session_id": self.session_id(),
            "agent_id": self.agent_id(),
        });
        let map = obj.as_object_mut().expect("envelope is an object");

        match self {
            SessionEvent::Message(e) => {
                let tool_uses: Vec<Value> = e
                    .message
                    .tool_uses()
                    .into_iter()
                    .map(|t| json!({"id": t.id, "name": t.name, "input": t.input}))
                    .collect();
                let tool_results: Vec<Value> = e
                    .message
                    .tool_results()
                    .into_iter()
                    .map(|r| {
                        json!({
                            "tool_use_id": r.tool_use_id,
                            "content": r.content,
                            "is_error": r.is_error,
                        })
                    })
                    .collect();
                map.insert(
                    "message".to_string(),
                    json!({
                        "uuid": e.message.uuid,
                        "parent_uuid": e.message.parent_uuid,
                        "role": e.message.role.as_str(),
                        "model": e.message.model,
                        "text": e.message.text_content(),
                        "tool_uses": tool_uses,
                        "tool_results": tool_results,
                        "cwd": e.message.cwd,
                        "git_branch": e.message.git_branch,
                    }),
                );
            }
            SessionEvent::ToolUse(e) => {
                map.insert("tool_name".to_string(), json!(e.tool_name));
                map.insert("tool_category".to_string(), json!(e.tool_category));
                map.insert("tool_input".to_string(), e.tool_input.clone());
                map.insert("tool_use_id".to_string(), json!(e.tool_use_id));
            }
            SessionEvent::ToolResult(e) => {
                map.insert("tool_use_id".to_string(), json!(e.tool_use_id));
                map.insert("content".to_string(), json!(e.content));
                map.insert("is_error".to_string(), json!(e.is_error));
            }
            SessionEvent::ToolCallCompleted(e) => {
                map.insert("tool_name".to_string(), json!(e.tool_name));
                map.insert("is_error".to_string(), json!(e.is_error));
                map.insert(
                    "duration_seconds".to_string(),
                    json!(e.duration.as_secs_f64()),
                );
            }
            SessionEvent::Error(e) => {
                map.insert("error_message".to_string(), json!(e.error_message));
                map.insert("raw_entry".to_string(), json!(e.raw_entry));
            }
            SessionEvent::SessionStart(e) => {
                map.insert("project_slug".to_string(), json!(e.project_slug));
                map.insert(
                    "file_path".to_string(),
                    json!(e.file_path.display().to_string()),
                );
                map.insert("cwd".to_string(), json!(e.cwd));
            }
            SessionEvent::SessionIdle(e) => {
                map.insert(
                    "idle_since".to_string(),
                    json!(e.idle_since.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                );
            }
            SessionEvent::SessionResume(e) => {
                map.insert(
                    "idle_duration".to_string(),
                    json!(e.idle_duration.as_secs_f64()),
                );
            }
            SessionEvent::SessionEnd(e) => {
                map.insert("reason".to_string(), json!(e.reason.as_str()));
                map.insert(
                    "idle_duration".to_string(),
                    json!(e.idle_duration.map(|d| d.as_secs_f64())),
                );
                map.insert("message_count".to_string(), json!(e.message_count));
                map.insert("tool_count".to_string(), json!(e.tool_count));
            }
        }

        obj
    }
}

/// Truncate string values inside a tool input, recursively.
///
/// Strings longer than `max_len` bytes are replaced by a head prefix plus a
/// marker naming the original size. The original value is not retained.
#[must_use]
pub fn truncate_tool_input(input: &Value, max_len: usize) -> Value {
    match input {
        Value::String(s) => Value::String(truncate_string(s, max_len)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_tool_input(v, max_len)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| truncate_tool_input(v, max_len))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Truncate a single string to `max_len` bytes plus a size marker.
#[must_use]
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    // Cut on a char boundary at or below max_len.
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated {} bytes]", &s[..end], s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentBlock, MessageRole};
    use chrono::TimeZone;

    fn test_message() -> Message {
        Message {
            uuid: "u1".to_string(),
            parent_uuid: None,
            timestamp: Utc.timestamp_opt(1_736_108_365, 839_000_000).unwrap(),
            role: MessageRole::User,
            content: vec![ContentBlock::Text {
                text: "hi".to_string(),
            }],
            session_id: "s".to_string(),
            agent_id: None,
            is_sidechain: false,
            model: None,
            cwd: Some("/tmp".to_string()),
            git_branch: None,
        }
    }

    #[test]
    fn test_event_type_round_trip() {
        for ty in [
            EventType::Message,
            EventType::ToolUse,
            EventType::ToolResult,
            EventType::ToolCallCompleted,
            EventType::Error,
            EventType::SessionStart,
            EventType::SessionIdle,
            EventType::SessionResume,
            EventType::SessionEnd,
        ] {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(EventType::parse("bogus"), None);
    }

    #[test]
    fn test_message_event_json() {
        let msg = test_message();
        let event = SessionEvent::Message(MessageEvent {
            timestamp: msg.timestamp,
            session_id: "s".to_string(),
            agent_id: None,
            message: msg,
        });

        let value = event.to_json();
        assert_eq!(value["event_type"], "message");
        assert_eq!(value["session_id"], "s");
        assert!(value["agent_id"].is_null());
        assert_eq!(value["message"]["uuid"], "u1");
        assert_eq!(value["message"]["role"], "user");
        assert_eq!(value["message"]["text"], "hi");
        assert_eq!(value["message"]["cwd"], "/tmp");
    }

    #[test]
    fn test_tool_use_event_json() {
        let event = SessionEvent::ToolUse(ToolUseEvent {
            timestamp: Utc::now(),
            session_id: "s".to_string(),
            agent_id: Some("agent-ab12".to_string()),
            tool_name: "Bash".to_string(),
            tool_category: "bash",
            tool_input: json!({"command": "ls"}),
            tool_use_id: "t1".to_string(),
            message: test_message(),
        });

        let value = event.to_json();
        assert_eq!(value["event_type"], "tool_use");
        assert_eq!(value["tool_name"], "Bash");
        assert_eq!(value["tool_category"], "bash");
        assert_eq!(value["tool_input"]["command"], "ls");
        assert_eq!(value["agent_id"], "agent-ab12");
    }

    #[test]
    fn test_session_end_event_json() {
        let event = SessionEvent::SessionEnd(SessionEndEvent {
            timestamp: Utc::now(),
            session_id: "s".to_string(),
            reason: EndReason::IdleTimeout,
            idle_duration: Some(Duration::from_secs(300)),
            message_count: 12,
            tool_count: 4,
        });

        let value = event.to_json();
        assert_eq!(value["reason"], "idle_timeout");
        assert_eq!(value["idle_duration"], 300.0);
        assert_eq!(value["message_count"], 12);
        assert_eq!(value["tool_count"], 4);
    }

    #[test]
    fn test_truncate_string_marker() {
        let long = "x".repeat(5000);
        let out = truncate_string(&long, 1024);
        assert!(out.ends_with("…[truncated 5000 bytes]"));
        assert!(out.len() <= 1024 + "…[truncated 5000 bytes]".len());
    }

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(truncate_string("short", 1024), "short");
    }

    #[test]
    fn test_truncate_tool_input_recursive() {
        let input = json!({
            "command": "y".repeat(2000),
            "nested": {"content": "z".repeat(2000)},
            "items": ["w".repeat(2000), 42],
            "count": 7,
        });

        let out = truncate_tool_input(&input, 100);
        let command = out["command"].as_str().unwrap();
        assert!(command.ends_with("…[truncated 2000 bytes]"));
        assert!(out["nested"]["content"]
            .as_str()
            .unwrap()
            .contains("truncated"));
        assert!(out["items"][0].as_str().unwrap().contains("truncated"));
        assert_eq!(out["items"][1], 42);
        assert_eq!(out["count"], 7);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "é".repeat(100); // 2 bytes per char
        let out = truncate_string(&s, 33);
        assert!(out.contains("…[truncated 200 bytes]"));
    }
}
