//! Incremental entry-to-event translation.
//!
//! Turns one JSONL entry into zero or more events. The parser is stateless
//! across entries; tool pairing lives in the live session tracker.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::events::{
    truncate_string, truncate_tool_input, ErrorEvent, MessageEvent, SessionEvent, ToolResultEvent,
    ToolUseEvent,
};
use crate::model::{
    tool_category, ContentBlock, Message, MessageRole, RawBlock, RawContent, RawEntry,
    ToolResultBlock, ToolUseBlock,
};

/// Cap applied to `raw_entry` payloads attached to error events.
const MAX_RAW_ENTRY_LEN: usize = 1024;

/// Parses individual JSONL entries into session events.
#[derive(Debug, Clone)]
pub struct IncrementalParser {
    truncate_inputs: bool,
    max_input_length: usize,
}

impl Default for IncrementalParser {
    fn default() -> Self {
        Self {
            truncate_inputs: true,
            max_input_length: 1024,
        }
    }
}

impl IncrementalParser {
    #[must_use]
    pub fn new(truncate_inputs: bool, max_input_length: usize) -> Self {
        Self {
            truncate_inputs,
            max_input_length,
        }
    }

    /// Parse one decoded JSON entry into events.
    ///
    /// A single entry may produce a `message` event plus one `tool_use` or
    /// `tool_result` event per content block. Schema violations produce a
    /// single `error` event instead.
    ///
    /// `default_agent_id` supplies the agent id for sidechain files whose
    /// later entries omit it.
    #[must_use]
    pub fn parse_value(&self, value: &Value, default_agent_id: Option<&str>) -> Vec<SessionEvent> {
        let raw: RawEntry = match serde_json::from_value(value.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                return vec![self.schema_error(value, format!("Invalid entry: {e}"))];
            }
        };

        if raw.entry_type != "user" && raw.entry_type != "assistant" {
            return vec![self.schema_error(
                value,
                format!("Unknown entry type: {:?}", raw.entry_type),
            )];
        }

        let timestamp = match DateTime::parse_from_rfc3339(&raw.timestamp) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                return vec![self.schema_error(
                    value,
                    format!("Invalid timestamp {:?}: {e}", raw.timestamp),
                )];
            }
        };

        let agent_id = raw
            .agent_id
            .clone()
            .or_else(|| default_agent_id.map(String::from));
        if raw.is_sidechain && agent_id.is_none() {
            return vec![self.schema_error(value, "Sidechain entry without agentId".to_string())];
        }

        let Some(raw_message) = raw.message else {
            return vec![self.schema_error(value, "Entry has no message object".to_string())];
        };

        let role = match raw_message.role.as_str() {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            other => {
                return vec![
                    self.schema_error(value, format!("Unknown message role: {other:?}"))
                ];
            }
        };

        let content = self.parse_content(&raw_message.content);

        let message = Message {
            uuid: raw.uuid,
            parent_uuid: raw.parent_uuid,
            timestamp,
            role,
            content,
            session_id: raw.session_id.clone(),
            agent_id: agent_id.clone(),
            is_sidechain: raw.is_sidechain,
            model: raw_message.model,
            cwd: raw.cwd,
            git_branch: raw.git_branch,
        };

        let mut events = vec![SessionEvent::Message(MessageEvent {
            timestamp,
            session_id: raw.session_id.clone(),
            agent_id: agent_id.clone(),
            message: message.clone(),
        })];

        for block in &message.content {
            match block {
                ContentBlock::ToolUse(tool_use) => {
                    let tool_input = if self.truncate_inputs {
                        truncate_tool_input(&tool_use.input, self.max_input_length)
                    } else {
                        tool_use.input.clone()
                    };
                    events.push(SessionEvent::ToolUse(ToolUseEvent {
                        timestamp,
                        session_id: raw.session_id.clone(),
                        agent_id: agent_id.clone(),
                        tool_name: tool_use.name.clone(),
                        tool_category: tool_category(&tool_use.name),
                        tool_input,
                        tool_use_id: tool_use.id.clone(),
                        message: message.clone(),
                    }));
                }
                ContentBlock::ToolResult(result) => {
                    events.push(SessionEvent::ToolResult(ToolResultEvent {
                        timestamp,
                        session_id: raw.session_id.clone(),
                        agent_id: agent_id.clone(),
                        tool_use_id: result.tool_use_id.clone(),
                        content: result.content.clone(),
                        is_error: result.is_error,
                        message: message.clone(),
                    }));
                }
                ContentBlock::Text { .. } => {}
            }
        }

        events
    }

    /// Produce the error event for a raw line that failed JSON decoding.
    #[must_use]
    pub fn malformed_line_error(&self, line: &str) -> SessionEvent {
        SessionEvent::Error(ErrorEvent {
            timestamp: Utc::now(),
            session_id: String::new(),
            agent_id: None,
            error_message: "JSON parse error".to_string(),
            raw_entry: Some(truncate_string(line, MAX_RAW_ENTRY_LEN)),
        })
    }

    fn schema_error(&self, value: &Value, message: String) -> SessionEvent {
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let agent_id = value
            .get("agentId")
            .and_then(Value::as_str)
            .map(String::from);

        SessionEvent::Error(ErrorEvent {
            timestamp: Utc::now(),
            session_id,
            agent_id,
            error_message: message,
            raw_entry: Some(truncate_string(&value.to_string(), MAX_RAW_ENTRY_LEN)),
        })
    }

    fn parse_content(&self, content: &RawContent) -> Vec<ContentBlock> {
        match content {
            RawContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            RawContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| self.parse_block(b))
                .collect(),
        }
    }

    fn parse_block(&self, block: &RawBlock) -> Option<ContentBlock> {
        match block {
            RawBlock::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
            RawBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse(ToolUseBlock {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            })),
            RawBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let text = coerce_result_content(content);
                let text = if self.truncate_inputs {
                    truncate_string(&text, self.max_input_length)
                } else {
                    text
                };
                Some(ContentBlock::ToolResult(ToolResultBlock {
                    tool_use_id: tool_use_id.clone(),
                    content: text,
                    is_error: *is_error,
                }))
            }
            RawBlock::Unknown => None,
        }
    }
}

/// Coerce tool result content to a string.
///
/// The wire form is either a plain string or a list of text parts, whose
/// `text` fields are concatenated.
fn coerce_result_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use serde_json::json;

    fn parser() -> IncrementalParser {
        IncrementalParser::default()
    }

    fn user_entry(uuid: &str, content: Value) -> Value {
        json!({
            "uuid": uuid,
            "parentUuid": null,
            "timestamp": "2025-01-05T20:19:25.839Z",
            "type": "user",
            "sessionId": "s",
            "isSidechain": false,
            "message": {"role": "user", "content": content},
        })
    }

    fn assistant_entry(uuid: &str, content: Value) -> Value {
        json!({
            "uuid": uuid,
            "parentUuid": null,
            "timestamp": "2025-01-05T20:19:26.000Z",
            "type": "assistant",
            "sessionId": "s",
            "message": {"role": "assistant", "model": "m1", "content": content},
        })
    }

    #[test]
    fn test_simple_message() {
        let entry = user_entry("u1", json!([{"type": "text", "text": "hi"}]));
        let events = parser().parse_value(&entry, None);

        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Message(e) => {
                assert_eq!(e.message.uuid, "u1");
                assert_eq!(e.message.role, MessageRole::User);
                assert_eq!(e.message.text_content(), "hi");
                assert_eq!(e.session_id, "s");
            }
            _ => panic!("expected message event"),
        }
    }

    #[test]
    fn test_string_content_becomes_text_block() {
        let entry = user_entry("u1", json!("plain text"));
        let events = parser().parse_value(&entry, None);

        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Message(e) => assert_eq!(e.message.text_content(), "plain text"),
            _ => panic!("expected message event"),
        }
    }

    #[test]
    fn test_tool_use_emits_two_events() {
        let entry = assistant_entry(
            "a1",
            json!([{"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}}]),
        );
        let events = parser().parse_value(&entry, None);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), EventType::Message);
        match &events[1] {
            SessionEvent::ToolUse(e) => {
                assert_eq!(e.tool_name, "Bash");
                assert_eq!(e.tool_category, "bash");
                assert_eq!(e.tool_use_id, "t1");
                assert_eq!(e.tool_input["command"], "ls");
            }
            _ => panic!("expected tool_use event"),
        }
    }

    #[test]
    fn test_tool_result_event() {
        let entry = user_entry(
            "u2",
            json!([{"type": "tool_result", "tool_use_id": "t1", "content": "file.txt", "is_error": false}]),
        );
        let events = parser().parse_value(&entry, None);

        assert_eq!(events.len(), 2);
        match &events[1] {
            SessionEvent::ToolResult(e) => {
                assert_eq!(e.tool_use_id, "t1");
                assert_eq!(e.content, "file.txt");
                assert!(!e.is_error);
            }
            _ => panic!("expected tool_result event"),
        }
    }

    #[test]
    fn test_tool_result_list_content_joined() {
        let entry = user_entry(
            "u2",
            json!([{
                "type": "tool_result",
                "tool_use_id": "t1",
                "content": [{"type": "text", "text": "part1"}, {"type": "text", "text": "part2"}],
            }]),
        );
        let events = parser().parse_value(&entry, None);

        match &events[1] {
            SessionEvent::ToolResult(e) => assert_eq!(e.content, "part1\npart2"),
            _ => panic!("expected tool_result event"),
        }
    }

    #[test]
    fn test_oversized_input_truncated() {
        let long = "x".repeat(5000);
        let entry = assistant_entry(
            "a1",
            json!([{"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": long}}]),
        );
        let events = IncrementalParser::new(true, 1024).parse_value(&entry, None);

        match &events[1] {
            SessionEvent::ToolUse(e) => {
                let command = e.tool_input["command"].as_str().unwrap();
                assert!(command.ends_with("…[truncated 5000 bytes]"));
                assert!(command.len() <= 1024 + "…[truncated 5000 bytes]".len());
            }
            _ => panic!("expected tool_use event"),
        }
    }

    #[test]
    fn test_truncation_disabled() {
        let long = "x".repeat(5000);
        let entry = assistant_entry(
            "a1",
            json!([{"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": long}}]),
        );
        let events = IncrementalParser::new(false, 1024).parse_value(&entry, None);

        match &events[1] {
            SessionEvent::ToolUse(e) => {
                assert_eq!(e.tool_input["command"].as_str().unwrap().len(), 5000);
            }
            _ => panic!("expected tool_use event"),
        }
    }

    #[test]
    fn test_unknown_entry_type_is_error() {
        let entry = json!({
            "uuid": "u1",
            "timestamp": "2025-01-05T20:19:25Z",
            "type": "summary",
            "sessionId": "s",
            "message": {"role": "user", "content": []},
        });
        let events = parser().parse_value(&entry, None);

        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Error(e) => {
                assert!(e.error_message.contains("Unknown entry type"));
                assert_eq!(e.session_id, "s");
            }
            _ => panic!("expected error event"),
        }
    }

    #[test]
    fn test_missing_required_field_is_error() {
        let entry = json!({
            "timestamp": "2025-01-05T20:19:25Z",
            "type": "user",
            "sessionId": "s",
            "message": {"role": "user", "content": []},
        });
        let events = parser().parse_value(&entry, None);

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Error(_)));
    }

    #[test]
    fn test_bad_timestamp_is_error() {
        let mut entry = user_entry("u1", json!([]));
        entry["timestamp"] = json!("not a timestamp");
        let events = parser().parse_value(&entry, None);

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Error(_)));
    }

    #[test]
    fn test_sidechain_without_agent_id_is_error() {
        let mut entry = user_entry("u1", json!([]));
        entry["isSidechain"] = json!(true);
        let events = parser().parse_value(&entry, None);

        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Error(e) => assert!(e.error_message.contains("Sidechain")),
            _ => panic!("expected error event"),
        }
    }

    #[test]
    fn test_sidechain_uses_default_agent_id() {
        let mut entry = user_entry("u1", json!([]));
        entry["isSidechain"] = json!(true);
        let events = parser().parse_value(&entry, Some("agent-ab12"));

        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Message(e) => {
                assert_eq!(e.agent_id.as_deref(), Some("agent-ab12"));
                assert!(e.message.is_sidechain);
            }
            _ => panic!("expected message event"),
        }
    }

    #[test]
    fn test_entry_agent_id_wins_over_default() {
        let mut entry = user_entry("u1", json!([]));
        entry["isSidechain"] = json!(true);
        entry["agentId"] = json!("agent-own");
        let events = parser().parse_value(&entry, Some("agent-other"));

        match &events[0] {
            SessionEvent::Message(e) => assert_eq!(e.agent_id.as_deref(), Some("agent-own")),
            _ => panic!("expected message event"),
        }
    }

    #[test]
    fn test_unknown_block_ignored_others_processed() {
        let entry = assistant_entry(
            "a1",
            json!([
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "done"},
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {}},
            ]),
        );
        let events = parser().parse_value(&entry, None);

        assert_eq!(events.len(), 2);
        match &events[0] {
            SessionEvent::Message(e) => {
                assert_eq!(e.message.content.len(), 2);
                assert_eq!(e.message.text_content(), "done");
            }
            _ => panic!("expected message event"),
        }
    }

    #[test]
    fn test_malformed_line_error() {
        let event = parser().malformed_line_error("not json{");
        match event {
            SessionEvent::Error(e) => {
                assert_eq!(e.raw_entry.as_deref(), Some("not json{"));
                assert!(e.error_message.contains("JSON parse error"));
            }
            _ => panic!("expected error event"),
        }
    }
}
