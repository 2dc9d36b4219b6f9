//! Output formatters for the CLI.

use crate::events::SessionEvent;

/// How events are rendered on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Format one event as a single output line.
#[must_use]
pub fn format_event(event: &SessionEvent, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format_text(event),
        OutputFormat::Json => event.to_json().to_string(),
    }
}

fn short(id: &str) -> &str {
    &id[..id.len().min(8)]
}

fn preview(text: &str, max_len: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() > max_len {
        let cut: String = flat.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        flat.to_string()
    }
}

fn format_text(event: &SessionEvent) -> String {
    let ts = event.timestamp().format("%H:%M:%S");
    let sid = short(event.session_id());
    let agent = event
        .agent_id()
        .map(|a| format!("[{}] ", short(a)))
        .unwrap_or_default();

    match event {
        SessionEvent::Message(e) => {
            let role = e.message.role.as_str().to_uppercase();
            format!(
                "[{ts}] [{sid}] {agent}{role}: {}",
                preview(&e.message.text_content(), 80)
            )
        }
        SessionEvent::ToolUse(e) => {
            format!(
                "[{ts}] [{sid}] {agent}-> {} ({})",
                e.tool_name, e.tool_category
            )
        }
        SessionEvent::ToolResult(e) => {
            if e.is_error {
                format!(
                    "[{ts}] [{sid}] {agent}   <- ERROR: {}",
                    preview(&e.content, 60)
                )
            } else {
                format!("[{ts}] [{sid}] {agent}   <- ok")
            }
        }
        SessionEvent::ToolCallCompleted(e) => {
            let status = if e.is_error { "ERROR" } else { "ok" };
            format!(
                "[{ts}] [{sid}] {agent}   [{} completed in {:.0}ms: {status}]",
                e.tool_name,
                e.duration.as_secs_f64() * 1000.0
            )
        }
        SessionEvent::Error(e) => {
            format!("[{ts}] [{sid}] {agent}ERROR: {}", e.error_message)
        }
        SessionEvent::SessionStart(e) => {
            format!(
                "[{ts}] [{sid}] SESSION STARTED (project: {})",
                e.project_slug
            )
        }
        SessionEvent::SessionIdle(_) => {
            format!("[{ts}] [{sid}] [session is now idle]")
        }
        SessionEvent::SessionResume(e) => {
            format!(
                "[{ts}] [{sid}] [session resumed after {:.0}s]",
                e.idle_duration.as_secs_f64()
            )
        }
        SessionEvent::SessionEnd(e) => {
            format!(
                "[{ts}] [{sid}] SESSION ENDED (reason: {}, messages: {}, tools: {})",
                e.reason.as_str(),
                e.message_count,
                e.tool_count
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EndReason, MessageEvent, SessionEndEvent, ToolUseEvent};
    use crate::model::{ContentBlock, Message, MessageRole};
    use chrono::Utc;

    fn message_event() -> SessionEvent {
        SessionEvent::Message(MessageEvent {
            timestamp: Utc::now(),
            session_id: "abcdef123456".to_string(),
            agent_id: None,
            message: Message {
                uuid: "u1".to_string(),
                parent_uuid: None,
                timestamp: Utc::now(),
                role: MessageRole::User,
                content: vec![ContentBlock::Text {
                    text: "help me\nplease".to_string(),
                }],
                session_id: "abcdef123456".to_string(),
                agent_id: None,
                is_sidechain: false,
                model: None,
                cwd: None,
                git_branch: None,
            },
        })
    }

    #[test]
    fn test_text_message_line() {
        let line = format_event(&message_event(), OutputFormat::Text);
        assert!(line.contains("[abcdef12]"));
        assert!(line.contains("USER: help me please"));
    }

    #[test]
    fn test_text_tool_use_line() {
        let event = SessionEvent::ToolUse(ToolUseEvent {
            timestamp: Utc::now(),
            session_id: "abcdef123456".to_string(),
            agent_id: Some("agent-xy".to_string()),
            tool_name: "Bash".to_string(),
            tool_category: "bash",
            tool_input: serde_json::json!({}),
            tool_use_id: "t1".to_string(),
            message: match message_event() {
                SessionEvent::Message(e) => e.message,
                _ => unreachable!(),
            },
        });
        let line = format_event(&event, OutputFormat::Text);
        assert!(line.contains("-> Bash (bash)"));
        assert!(line.contains("[agent-xy]"));
    }

    #[test]
    fn test_text_session_end_line() {
        let event = SessionEvent::SessionEnd(SessionEndEvent {
            timestamp: Utc::now(),
            session_id: "abcdef123456".to_string(),
            reason: EndReason::FileGone,
            idle_duration: None,
            message_count: 3,
            tool_count: 1,
        });
        let line = format_event(&event, OutputFormat::Text);
        assert!(line.contains("reason: file_gone"));
        assert!(line.contains("messages: 3"));
    }

    #[test]
    fn test_json_line_is_valid_json() {
        let line = format_event(&message_event(), OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event_type"], "message");
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(200);
        let out = preview(&long, 80);
        assert!(out.ends_with("..."));
        assert!(out.chars().count() <= 80);
    }
}
