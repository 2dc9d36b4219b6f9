//! Parsed message model and tool categorization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Map a tool name to its category.
///
/// The mapping is case-sensitive; unknown names fall into `other`.
#[must_use]
pub fn tool_category(name: &str) -> &'static str {
    match name {
        "Bash" | "KillShell" => "bash",
        "Read" => "file_read",
        "Write" | "Edit" | "NotebookEdit" => "file_write",
        "Glob" | "Grep" => "search",
        "Task" | "TaskOutput" => "agent",
        "TodoWrite" | "EnterPlanMode" | "ExitPlanMode" => "planning",
        "WebFetch" | "WebSearch" => "web",
        "AskUserQuestion" => "interaction",
        _ => "other",
    }
}

/// Tool invocation by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolUseBlock {
    /// Category for this tool (`bash`, `file_read`, ...).
    #[must_use]
    pub fn category(&self) -> &'static str {
        tool_category(&self.name)
    }
}

/// Tool result returned to the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// A content block within a parsed message.
///
/// Unknown wire block types are dropped during parsing and never appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub is_sidechain: bool,
    pub model: Option<String>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
}

impl Message {
    /// All text blocks concatenated with newlines.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All tool use blocks in this message.
    #[must_use]
    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// All tool result blocks in this message.
    #[must_use]
    pub fn tool_results(&self) -> Vec<&ToolResultBlock> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse(_)))
    }
}
