//! Immutable session model produced by live-session snapshots.
//!
//! Mirrors the shape used by downstream analysis tooling: a `Session` holds a
//! main `Thread` plus sidechain `Agent`s, and `Thread` can pair its tool
//! calls after the fact.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{ContentBlock, Message, MessageRole, ToolResultBlock, ToolUseBlock};

/// A complete tool call: `tool_use` from the assistant paired with the
/// `tool_result` from the following user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_use: ToolUseBlock,
    pub tool_result: Option<ToolResultBlock>,
    pub request_message: Message,
    pub response_message: Option<Message>,
}

impl ToolCall {
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_use.name
    }

    #[must_use]
    pub fn tool_category(&self) -> &'static str {
        self.tool_use.category()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.tool_result.as_ref().is_some_and(|r| r.is_error)
    }

    /// A call is closed once its result has arrived.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tool_result.is_some()
    }

    /// Timestamp of the requesting message.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.request_message.timestamp
    }
}

/// A linear sequence of messages in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub messages: Vec<Message>,
}

impl Thread {
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// First message without a parent, falling back to the first message.
    #[must_use]
    pub fn root(&self) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.parent_uuid.is_none())
            .or_else(|| self.messages.first())
    }

    /// Pair tool uses with their results across the thread.
    ///
    /// Duplicate `tool_use_id`s keep the first occurrence. Unmatched uses
    /// yield open calls with no result.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        let mut calls = Vec::new();
        let mut pending: Vec<(ToolUseBlock, Message)> = Vec::new();
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for msg in &self.messages {
            for block in &msg.content {
                match block {
                    ContentBlock::ToolUse(use_block) if msg.role == MessageRole::Assistant => {
                        if seen.insert(use_block.id.as_str()) {
                            pending.push((use_block.clone(), msg.clone()));
                        }
                    }
                    ContentBlock::ToolResult(result) if msg.role == MessageRole::User => {
                        if let Some(pos) = pending
                            .iter()
                            .position(|(u, _)| u.id == result.tool_use_id)
                        {
                            let (tool_use, request) = pending.remove(pos);
                            calls.push(ToolCall {
                                tool_use,
                                tool_result: Some(result.clone()),
                                request_message: request,
                                response_message: Some(msg.clone()),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        for (tool_use, request) in pending {
            calls.push(ToolCall {
                tool_use,
                tool_result: None,
                request_message: request,
                response_message: None,
            });
        }

        calls.sort_by_key(ToolCall::timestamp);
        calls
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A sub-agent conversation spawned by the Task tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub session_id: String,
    pub thread: Thread,
}

impl Agent {
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.thread.len()
    }
}

/// An immutable snapshot of one session: main thread plus sidechains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub project_slug: String,
    pub main_thread: Thread,
    pub agents: HashMap<String, Agent>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
}

impl Session {
    /// All messages including sidechains, sorted by timestamp.
    #[must_use]
    pub fn all_messages(&self) -> Vec<&Message> {
        let mut msgs: Vec<&Message> = self.main_thread.messages.iter().collect();
        for agent in self.agents.values() {
            msgs.extend(agent.thread.messages.iter());
        }
        msgs.sort_by_key(|m| m.timestamp);
        msgs
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.main_thread.len() + self.agents.values().map(Agent::message_count).sum::<usize>()
    }

    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.all_messages().first().map(|m| m.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg_at(uuid: &str, secs: i64, role: MessageRole, content: Vec<ContentBlock>) -> Message {
        Message {
            uuid: uuid.to_string(),
            parent_uuid: None,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            role,
            content,
            session_id: "s1".to_string(),
            agent_id: None,
            is_sidechain: false,
            model: None,
            cwd: None,
            git_branch: None,
        }
    }

    fn use_block(id: &str, name: &str) -> ContentBlock {
        ContentBlock::ToolUse(ToolUseBlock {
            id: id.to_string(),
            name: name.to_string(),
            input: serde_json::json!({}),
        })
    }

    fn result_block(id: &str, is_error: bool) -> ContentBlock {
        ContentBlock::ToolResult(ToolResultBlock {
            tool_use_id: id.to_string(),
            content: "out".to_string(),
            is_error,
        })
    }

    #[test]
    fn test_thread_pairs_tool_calls() {
        let thread = Thread::new(vec![
            msg_at("a", 0, MessageRole::Assistant, vec![use_block("t1", "Bash")]),
            msg_at("b", 1, MessageRole::User, vec![result_block("t1", false)]),
        ]);

        let calls = thread.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name(), "Bash");
        assert!(calls[0].is_closed());
        assert!(!calls[0].is_error());
    }

    #[test]
    fn test_thread_keeps_unmatched_use_open() {
        let thread = Thread::new(vec![msg_at(
            "a",
            0,
            MessageRole::Assistant,
            vec![use_block("t1", "Read")],
        )]);

        let calls = thread.tool_calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].is_closed());
        assert!(calls[0].tool_result.is_none());
    }

    #[test]
    fn test_thread_dedupes_tool_use_ids() {
        let thread = Thread::new(vec![
            msg_at("a", 0, MessageRole::Assistant, vec![use_block("t1", "Bash")]),
            msg_at("b", 1, MessageRole::Assistant, vec![use_block("t1", "Read")]),
            msg_at("c", 2, MessageRole::User, vec![result_block("t1", false)]),
        ]);

        let calls = thread.tool_calls();
        assert_eq!(calls.len(), 1);
        // First occurrence wins
        assert_eq!(calls[0].tool_name(), "Bash");
    }

    #[test]
    fn test_thread_root() {
        let mut child = msg_at("b", 1, MessageRole::Assistant, vec![]);
        child.parent_uuid = Some("a".to_string());
        let thread = Thread::new(vec![child, msg_at("a", 0, MessageRole::User, vec![])]);

        assert_eq!(thread.root().unwrap().uuid, "a");
    }

    #[test]
    fn test_session_all_messages_sorted() {
        let mut agent_msg = msg_at("x", 5, MessageRole::User, vec![]);
        agent_msg.agent_id = Some("agent-1".to_string());
        agent_msg.is_sidechain = true;

        let mut agents = HashMap::new();
        agents.insert(
            "agent-1".to_string(),
            Agent {
                agent_id: "agent-1".to_string(),
                session_id: "s1".to_string(),
                thread: Thread::new(vec![agent_msg]),
            },
        );

        let session = Session {
            session_id: "s1".to_string(),
            project_slug: "p".to_string(),
            main_thread: Thread::new(vec![
                msg_at("a", 0, MessageRole::User, vec![]),
                msg_at("b", 10, MessageRole::Assistant, vec![]),
            ]),
            agents,
            cwd: None,
            git_branch: None,
        };

        let all = session.all_messages();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].uuid, "a");
        assert_eq!(all[1].uuid, "x");
        assert_eq!(all[2].uuid, "b");
        assert_eq!(session.message_count(), 3);
    }
}
