//! Mutable per-session state accumulation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::events::SessionEvent;
use crate::model::{
    Agent, Message, Session, Thread, ToolCall, ToolResultBlock, ToolUseBlock,
};

use super::{LiveSessionConfig, LiveSessionError, RetentionPolicy};

/// Outcome of feeding one event into a live session.
#[derive(Debug, Clone)]
pub enum LiveOutcome {
    /// Nothing pairing-related happened.
    None,
    /// A tool result matched a pending use; the call is now closed.
    Completed { tool_call: ToolCall, duration: Duration },
    /// The event reused an already-seen `tool_use_id`; state was not touched.
    DuplicateToolUse { tool_use_id: String },
}

/// Mutable representation of an in-progress session.
///
/// Accumulates messages and pairs tool calls as events arrive. Snapshot to
/// an immutable [`Session`] with [`LiveSession::to_session`].
#[derive(Debug)]
pub struct LiveSession {
    pub session_id: String,
    pub project_slug: String,
    config: LiveSessionConfig,

    main_messages: Vec<Message>,
    agent_messages: HashMap<String, Vec<Message>>,

    pending_tool_calls: HashMap<String, (ToolUseBlock, Message)>,
    seen_tool_use_ids: HashSet<String>,
    closed_tool_calls: Vec<ToolCall>,
    orphan_results: VecDeque<ToolResultBlock>,

    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_idle: bool,

    pub cwd: Option<String>,
    pub git_branch: Option<String>,

    message_count: u64,
    tool_call_count: u64,
}

impl LiveSession {
    #[must_use]
    pub fn new(session_id: String, project_slug: String, config: LiveSessionConfig) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            project_slug,
            config,
            main_messages: Vec::new(),
            agent_messages: HashMap::new(),
            pending_tool_calls: HashMap::new(),
            seen_tool_use_ids: HashSet::new(),
            closed_tool_calls: Vec::new(),
            orphan_results: VecDeque::new(),
            start_time: now,
            last_activity: now,
            is_idle: false,
            cwd: None,
            git_branch: None,
            message_count: 0,
            tool_call_count: 0,
        }
    }

    /// Feed one event into the session state.
    pub fn handle_event(&mut self, event: &SessionEvent) -> LiveOutcome {
        self.last_activity = Utc::now();
        self.is_idle = false;

        match event {
            SessionEvent::Message(e) => {
                self.handle_message(&e.message);
                LiveOutcome::None
            }
            SessionEvent::ToolUse(e) => {
                if self.seen_tool_use_ids.contains(&e.tool_use_id) {
                    return LiveOutcome::DuplicateToolUse {
                        tool_use_id: e.tool_use_id.clone(),
                    };
                }
                self.seen_tool_use_ids.insert(e.tool_use_id.clone());
                self.tool_call_count += 1;
                self.pending_tool_calls.insert(
                    e.tool_use_id.clone(),
                    (
                        ToolUseBlock {
                            id: e.tool_use_id.clone(),
                            name: e.tool_name.clone(),
                            input: e.tool_input.clone(),
                        },
                        e.message.clone(),
                    ),
                );
                LiveOutcome::None
            }
            SessionEvent::ToolResult(e) => {
                let Some((tool_use, request_message)) =
                    self.pending_tool_calls.remove(&e.tool_use_id)
                else {
                    // Result for a use we never saw; keep it around, bounded.
                    self.orphan_results.push_back(ToolResultBlock {
                        tool_use_id: e.tool_use_id.clone(),
                        content: e.content.clone(),
                        is_error: e.is_error,
                    });
                    if self.orphan_results.len() > self.config.max_orphan_results {
                        self.orphan_results.pop_front();
                    }
                    return LiveOutcome::None;
                };

                let duration = (e.message.timestamp - request_message.timestamp)
                    .to_std()
                    .unwrap_or(Duration::ZERO);

                let tool_call = ToolCall {
                    tool_use,
                    tool_result: Some(ToolResultBlock {
                        tool_use_id: e.tool_use_id.clone(),
                        content: e.content.clone(),
                        is_error: e.is_error,
                    }),
                    request_message,
                    response_message: Some(e.message.clone()),
                };
                self.closed_tool_calls.push(tool_call.clone());
                LiveOutcome::Completed { tool_call, duration }
            }
            _ => LiveOutcome::None,
        }
    }

    fn handle_message(&mut self, message: &Message) {
        self.message_count += 1;

        if self.message_count == 1 {
            self.cwd = message.cwd.clone();
            self.git_branch = message.git_branch.clone();
        }

        if self.config.retention_policy == RetentionPolicy::None {
            return;
        }

        if let (Some(agent_id), true) = (&message.agent_id, message.is_sidechain) {
            self.agent_messages
                .entry(agent_id.clone())
                .or_default()
                .push(message.clone());
        } else {
            self.main_messages.push(message.clone());
        }

        if self.config.retention_policy == RetentionPolicy::Sliding {
            self.enforce_sliding_window();
        }
    }

    fn enforce_sliding_window(&mut self) {
        let max = self.config.max_messages;
        if self.main_messages.len() > max {
            self.main_messages.drain(..self.main_messages.len() - max);
        }
        for messages in self.agent_messages.values_mut() {
            if messages.len() > max {
                messages.drain(..messages.len() - max);
            }
        }
    }

    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    #[must_use]
    pub fn tool_call_count(&self) -> u64 {
        self.tool_call_count
    }

    #[must_use]
    pub fn pending_tool_count(&self) -> usize {
        self.pending_tool_calls.len()
    }

    #[must_use]
    pub fn closed_tool_count(&self) -> usize {
        self.closed_tool_calls.len()
    }

    #[must_use]
    pub fn orphan_result_count(&self) -> usize {
        self.orphan_results.len()
    }

    #[must_use]
    pub fn closed_tool_calls(&self) -> &[ToolCall] {
        &self.closed_tool_calls
    }

    #[must_use]
    pub fn main_messages(&self) -> &[Message] {
        &self.main_messages
    }

    #[must_use]
    pub fn agent_ids(&self) -> Vec<&str> {
        self.agent_messages.keys().map(String::as_str).collect()
    }

    /// Snapshot into the immutable session shape, grouping sidechains into
    /// agents.
    ///
    /// # Errors
    ///
    /// Fails when the retention policy stores no messages.
    pub fn to_session(&self) -> Result<Session, LiveSessionError> {
        if self.config.retention_policy == RetentionPolicy::None {
            return Err(LiveSessionError::NoRetainedMessages);
        }

        let agents = self
            .agent_messages
            .iter()
            .map(|(agent_id, messages)| {
                (
                    agent_id.clone(),
                    Agent {
                        agent_id: agent_id.clone(),
                        session_id: self.session_id.clone(),
                        thread: Thread::new(messages.clone()),
                    },
                )
            })
            .collect();

        Ok(Session {
            session_id: self.session_id.clone(),
            project_slug: self.project_slug.clone(),
            main_thread: Thread::new(self.main_messages.clone()),
            agents,
            cwd: self.cwd.clone(),
            git_branch: self.git_branch.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MessageEvent, ToolResultEvent, ToolUseEvent};
    use crate::model::MessageRole;
    use chrono::TimeZone;
    use serde_json::json;

    fn config(policy: RetentionPolicy, max: usize) -> LiveSessionConfig {
        LiveSessionConfig {
            retention_policy: policy,
            max_messages: max,
            ..Default::default()
        }
    }

    fn live(policy: RetentionPolicy) -> LiveSession {
        LiveSession::new("s1".to_string(), "p".to_string(), config(policy, 1000))
    }

    fn msg(uuid: &str, secs: i64, agent_id: Option<&str>) -> Message {
        Message {
            uuid: uuid.to_string(),
            parent_uuid: None,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            role: MessageRole::User,
            content: vec![],
            session_id: "s1".to_string(),
            agent_id: agent_id.map(String::from),
            is_sidechain: agent_id.is_some(),
            model: None,
            cwd: Some("/work".to_string()),
            git_branch: None,
        }
    }

    fn message_event(uuid: &str, secs: i64, agent_id: Option<&str>) -> SessionEvent {
        let m = msg(uuid, secs, agent_id);
        SessionEvent::Message(MessageEvent {
            timestamp: m.timestamp,
            session_id: "s1".to_string(),
            agent_id: agent_id.map(String::from),
            message: m,
        })
    }

    fn tool_use(id: &str, secs: i64) -> SessionEvent {
        let m = msg("req", secs, None);
        SessionEvent::ToolUse(ToolUseEvent {
            timestamp: m.timestamp,
            session_id: "s1".to_string(),
            agent_id: None,
            tool_name: "Bash".to_string(),
            tool_category: "bash",
            tool_input: json!({"command": "ls"}),
            tool_use_id: id.to_string(),
            message: m,
        })
    }

    fn tool_result(id: &str, secs: i64, is_error: bool) -> SessionEvent {
        let m = msg("resp", secs, None);
        SessionEvent::ToolResult(ToolResultEvent {
            timestamp: m.timestamp,
            session_id: "s1".to_string(),
            agent_id: None,
            tool_use_id: id.to_string(),
            content: "out".to_string(),
            is_error,
            message: m,
        })
    }

    #[test]
    fn test_pairing_produces_completed_call() {
        let mut session = live(RetentionPolicy::Full);

        assert!(matches!(
            session.handle_event(&tool_use("t1", 0)),
            LiveOutcome::None
        ));
        assert_eq!(session.pending_tool_count(), 1);

        match session.handle_event(&tool_result("t1", 3, false)) {
            LiveOutcome::Completed { tool_call, duration } => {
                assert_eq!(tool_call.tool_name(), "Bash");
                assert!(!tool_call.is_error());
                assert_eq!(duration, Duration::from_secs(3));
            }
            other => panic!("expected completed, got {other:?}"),
        }

        assert_eq!(session.pending_tool_count(), 0);
        assert_eq!(session.closed_tool_count(), 1);
    }

    #[test]
    fn test_negative_skew_clamps_duration() {
        let mut session = live(RetentionPolicy::Full);
        session.handle_event(&tool_use("t1", 10));

        match session.handle_event(&tool_result("t1", 5, false)) {
            LiveOutcome::Completed { duration, .. } => assert_eq!(duration, Duration::ZERO),
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_tool_use_id_rejected() {
        let mut session = live(RetentionPolicy::Full);
        session.handle_event(&tool_use("t1", 0));

        match session.handle_event(&tool_use("t1", 1)) {
            LiveOutcome::DuplicateToolUse { tool_use_id } => assert_eq!(tool_use_id, "t1"),
            other => panic!("expected duplicate, got {other:?}"),
        }

        // First registration still pairs, exactly once.
        assert!(matches!(
            session.handle_event(&tool_result("t1", 2, false)),
            LiveOutcome::Completed { .. }
        ));
        assert_eq!(session.closed_tool_count(), 1);

        // The id stays burned even after pairing.
        assert!(matches!(
            session.handle_event(&tool_use("t1", 3)),
            LiveOutcome::DuplicateToolUse { .. }
        ));
    }

    #[test]
    fn test_orphan_result_retained_and_bounded() {
        let mut session = live(RetentionPolicy::Full);

        assert!(matches!(
            session.handle_event(&tool_result("unseen", 0, false)),
            LiveOutcome::None
        ));
        assert_eq!(session.orphan_result_count(), 1);

        for i in 0..1100 {
            session.handle_event(&tool_result(&format!("orphan-{i}"), 0, false));
        }
        assert_eq!(session.orphan_result_count(), 1024);
    }

    #[test]
    fn test_message_routing_by_agent() {
        let mut session = live(RetentionPolicy::Full);
        session.handle_event(&message_event("m1", 0, None));
        session.handle_event(&message_event("m2", 1, Some("agent-a")));
        session.handle_event(&message_event("m3", 2, Some("agent-a")));

        assert_eq!(session.main_messages().len(), 1);
        assert_eq!(session.agent_ids(), vec!["agent-a"]);
        assert_eq!(session.message_count(), 3);
    }

    #[test]
    fn test_sliding_retention_truncates() {
        let mut session = LiveSession::new(
            "s1".to_string(),
            "p".to_string(),
            config(RetentionPolicy::Sliding, 2),
        );

        for i in 0..5 {
            session.handle_event(&message_event(&format!("m{i}"), i, None));
        }

        assert_eq!(session.main_messages().len(), 2);
        assert_eq!(session.main_messages()[0].uuid, "m3");
        assert_eq!(session.message_count(), 5);
    }

    #[test]
    fn test_sliding_retention_keeps_pending_calls() {
        let mut session = LiveSession::new(
            "s1".to_string(),
            "p".to_string(),
            config(RetentionPolicy::Sliding, 1),
        );

        session.handle_event(&tool_use("t1", 0));
        for i in 0..10 {
            session.handle_event(&message_event(&format!("m{i}"), i, None));
        }

        // Pairing must still succeed for the late result.
        assert!(matches!(
            session.handle_event(&tool_result("t1", 20, false)),
            LiveOutcome::Completed { .. }
        ));
    }

    #[test]
    fn test_none_retention_keeps_counters_only() {
        let mut session = live(RetentionPolicy::None);
        session.handle_event(&message_event("m1", 0, None));
        session.handle_event(&tool_use("t1", 1));

        assert_eq!(session.message_count(), 1);
        assert_eq!(session.tool_call_count(), 1);
        assert!(session.main_messages().is_empty());
        assert!(session.to_session().is_err());
    }

    #[test]
    fn test_to_session_groups_agents() {
        let mut session = live(RetentionPolicy::Full);
        session.handle_event(&message_event("m1", 0, None));
        session.handle_event(&message_event("m2", 1, Some("agent-a")));

        let snapshot = session.to_session().unwrap();
        assert_eq!(snapshot.session_id, "s1");
        assert_eq!(snapshot.project_slug, "p");
        assert_eq!(snapshot.main_thread.len(), 1);
        assert_eq!(snapshot.agents.len(), 1);
        assert_eq!(snapshot.agents["agent-a"].message_count(), 1);
        assert_eq!(snapshot.cwd.as_deref(), Some("/work"));
    }
}
