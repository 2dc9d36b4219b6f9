//! Top-level orchestrator: drives tailers, parser, live tracking, and
//! handler dispatch, and infers session lifecycle.
//!
//! A single poll loop is authoritative for parsing, timeout decisions, and
//! handler invocation. Filesystem notifications, when available, only
//! enqueue wakeup paths that the poll loop drains.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use notify_debouncer_full::{
    new_debouncer,
    notify::{self, RecursiveMode},
    DebounceEventResult,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::WatcherConfig;
use crate::emitter::{EventEmitter, HandlerResult};
use crate::events::{
    EndReason, ErrorEvent, EventType, SessionEndEvent, SessionEvent, SessionIdleEvent,
    SessionResumeEvent, SessionStartEvent, ToolCallCompletedEvent,
};
use crate::live::{LiveOutcome, LiveSessionManager};
use crate::parser::IncrementalParser;
use crate::state::WatcherState;
use crate::stream::{EventStream, EventStreamSender};
use crate::tailer::{JsonlTailer, MultiFileTailer, TailedLine, TailerError};

use super::discovery::{scan_projects, DiscoveredFile};
use super::error::WatcherError;

/// Debounce window for filesystem notifications.
const NOTIFY_DEBOUNCE: Duration = Duration::from_millis(100);

/// Internal lifecycle state for one tracked session.
#[derive(Debug)]
struct TrackedSession {
    session_id: String,
    project_slug: String,
    file_path: PathBuf,
    last_activity: DateTime<Utc>,
    is_idle: bool,
    idle_since: Option<DateTime<Utc>>,
    ended: bool,
    message_count: u64,
    tool_count: u64,
    cwd: Option<String>,
    /// When reads started failing, for the unreadable-past-end-timeout rule.
    io_error_since: Option<Instant>,
}

impl TrackedSession {
    fn new(session_id: String, project_slug: String, file_path: PathBuf) -> Self {
        Self {
            session_id,
            project_slug,
            file_path,
            last_activity: Utc::now(),
            is_idle: false,
            idle_since: None,
            ended: false,
            message_count: 0,
            tool_count: 0,
            cwd: None,
            io_error_since: None,
        }
    }
}

/// Public statistics for one tracked session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: String,
    pub project_slug: String,
    pub message_count: u64,
    pub tool_count: u64,
    pub is_idle: bool,
    pub is_ended: bool,
    pub last_activity: DateTime<Utc>,
    pub cwd: Option<String>,
}

/// Handle for stopping a running watcher from another task.
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    cancel: CancellationToken,
}

impl WatcherHandle {
    /// Signal the watcher to finish its current poll and exit.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

struct NotifyBridge {
    receiver: mpsc::UnboundedReceiver<PathBuf>,
    stop_tx: std_mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Watches session directories and emits events to registered handlers.
pub struct SessionWatcher {
    config: WatcherConfig,
    emitter: EventEmitter,
    parser: IncrementalParser,
    tailers: MultiFileTailer,
    sessions: HashMap<String, TrackedSession>,
    file_to_session: HashMap<PathBuf, String>,
    /// Agent file -> agent id remembered from the first entry carrying one.
    agent_file_ids: HashMap<PathBuf, Option<String>>,
    live: Arc<LiveSessionManager>,
    state: WatcherState,
    last_save: Instant,
    cancel: CancellationToken,
    notify: Option<NotifyBridge>,
    stream: EventStreamSender,
}

impl SessionWatcher {
    #[must_use]
    pub fn new(config: WatcherConfig) -> Self {
        let parser = IncrementalParser::new(config.truncate_inputs, config.max_input_length);
        let live = Arc::new(LiveSessionManager::new(config.live_config()));
        let stream = EventStreamSender::new(config.async_queue_capacity);
        Self {
            config,
            emitter: EventEmitter::new(),
            parser,
            tailers: MultiFileTailer::new(),
            sessions: HashMap::new(),
            file_to_session: HashMap::new(),
            agent_file_ids: HashMap::new(),
            live,
            state: WatcherState::default(),
            last_save: Instant::now(),
            cancel: CancellationToken::new(),
            notify: None,
            stream,
        }
    }

    /// Register a handler for one event type.
    pub fn on<F>(&mut self, event_type: EventType, handler: F)
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.emitter.on(event_type, handler);
    }

    /// Register a handler for all events.
    pub fn on_any<F>(&mut self, handler: F)
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.emitter.on_any(handler);
    }

    /// Register a suspending handler for one event type.
    pub fn on_async<F, Fut>(&mut self, event_type: EventType, handler: F)
    where
        F: Fn(SessionEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.emitter.on_async(event_type, handler);
    }

    /// Register a suspending handler for all events.
    pub fn on_any_async<F, Fut>(&mut self, handler: F)
    where
        F: Fn(SessionEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.emitter.on_any_async(handler);
    }

    /// Live session state shared with handlers.
    #[must_use]
    pub fn live_sessions(&self) -> Arc<LiveSessionManager> {
        self.live.clone()
    }

    /// Open a suspending iterator over the event stream.
    #[must_use]
    pub fn events(&self) -> EventStream {
        self.stream.subscribe()
    }

    /// Events dropped from async streams due to overflow.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.stream.events_dropped()
    }

    /// Handle for stopping the watcher.
    #[must_use]
    pub fn handle(&self) -> WatcherHandle {
        WatcherHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Session ids not yet ended.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions
            .values()
            .filter(|t| !t.ended)
            .map(|t| t.session_id.clone())
            .collect()
    }

    /// Statistics for one tracked session.
    #[must_use]
    pub fn session_stats(&self, session_id: &str) -> Option<SessionStats> {
        self.sessions.get(session_id).map(|t| SessionStats {
            session_id: t.session_id.clone(),
            project_slug: t.project_slug.clone(),
            message_count: t.message_count,
            tool_count: t.tool_count,
            is_idle: t.is_idle,
            is_ended: t.ended,
            last_activity: t.last_activity,
            cwd: t.cwd.clone(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Run the poll loop until [`WatcherHandle::stop`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error only for unrecoverable setup failures; runtime
    /// problems surface as `error` events or `session_end(file_gone)`.
    pub async fn run(&mut self) -> Result<(), WatcherError> {
        self.startup().await?;

        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = tick.tick() => self.poll_cycle().await,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Run for a bounded duration, then stop cleanly.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`SessionWatcher::run`].
    pub async fn run_for(&mut self, duration: Duration) -> Result<(), WatcherError> {
        let cancel = self.cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            cancel.cancel();
        });
        let result = self.run().await;
        timer.abort();
        result
    }

    async fn startup(&mut self) -> Result<(), WatcherError> {
        let projects_path = self.config.projects_path();
        if projects_path.exists() {
            if let Err(source) = std::fs::read_dir(&projects_path) {
                return Err(WatcherError::ProjectsUnreadable {
                    path: projects_path,
                    source,
                });
            }
        }

        if let Some(state_file) = self.config.state_file.clone() {
            self.state = WatcherState::load(&state_file).await;
            self.state.prune_missing();
        }

        self.notify = spawn_notify_bridge(self.config.projects_path());

        let discovered = scan_projects(&self.config.projects_path());
        for file in discovered {
            self.register_file(&file, true).await;
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(bridge) = self.notify.take() {
            let _ = bridge.stop_tx.send(());
            let _ = bridge.handle.join();
            drop(bridge.receiver);
        }

        self.save_state().await;

        let session_ids: Vec<String> = self
            .sessions
            .values()
            .filter(|t| !t.ended)
            .map(|t| t.session_id.clone())
            .collect();
        for session_id in session_ids {
            self.end_session(&session_id, EndReason::Shutdown).await;
        }
    }

    async fn poll_cycle(&mut self) {
        self.drain_notify_queue().await;
        self.refresh_directory().await;
        self.read_and_process().await;
        self.check_timeouts().await;
        self.autosave_if_due().await;
    }

    /// Drain wakeup paths queued by the filesystem notifier.
    async fn drain_notify_queue(&mut self) {
        let mut created = Vec::new();
        if let Some(bridge) = self.notify.as_mut() {
            while let Ok(path) = bridge.receiver.try_recv() {
                created.push(path);
            }
        }
        for path in created {
            if !self.tailers.contains(&path) {
                if let Some(file) = DiscoveredFile::classify(&path) {
                    if file.path.is_file() {
                        self.register_file(&file, false).await;
                    }
                }
            }
        }
    }

    /// Rescan the projects tree: add new files, end sessions whose main
    /// file disappeared. The scan, not the notifier, is authoritative.
    async fn refresh_directory(&mut self) {
        let discovered = scan_projects(&self.config.projects_path());

        let mut present: std::collections::HashSet<PathBuf> = std::collections::HashSet::new();
        for file in &discovered {
            present.insert(file.path.clone());
        }

        for file in discovered {
            if !self.tailers.contains(&file.path) {
                self.register_file(&file, false).await;
            }
        }

        let gone_sessions: Vec<String> = self
            .sessions
            .values()
            .filter(|t| !t.ended && !present.contains(&t.file_path))
            .map(|t| t.session_id.clone())
            .collect();
        for session_id in gone_sessions {
            tracing::info!(session_id = %session_id, "Session file removed");
            self.end_session(&session_id, EndReason::FileGone).await;
        }

        let gone_agents: Vec<PathBuf> = self
            .agent_file_ids
            .keys()
            .filter(|p| !present.contains(*p))
            .cloned()
            .collect();
        for path in gone_agents {
            self.tailers.remove(&path);
            self.agent_file_ids.remove(&path);
        }
    }

    async fn register_file(&mut self, file: &DiscoveredFile, at_startup: bool) {
        if self.tailers.contains(&file.path) {
            return;
        }
        if !file.is_agent_file && self.sessions.contains_key(&file.stem) {
            return;
        }

        let tailer = match self.open_tailer(&file.path, at_startup) {
            Ok(tailer) => tailer,
            Err(e) => {
                tracing::warn!(path = %file.path.display(), error = %e, "Cannot open session file");
                return;
            }
        };
        self.tailers.add(file.path.clone(), tailer);

        if file.is_agent_file {
            self.agent_file_ids.insert(file.path.clone(), None);
            tracing::debug!(path = %file.path.display(), "Tailing sidechain file");
            return;
        }

        let session_id = file.stem.clone();
        tracing::info!(
            session_id = %session_id,
            project = %file.project_slug,
            "Tracking session"
        );
        self.sessions.insert(
            session_id.clone(),
            TrackedSession::new(session_id.clone(), file.project_slug.clone(), file.path.clone()),
        );
        self.file_to_session
            .insert(file.path.clone(), session_id.clone());
        self.live.get_or_create(&session_id, &file.project_slug);

        if self.config.emit_session_events {
            let event = SessionEvent::SessionStart(SessionStartEvent {
                timestamp: Utc::now(),
                session_id,
                project_slug: file.project_slug.clone(),
                file_path: file.path.clone(),
                cwd: None,
            });
            self.dispatch(&event).await;
        }
    }

    fn open_tailer(&self, path: &Path, at_startup: bool) -> Result<JsonlTailer, TailerError> {
        let backoff = self.config.poll_interval;
        if at_startup {
            if let Some(position) = self.state.position_for(path) {
                return JsonlTailer::open_resumed(path, position, backoff);
            }
            if !self.config.process_existing {
                return JsonlTailer::open_at_end(path, backoff);
            }
        }
        JsonlTailer::open(path, backoff)
    }

    async fn read_and_process(&mut self) {
        let (lines, errors) = self.tailers.poll().await;

        for (path, line) in lines {
            self.process_line(&path, line).await;
        }

        // Clear the error clock for files that read cleanly this cycle.
        let failing: std::collections::HashSet<PathBuf> =
            errors.iter().map(|(p, _)| p.clone()).collect();
        let now = Instant::now();
        let end_timeout = self.config.end_timeout;
        let mut unreadable = Vec::new();
        for tracked in self.sessions.values_mut() {
            if tracked.ended {
                continue;
            }
            if failing.contains(&tracked.file_path) {
                let since = *tracked.io_error_since.get_or_insert(now);
                if now.duration_since(since) > end_timeout {
                    unreadable.push(tracked.session_id.clone());
                }
            } else {
                tracked.io_error_since = None;
            }
        }
        for session_id in unreadable {
            tracing::warn!(session_id = %session_id, "Session file unreadable past end timeout");
            self.end_session(&session_id, EndReason::FileGone).await;
        }
    }

    async fn process_line(&mut self, path: &Path, line: TailedLine) {
        match line {
            TailedLine::Malformed(raw) => {
                let session_id = self
                    .file_to_session
                    .get(path)
                    .cloned()
                    .unwrap_or_default();
                self.mark_activity(&session_id).await;
                let mut event = self.parser.malformed_line_error(&raw);
                if let SessionEvent::Error(ref mut e) = event {
                    e.session_id = session_id;
                }
                self.dispatch(&event).await;
            }
            TailedLine::Entry(value) => {
                let default_agent = self.remember_agent_id(path, &value);
                let session_id = self.attribute_session(path, &value);
                self.mark_activity(&session_id).await;

                let events = self.parser.parse_value(&value, default_agent.as_deref());
                for event in events {
                    self.process_event(event).await;
                }
            }
        }
    }

    /// For sidechain files, keep the first non-null `agentId` and supply it
    /// to later entries of the same file.
    fn remember_agent_id(&mut self, path: &Path, value: &Value) -> Option<String> {
        let slot = self.agent_file_ids.get_mut(path)?;
        if slot.is_none() {
            if let Some(agent_id) = value.get("agentId").and_then(Value::as_str) {
                *slot = Some(agent_id.to_string());
            }
        }
        slot.clone()
    }

    fn attribute_session(&self, path: &Path, value: &Value) -> String {
        if let Some(session_id) = self.file_to_session.get(path) {
            return session_id.clone();
        }
        value
            .get("sessionId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Record activity for a session, emitting `session_resume` when it was
    /// idle.
    async fn mark_activity(&mut self, session_id: &str) {
        let Some(tracked) = self.sessions.get_mut(session_id) else {
            return;
        };
        if tracked.ended {
            return;
        }

        let now = Utc::now();
        let resume = if tracked.is_idle {
            tracked
                .idle_since
                .map(|since| (now - since).to_std().unwrap_or(Duration::ZERO))
        } else {
            None
        };
        tracked.is_idle = false;
        tracked.idle_since = None;
        tracked.last_activity = now;

        if let Some(idle_duration) = resume {
            if self.config.emit_session_events {
                let event = SessionEvent::SessionResume(SessionResumeEvent {
                    timestamp: now,
                    session_id: session_id.to_string(),
                    idle_duration,
                });
                self.dispatch(&event).await;
            }
        }
    }

    async fn process_event(&mut self, event: SessionEvent) {
        match &event {
            SessionEvent::Message(e) => {
                if let Some(tracked) = self.sessions.get_mut(&e.session_id) {
                    tracked.message_count += 1;
                    if tracked.cwd.is_none() {
                        tracked.cwd = e.message.cwd.clone();
                    }
                }
                self.live.handle_event(&event);
                self.dispatch(&event).await;
            }
            SessionEvent::ToolUse(e) => {
                match self.live.handle_event(&event) {
                    LiveOutcome::DuplicateToolUse { tool_use_id } => {
                        // Second use of an id: error instead of tool_use.
                        let error = SessionEvent::Error(ErrorEvent {
                            timestamp: e.timestamp,
                            session_id: e.session_id.clone(),
                            agent_id: e.agent_id.clone(),
                            error_message: format!("tool_use_id_collision: {tool_use_id}"),
                            raw_entry: None,
                        });
                        self.dispatch(&error).await;
                    }
                    _ => {
                        if let Some(tracked) = self.sessions.get_mut(&e.session_id) {
                            tracked.tool_count += 1;
                        }
                        self.dispatch(&event).await;
                    }
                }
            }
            SessionEvent::ToolResult(e) => {
                let outcome = self.live.handle_event(&event);
                self.dispatch(&event).await;

                if let LiveOutcome::Completed { tool_call, duration } = outcome {
                    let completed = SessionEvent::ToolCallCompleted(ToolCallCompletedEvent {
                        timestamp: e.timestamp,
                        session_id: e.session_id.clone(),
                        agent_id: e.agent_id.clone(),
                        tool_name: tool_call.tool_name().to_string(),
                        is_error: tool_call.is_error(),
                        tool_call,
                        duration,
                    });
                    self.dispatch(&completed).await;
                }
            }
            _ => {
                self.dispatch(&event).await;
            }
        }
    }

    async fn dispatch(&self, event: &SessionEvent) {
        self.emitter.emit(event).await;
        self.stream.publish(event);
    }

    /// Idle/end decisions are pure functions of `last_activity` and the
    /// current time, computed every poll tick.
    async fn check_timeouts(&mut self) {
        let now = Utc::now();
        let idle_timeout =
            chrono::Duration::from_std(self.config.idle_timeout).unwrap_or(chrono::Duration::MAX);
        let end_timeout =
            chrono::Duration::from_std(self.config.end_timeout).unwrap_or(chrono::Duration::MAX);

        let mut newly_idle = Vec::new();
        let mut newly_ended = Vec::new();
        for tracked in self.sessions.values_mut() {
            if tracked.ended {
                continue;
            }
            if !tracked.is_idle {
                if now - tracked.last_activity > idle_timeout {
                    tracked.is_idle = true;
                    tracked.idle_since = Some(tracked.last_activity);
                    newly_idle.push((tracked.session_id.clone(), tracked.last_activity));
                }
            } else if let Some(idle_since) = tracked.idle_since {
                if now - idle_since > end_timeout {
                    newly_ended.push(tracked.session_id.clone());
                }
            }
        }

        if self.config.emit_session_events {
            for (session_id, idle_since) in newly_idle {
                let event = SessionEvent::SessionIdle(SessionIdleEvent {
                    timestamp: now,
                    session_id,
                    idle_since,
                });
                self.dispatch(&event).await;
            }
        }
        for session_id in newly_ended {
            self.end_session(&session_id, EndReason::IdleTimeout).await;
        }
    }

    async fn end_session(&mut self, session_id: &str, reason: EndReason) {
        let Some(tracked) = self.sessions.get_mut(session_id) else {
            return;
        };
        if tracked.ended {
            return;
        }
        tracked.ended = true;

        let now = Utc::now();
        let idle_duration = tracked
            .idle_since
            .map(|since| (now - since).to_std().unwrap_or(Duration::ZERO));
        let message_count = tracked.message_count;
        let tool_count = tracked.tool_count;
        let file_path = tracked.file_path.clone();

        self.tailers.remove(&file_path);
        self.live.end_session(session_id);

        if self.config.emit_session_events {
            let event = SessionEvent::SessionEnd(SessionEndEvent {
                timestamp: now,
                session_id: session_id.to_string(),
                reason,
                idle_duration,
                message_count,
                tool_count,
            });
            self.dispatch(&event).await;
        }
    }

    async fn autosave_if_due(&mut self) {
        if self.config.state_file.is_none() {
            return;
        }
        if self.last_save.elapsed() < self.config.save_interval {
            return;
        }
        self.save_state().await;
    }

    async fn save_state(&mut self) {
        let Some(state_file) = self.config.state_file.clone() else {
            return;
        };
        let positions = self
            .tailers
            .tailers()
            .map(|(_, tailer)| tailer.position())
            .collect();
        self.state = WatcherState::new(positions);
        if let Err(e) = self.state.save(&state_file).await {
            tracing::warn!(path = %state_file.display(), error = %e, "Failed to save state");
        }
        self.last_save = Instant::now();
    }
}

/// Start the notify bridge thread, if the platform watcher is available.
///
/// The thread owns the debouncer and forwards `.jsonl` paths from create
/// and modify events into a channel the poll loop drains. Returns `None`
/// when the watcher cannot be created; polling alone still works.
fn spawn_notify_bridge(projects_path: PathBuf) -> Option<NotifyBridge> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = std_mpsc::channel();
    let (notify_tx, notify_rx) = std_mpsc::channel();

    let mut debouncer = match new_debouncer(NOTIFY_DEBOUNCE, None, move |result: DebounceEventResult| {
        let _ = notify_tx.send(result);
    }) {
        Ok(debouncer) => debouncer,
        Err(e) => {
            tracing::warn!(error = %e, "Filesystem notifications unavailable, polling only");
            return None;
        }
    };

    if let Err(e) = debouncer.watch(&projects_path, RecursiveMode::Recursive) {
        tracing::debug!(
            path = %projects_path.display(),
            error = %e,
            "Cannot watch projects path, polling only"
        );
        return None;
    }

    let handle = thread::spawn(move || {
        loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }
            match notify_rx.recv_timeout(NOTIFY_DEBOUNCE) {
                Ok(Ok(events)) => {
                    for event in &events {
                        if !matches!(
                            event.kind,
                            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                        ) {
                            continue;
                        }
                        for path in &event.paths {
                            if path.extension().is_some_and(|ext| ext == "jsonl") {
                                let _ = event_tx.send(path.clone());
                            }
                        }
                    }
                }
                Ok(Err(errors)) => {
                    for error in errors {
                        tracing::warn!(error = %error, "Filesystem notification error");
                    }
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(debouncer);
    });

    Some(NotifyBridge {
        receiver: event_rx,
        stop_tx,
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_session_initial_state() {
        let tracked = TrackedSession::new(
            "s1".to_string(),
            "p".to_string(),
            PathBuf::from("/tmp/s1.jsonl"),
        );
        assert!(!tracked.is_idle);
        assert!(!tracked.ended);
        assert_eq!(tracked.message_count, 0);
        assert_eq!(tracked.tool_count, 0);
    }

    #[test]
    fn test_watcher_construction() {
        let watcher = SessionWatcher::new(WatcherConfig::default());
        assert!(watcher.active_sessions().is_empty());
        assert_eq!(watcher.events_dropped(), 0);
        assert!(watcher.session_stats("nope").is_none());
    }

    #[tokio::test]
    async fn test_handle_stops_run() {
        let config = WatcherConfig {
            base_path: std::env::temp_dir().join("claude-watch-empty-base"),
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let mut watcher = SessionWatcher::new(config);
        let handle = watcher.handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            handle.stop();
        });

        tokio::time::timeout(Duration::from_secs(5), watcher.run())
            .await
            .expect("run did not stop")
            .expect("run failed");
    }
}
