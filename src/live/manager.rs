//! Collection of live sessions keyed by session id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::events::SessionEvent;
use crate::model::Session;

use super::session::{LiveOutcome, LiveSession};
use super::{LiveSessionConfig, LiveSessionError};

/// Tracks live sessions for the watcher and routes events to them.
///
/// The session map is guarded by a read-write lock; each session has its own
/// mutex. Handlers may hold a session briefly, the poll loop takes the write
/// lock only to insert or remove sessions.
#[derive(Debug, Default)]
pub struct LiveSessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<LiveSession>>>>,
    ended: RwLock<HashMap<String, Arc<Mutex<LiveSession>>>>,
    default_config: LiveSessionConfig,
}

impl LiveSessionManager {
    #[must_use]
    pub fn new(default_config: LiveSessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ended: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    /// Get an active session, creating it if unknown.
    pub fn get_or_create(&self, session_id: &str, project_slug: &str) -> Arc<Mutex<LiveSession>> {
        if let Some(session) = self.get(session_id) {
            return session;
        }

        let mut sessions = self.sessions.write().expect("session map poisoned");
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(LiveSession::new(
                    session_id.to_string(),
                    project_slug.to_string(),
                    self.default_config.clone(),
                )))
            })
            .clone()
    }

    /// Get an active session by id.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<LiveSession>>> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .get(session_id)
            .cloned()
    }

    /// Get an ended session by id.
    #[must_use]
    pub fn get_ended(&self, session_id: &str) -> Option<Arc<Mutex<LiveSession>>> {
        self.ended
            .read()
            .expect("ended map poisoned")
            .get(session_id)
            .cloned()
    }

    /// Route one event to its session's state.
    pub fn handle_event(&self, event: &SessionEvent) -> LiveOutcome {
        match event {
            SessionEvent::SessionStart(e) => {
                self.get_or_create(&e.session_id, &e.project_slug);
                LiveOutcome::None
            }
            SessionEvent::SessionEnd(e) => {
                self.end_session(&e.session_id);
                LiveOutcome::None
            }
            SessionEvent::SessionIdle(_) | SessionEvent::SessionResume(_) => LiveOutcome::None,
            SessionEvent::Error(_) => LiveOutcome::None,
            _ => {
                let session_id = event.session_id();
                if session_id.is_empty() {
                    return LiveOutcome::None;
                }
                let session = self.get_or_create(session_id, "");
                let mut session = session.lock().expect("session poisoned");
                session.handle_event(event)
            }
        }
    }

    /// Move a session to the ended archive.
    pub fn end_session(&self, session_id: &str) -> Option<Arc<Mutex<LiveSession>>> {
        let removed = self
            .sessions
            .write()
            .expect("session map poisoned")
            .remove(session_id);
        if let Some(session) = &removed {
            self.ended
                .write()
                .expect("ended map poisoned")
                .insert(session_id.to_string(), session.clone());
        }
        removed
    }

    /// Drop all archived sessions. Returns how many were cleared.
    pub fn clear_ended(&self) -> usize {
        let mut ended = self.ended.write().expect("ended map poisoned");
        let count = ended.len();
        ended.clear();
        count
    }

    /// Snapshot one session into the immutable shape.
    ///
    /// # Errors
    ///
    /// Fails when the session is unknown or stores no messages.
    pub fn to_session(&self, session_id: &str) -> Result<Session, LiveSessionError> {
        let session = self
            .get(session_id)
            .or_else(|| self.get_ended(session_id))
            .ok_or(LiveSessionError::UnknownSession)?;
        let session = session.lock().expect("session poisoned");
        session.to_session()
    }

    #[must_use]
    pub fn active_session_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.sessions.read().expect("session map poisoned").len()
    }

    #[must_use]
    pub fn ended_session_count(&self) -> usize {
        self.ended.read().expect("ended map poisoned").len()
    }
}
