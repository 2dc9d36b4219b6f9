//! Composable event filters and filtered dispatch pipelines.
//!
//! Filter predicates are `Event -> bool` closures built from the factories
//! here and combined with `and_` / `or_` / `not_`. A [`FilterPipeline`]
//! wraps an emitter so that registered handlers only see matching events.

use std::collections::HashSet;
use std::sync::Arc;

use crate::emitter::{EventEmitter, HandlerResult};
use crate::events::{EventType, SessionEvent};

/// A filter predicate over events.
pub type EventFilter = Arc<dyn Fn(&SessionEvent) -> bool + Send + Sync>;

/// Match events from a specific project.
///
/// Only `session_start` events carry a project slug; other events do not
/// match. Combine with [`session`] filters for full-stream scoping.
#[must_use]
pub fn project(slug: impl Into<String>) -> EventFilter {
    let slug = slug.into();
    Arc::new(move |event| match event {
        SessionEvent::SessionStart(e) => e.project_slug == slug,
        _ => false,
    })
}

/// Match events from a specific session.
#[must_use]
pub fn session(session_id: impl Into<String>) -> EventFilter {
    let session_id = session_id.into();
    Arc::new(move |event| event.session_id() == session_id)
}

/// Match sessions whose id starts with a prefix.
#[must_use]
pub fn session_prefix(prefix: impl Into<String>) -> EventFilter {
    let prefix = prefix.into();
    Arc::new(move |event| event.session_id().starts_with(&prefix))
}

/// Match specific event types.
#[must_use]
pub fn event_type(types: impl IntoIterator<Item = EventType>) -> EventFilter {
    let types: HashSet<EventType> = types.into_iter().collect();
    Arc::new(move |event| types.contains(&event.event_type()))
}

/// Match tool events by tool name.
#[must_use]
pub fn tool_name<S: Into<String>>(names: impl IntoIterator<Item = S>) -> EventFilter {
    let names: HashSet<String> = names.into_iter().map(Into::into).collect();
    Arc::new(move |event| match event {
        SessionEvent::ToolUse(e) => names.contains(&e.tool_name),
        SessionEvent::ToolCallCompleted(e) => names.contains(&e.tool_name),
        _ => false,
    })
}

/// Match tool use events by category.
#[must_use]
pub fn tool_category<S: Into<String>>(categories: impl IntoIterator<Item = S>) -> EventFilter {
    let categories: HashSet<String> = categories.into_iter().map(Into::into).collect();
    Arc::new(move |event| match event {
        SessionEvent::ToolUse(e) => categories.contains(e.tool_category),
        SessionEvent::ToolCallCompleted(e) => {
            categories.contains(e.tool_call.tool_category())
        }
        _ => false,
    })
}

/// Match any event from a sub-agent (non-null agent id).
#[must_use]
pub fn agent() -> EventFilter {
    Arc::new(|event| event.agent_id().is_some())
}

/// Match only main-thread events (null agent id).
#[must_use]
pub fn main_thread() -> EventFilter {
    Arc::new(|event| event.agent_id().is_none())
}

/// Match error events, failed tool results, and failed completed calls.
#[must_use]
pub fn has_error() -> EventFilter {
    Arc::new(|event| match event {
        SessionEvent::Error(_) => true,
        SessionEvent::ToolResult(e) => e.is_error,
        SessionEvent::ToolCallCompleted(e) => e.is_error,
        _ => false,
    })
}

/// Match message events by role.
#[must_use]
pub fn role(role_value: impl Into<String>) -> EventFilter {
    let role_value = role_value.into();
    Arc::new(move |event| match event {
        SessionEvent::Message(e) => e.message.role.as_str() == role_value,
        _ => false,
    })
}

/// All filters must match.
#[must_use]
pub fn and_(filters: impl IntoIterator<Item = EventFilter>) -> EventFilter {
    let filters: Vec<EventFilter> = filters.into_iter().collect();
    Arc::new(move |event| filters.iter().all(|f| f(event)))
}

/// Any filter may match.
#[must_use]
pub fn or_(filters: impl IntoIterator<Item = EventFilter>) -> EventFilter {
    let filters: Vec<EventFilter> = filters.into_iter().collect();
    Arc::new(move |event| filters.iter().any(|f| f(event)))
}

/// Negate a filter.
#[must_use]
pub fn not_(filter: EventFilter) -> EventFilter {
    Arc::new(move |event| !filter(event))
}

/// Always matches.
#[must_use]
pub fn always() -> EventFilter {
    Arc::new(|_| true)
}

/// Never matches.
#[must_use]
pub fn never() -> EventFilter {
    Arc::new(|_| false)
}

/// Filtered dispatch: handlers registered here only see events matching the
/// pipeline's predicate.
pub struct FilterPipeline {
    filter: EventFilter,
    emitter: EventEmitter,
}

impl FilterPipeline {
    #[must_use]
    pub fn new(filter: EventFilter) -> Self {
        Self {
            filter,
            emitter: EventEmitter::new(),
        }
    }

    /// Whether an event passes the pipeline's filter.
    #[must_use]
    pub fn matches(&self, event: &SessionEvent) -> bool {
        (self.filter)(event)
    }

    /// Register a handler for one event type.
    pub fn on<F>(&mut self, event_type: EventType, handler: F)
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.emitter.on(event_type, handler);
    }

    /// Register a handler for all matching events.
    pub fn on_any<F>(&mut self, handler: F)
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.emitter.on_any(handler);
    }

    /// Run an event through the pipeline. Returns the number of handlers
    /// called (zero when the filter rejects the event).
    pub async fn process(&self, event: &SessionEvent) -> usize {
        if !self.matches(event) {
            return 0;
        }
        self.emitter.emit(event).await
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.emitter.handler_count()
    }
}
