//! Event dispatch to registered handlers.
//!
//! Handlers are registered per event type or as wildcards and invoked in
//! registration order on the watcher's dispatch task. A failing handler
//! produces a synthesized `error` event and does not stop dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::Utc;

use crate::events::{ErrorEvent, EventType, SessionEvent};

/// Result type for event handlers. Returning `Err` synthesizes an `error`
/// event; the handler stays registered.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type SyncHandler = Box<dyn Fn(&SessionEvent) -> HandlerResult + Send + Sync>;
type AsyncHandler =
    Box<dyn Fn(SessionEvent) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// Dispatches session events to registered handlers.
#[derive(Default)]
pub struct EventEmitter {
    handlers: HashMap<EventType, Vec<Handler>>,
    any_handlers: Vec<Handler>,
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type.
    pub fn on<F>(&mut self, event_type: EventType, handler: F)
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .entry(event_type)
            .or_default()
            .push(Handler::Sync(Box::new(handler)));
    }

    /// Register a handler that receives every event.
    pub fn on_any<F>(&mut self, handler: F)
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.any_handlers.push(Handler::Sync(Box::new(handler)));
    }

    /// Register a suspending handler for one event type.
    ///
    /// Suspending handlers are awaited sequentially per event on the
    /// dispatch task.
    pub fn on_async<F, Fut>(&mut self, event_type: EventType, handler: F)
    where
        F: Fn(SessionEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers
            .entry(event_type)
            .or_default()
            .push(Handler::Async(Box::new(move |event| {
                Box::pin(handler(event))
            })));
    }

    /// Register a suspending handler that receives every event.
    pub fn on_any_async<F, Fut>(&mut self, handler: F)
    where
        F: Fn(SessionEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.any_handlers.push(Handler::Async(Box::new(move |event| {
            Box::pin(handler(event))
        })));
    }

    /// Total number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum::<usize>() + self.any_handlers.len()
    }

    /// Whether any handler would receive an event of this type.
    #[must_use]
    pub fn has_handlers(&self, event_type: EventType) -> bool {
        !self.any_handlers.is_empty()
            || self.handlers.get(&event_type).is_some_and(|h| !h.is_empty())
    }

    /// Dispatch an event to its type handlers, then to wildcard handlers.
    ///
    /// Handler failures are collected and re-emitted as `error` events once
    /// the main dispatch completes. Returns the number of handler calls
    /// that succeeded.
    pub async fn emit(&self, event: &SessionEvent) -> usize {
        let mut failures = Vec::new();
        let called = self.dispatch(event, &mut failures).await;

        for message in failures {
            let error_event = SessionEvent::Error(ErrorEvent {
                timestamp: Utc::now(),
                session_id: event.session_id().to_string(),
                agent_id: event.agent_id().map(String::from),
                error_message: message,
                raw_entry: None,
            });
            // Failures of error handlers themselves are only logged, so a
            // handler that always fails cannot recurse.
            let mut nested = Vec::new();
            self.dispatch(&error_event, &mut nested).await;
            for msg in nested {
                tracing::warn!(error = %msg, "Error handler failed");
            }
        }

        called
    }

    async fn dispatch(&self, event: &SessionEvent, failures: &mut Vec<String>) -> usize {
        let mut called = 0;
        let type_handlers = self
            .handlers
            .get(&event.event_type())
            .map(Vec::as_slice)
            .unwrap_or_default();

        for handler in type_handlers.iter().chain(self.any_handlers.iter()) {
            let result = match handler {
                Handler::Sync(f) => f(event),
                Handler::Async(f) => f(event.clone()).await,
            };
            match result {
                Ok(()) => called += 1,
                Err(e) => {
                    tracing::warn!(
                        event_type = %event.event_type(),
                        error = %e,
                        "Event handler failed"
                    );
                    failures.push(format!(
                        "Handler error for {} event: {e}",
                        event.event_type()
                    ));
                }
            }
        }

        called
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MessageEvent;
    use crate::model::{Message, MessageRole};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn message_event() -> SessionEvent {
        SessionEvent::Message(MessageEvent {
            timestamp: Utc::now(),
            session_id: "s".to_string(),
            agent_id: None,
            message: Message {
                uuid: "u1".to_string(),
                parent_uuid: None,
                timestamp: Utc::now(),
                role: MessageRole::User,
                content: vec![],
                session_id: "s".to_string(),
                agent_id: None,
                is_sidechain: false,
                model: None,
                cwd: None,
                git_branch: None,
            },
        })
    }

    #[tokio::test]
    async fn test_typed_handler_receives_matching_events() {
        let mut emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        emitter.on(EventType::Message, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        emitter.emit(&message_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wildcard_handler_receives_all() {
        let mut emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        emitter.on_any(move |e| {
            s.lock().unwrap().push(e.event_type());
            Ok(())
        });

        emitter.emit(&message_event()).await;
        assert_eq!(*seen.lock().unwrap(), vec![EventType::Message]);
    }

    #[tokio::test]
    async fn test_registration_order_preserved() {
        let mut emitter = EventEmitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let o = order.clone();
            emitter.on(EventType::Message, move |_| {
                o.lock().unwrap().push(i);
                Ok(())
            });
        }

        emitter.emit(&message_event()).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_dispatch() {
        let mut emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        emitter.on(EventType::Message, |_| Err("boom".into()));
        let c = count.clone();
        emitter.on(EventType::Message, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let e = errors.clone();
        emitter.on(EventType::Error, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        emitter.emit(&message_event()).await;

        // The second handler still ran, and an error event was synthesized.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_stays_registered() {
        let mut emitter = EventEmitter::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let a = attempts.clone();
        emitter.on(EventType::Message, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            Err("always fails".into())
        });

        emitter.emit(&message_event()).await;
        emitter.emit(&message_event()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_error_handler_does_not_recurse() {
        let mut emitter = EventEmitter::new();
        emitter.on(EventType::Message, |_| Err("boom".into()));
        emitter.on(EventType::Error, |_| Err("error handler broken too".into()));

        // Must terminate.
        emitter.emit(&message_event()).await;
    }

    #[tokio::test]
    async fn test_async_handler_awaited() {
        let mut emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        emitter.on_async(EventType::Message, move |_event| {
            let c = c.clone();
            async move {
                tokio::task::yield_now().await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        emitter.emit(&message_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_count_and_has_handlers() {
        let mut emitter = EventEmitter::new();
        assert_eq!(emitter.handler_count(), 0);
        assert!(!emitter.has_handlers(EventType::Message));

        emitter.on(EventType::Message, |_| Ok(()));
        emitter.on_any(|_| Ok(()));

        assert_eq!(emitter.handler_count(), 2);
        assert!(emitter.has_handlers(EventType::Message));
        // Wildcard makes every type "handled".
        assert!(emitter.has_handlers(EventType::SessionEnd));
    }
}
