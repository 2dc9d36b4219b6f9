//! Metric accumulation from the event stream.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::events::SessionEvent;

use super::types::{Counter, Gauge, Histogram, DEFAULT_DURATION_BUCKETS};

/// Time constant for the per-minute rate estimators, in seconds.
const RATE_WINDOW_SECS: f64 = 60.0;

/// Exponentially decayed event rate, computed on read.
#[derive(Debug)]
struct RateEstimator {
    weight: f64,
    last_update: Instant,
}

impl RateEstimator {
    fn new() -> Self {
        Self {
            weight: 0.0,
            last_update: Instant::now(),
        }
    }

    fn decay_to(&mut self, now: Instant) {
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.weight *= (-dt / RATE_WINDOW_SECS).exp();
        self.last_update = now;
    }

    fn record(&mut self) {
        self.decay_to(Instant::now());
        self.weight += 1.0;
    }

    /// Events per minute over the decay window.
    fn per_minute(&mut self) -> f64 {
        self.decay_to(Instant::now());
        self.weight * 60.0 / RATE_WINDOW_SECS
    }
}

/// Collects Prometheus-compatible metrics from session events.
///
/// Register via `watcher.on_any(move |e| { metrics.handle_event(e); Ok(()) })`.
pub struct MetricsCollector {
    pub messages_total: Counter,
    pub tool_calls_total: Counter,
    pub tool_errors_total: Counter,
    pub session_starts_total: Counter,
    pub session_ends_total: Counter,
    pub parse_errors_total: Counter,
    pub webhook_drop_total: Counter,
    pub active_sessions: Gauge,
    pub tool_duration_seconds: Histogram,
    pub session_duration_seconds: Histogram,

    message_rate: Mutex<RateEstimator>,
    tool_rate: Mutex<RateEstimator>,
    /// session_id -> (project_slug, start instant); session_end events carry
    /// no slug, so it is remembered from session_start.
    session_projects: Mutex<HashMap<String, (String, Instant)>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages_total: Counter::new("messages_total", "Total messages processed", &["role"]),
            tool_calls_total: Counter::new(
                "tool_calls_total",
                "Total tool invocations",
                &["tool", "category"],
            ),
            tool_errors_total: Counter::new(
                "tool_errors_total",
                "Tool calls that completed with an error",
                &["tool"],
            ),
            session_starts_total: Counter::new(
                "session_starts_total",
                "Sessions started",
                &["project"],
            ),
            session_ends_total: Counter::new(
                "session_ends_total",
                "Sessions ended",
                &["project", "reason"],
            ),
            parse_errors_total: Counter::new("parse_errors_total", "Entries that failed to parse", &[]),
            webhook_drop_total: Counter::new(
                "webhook_drop_total",
                "Webhook batches dropped",
                &["kind"],
            ),
            active_sessions: Gauge::new("active_sessions", "Sessions currently active or idle"),
            tool_duration_seconds: Histogram::new(
                "tool_duration_seconds",
                "Tool call duration in seconds",
                &["tool"],
                DEFAULT_DURATION_BUCKETS,
            ),
            session_duration_seconds: Histogram::new(
                "session_duration_seconds",
                "Session duration in seconds",
                &[],
                &[60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0],
            ),
            message_rate: Mutex::new(RateEstimator::new()),
            tool_rate: Mutex::new(RateEstimator::new()),
            session_projects: Mutex::new(HashMap::new()),
        }
    }

    /// Update metrics from one event.
    pub fn handle_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Message(e) => {
                self.messages_total.inc(&[e.message.role.as_str()]);
                self.message_rate.lock().expect("rate poisoned").record();
            }
            SessionEvent::ToolUse(e) => {
                self.tool_calls_total.inc(&[&e.tool_name, e.tool_category]);
                self.tool_rate.lock().expect("rate poisoned").record();
            }
            SessionEvent::ToolCallCompleted(e) => {
                self.tool_duration_seconds
                    .observe(e.duration.as_secs_f64(), &[&e.tool_name]);
                if e.is_error {
                    self.tool_errors_total.inc(&[&e.tool_name]);
                }
            }
            SessionEvent::Error(_) => {
                self.parse_errors_total.inc(&[]);
            }
            SessionEvent::SessionStart(e) => {
                self.session_starts_total.inc(&[&e.project_slug]);
                self.active_sessions.add(1.0);
                self.session_projects
                    .lock()
                    .expect("projects poisoned")
                    .insert(e.session_id.clone(), (e.project_slug.clone(), Instant::now()));
            }
            SessionEvent::SessionEnd(e) => {
                let entry = self
                    .session_projects
                    .lock()
                    .expect("projects poisoned")
                    .remove(&e.session_id);
                let project = entry.as_ref().map_or("", |(slug, _)| slug.as_str());
                self.session_ends_total.inc(&[project, e.reason.as_str()]);
                self.active_sessions.add(-1.0);
                if let Some((_, started)) = entry {
                    self.session_duration_seconds
                        .observe(started.elapsed().as_secs_f64(), &[]);
                }
            }
            SessionEvent::ToolResult(_)
            | SessionEvent::SessionIdle(_)
            | SessionEvent::SessionResume(_) => {}
        }
    }

    /// Exponentially weighted message rate per minute.
    #[must_use]
    pub fn messages_per_minute(&self) -> f64 {
        self.message_rate.lock().expect("rate poisoned").per_minute()
    }

    /// Exponentially weighted tool call rate per minute.
    #[must_use]
    pub fn tools_per_minute(&self) -> f64 {
        self.tool_rate.lock().expect("rate poisoned").per_minute()
    }

    /// Fraction of tool calls that errored; 0 when none were made.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let calls = self.tool_calls_total.total();
        if calls == 0 {
            return 0.0;
        }
        self.tool_errors_total.total() as f64 / calls as f64
    }

    /// Render every metric in the Prometheus text exposition format.
    #[must_use]
    pub fn to_prometheus_text(&self) -> String {
        let sections = [
            self.messages_total.render(),
            self.tool_calls_total.render(),
            self.tool_errors_total.render(),
            self.session_starts_total.render(),
            self.session_ends_total.render(),
            self.parse_errors_total.render(),
            self.webhook_drop_total.render(),
            self.active_sessions.render(),
            self.tool_duration_seconds.render(),
            self.session_duration_seconds.render(),
        ];
        let mut text = sections.join("\n\n");
        text.push('\n');
        text
    }
}
