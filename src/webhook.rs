//! Queued, batched, retrying HTTP delivery of events.
//!
//! Each configured endpoint gets its own worker task that flushes a batch
//! when it reaches `batch_size` or when `batch_timeout` has elapsed since
//! the first buffered event. 5xx and network failures retry with
//! exponential backoff; 4xx responses drop the batch after one attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::SessionEvent;
use crate::filters::EventFilter;
use crate::metrics::Counter;

/// Connection timeout for webhook requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall request timeout for webhook requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-endpoint queue capacity; events past this are dropped.
const QUEUE_CAPACITY: usize = 10_000;

/// Configuration for one webhook endpoint.
#[derive(Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Only matching events are delivered; `None` delivers everything.
    pub filter: Option<EventFilter>,
}

impl WebhookConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            batch_size: 10,
            batch_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            filter: None,
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("batch_size", &self.batch_size)
            .field("batch_timeout", &self.batch_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

/// Delivery statistics for one endpoint.
#[derive(Debug, Default)]
pub struct EndpointStats {
    pub batches_sent: AtomicU64,
    pub batches_dropped: AtomicU64,
    pub events_filtered: AtomicU64,
    pub events_dropped_queue_full: AtomicU64,
}

struct Endpoint {
    config: WebhookConfig,
    sender: mpsc::Sender<Value>,
    stats: Arc<EndpointStats>,
    worker: JoinHandle<()>,
}

/// Dispatches events to webhook endpoints with batching and retry.
pub struct WebhookDispatcher {
    endpoints: Vec<Endpoint>,
    client: Client,
    drop_counter: Option<Counter>,
}

impl WebhookDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            client: build_http_client(),
            drop_counter: None,
        }
    }

    /// Attach a `webhook_drop_total{kind}` counter for drop accounting.
    #[must_use]
    pub fn with_drop_counter(mut self, counter: Counter) -> Self {
        self.drop_counter = Some(counter);
        self
    }

    /// Add an endpoint and spawn its delivery worker.
    pub fn add_webhook(&mut self, config: WebhookConfig) {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let stats = Arc::new(EndpointStats::default());
        let worker = tokio::spawn(dispatch_loop(
            config.clone(),
            receiver,
            self.client.clone(),
            stats.clone(),
            self.drop_counter.clone(),
        ));
        tracing::debug!(url = %config.url, "Added webhook endpoint");
        self.endpoints.push(Endpoint {
            config,
            sender,
            stats,
            worker,
        });
    }

    /// Number of configured endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Queue an event for delivery to every matching endpoint.
    ///
    /// Serialization happens here so workers own plain JSON values. This is
    /// non-blocking; a full queue drops the event with a warning.
    pub fn handle_event(&self, event: &SessionEvent) {
        if self.endpoints.is_empty() {
            return;
        }
        let serialized = event.to_json();

        for endpoint in &self.endpoints {
            if let Some(filter) = &endpoint.config.filter {
                if !filter(event) {
                    endpoint.stats.events_filtered.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
            if endpoint.sender.try_send(serialized.clone()).is_err() {
                endpoint
                    .stats
                    .events_dropped_queue_full
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(url = %endpoint.config.url, "Webhook queue full, dropping event");
            }
        }
    }

    /// Per-endpoint statistics, keyed by URL.
    #[must_use]
    pub fn stats(&self) -> HashMap<String, Arc<EndpointStats>> {
        self.endpoints
            .iter()
            .map(|e| (e.config.url.clone(), e.stats.clone()))
            .collect()
    }

    /// Stop accepting events and drain the queues.
    ///
    /// Each worker gets a grace period of twice its batch timeout to flush.
    pub async fn shutdown(self) {
        for endpoint in self.endpoints {
            let grace = endpoint.config.batch_timeout * 2;
            drop(endpoint.sender);
            if tokio::time::timeout(grace, endpoint.worker).await.is_err() {
                tracing::warn!(
                    url = %endpoint.config.url,
                    "Webhook worker did not drain within grace period"
                );
            }
            let stats = endpoint.stats;
            tracing::info!(
                url = %endpoint.config.url,
                sent = stats.batches_sent.load(Ordering::Relaxed),
                dropped = stats.batches_dropped.load(Ordering::Relaxed),
                filtered = stats.events_filtered.load(Ordering::Relaxed),
                "Webhook endpoint finished"
            );
        }
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn build_http_client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("Failed to build HTTP client")
}

/// Worker loop for one endpoint.
async fn dispatch_loop(
    config: WebhookConfig,
    mut receiver: mpsc::Receiver<Value>,
    client: Client,
    stats: Arc<EndpointStats>,
    drop_counter: Option<Counter>,
) {
    let mut batch: Vec<Value> = Vec::with_capacity(config.batch_size);
    // Flush deadline, armed when the first event of a batch is buffered.
    let mut deadline: Option<tokio::time::Instant> = None;

    loop {
        let next = match deadline {
            // Nothing buffered: wait indefinitely for the first event.
            None => receiver.recv().await,
            Some(at) => match tokio::time::timeout_at(at, receiver.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    // batch_timeout elapsed since the first buffered event.
                    send_batch(&client, &config, &mut batch, &stats, drop_counter.as_ref()).await;
                    deadline = None;
                    continue;
                }
            },
        };

        match next {
            Some(event) => {
                if batch.is_empty() {
                    deadline = Some(tokio::time::Instant::now() + config.batch_timeout);
                }
                batch.push(event);
                if batch.len() >= config.batch_size {
                    send_batch(&client, &config, &mut batch, &stats, drop_counter.as_ref()).await;
                    deadline = None;
                }
            }
            None => {
                // Channel closed: flush what remains and exit.
                if !batch.is_empty() {
                    send_batch(&client, &config, &mut batch, &stats, drop_counter.as_ref()).await;
                }
                return;
            }
        }
    }
}

/// POST one batch, retrying transient failures with exponential backoff.
async fn send_batch(
    client: &Client,
    config: &WebhookConfig,
    batch: &mut Vec<Value>,
    stats: &EndpointStats,
    drop_counter: Option<&Counter>,
) {
    let events: Vec<Value> = std::mem::take(batch);
    if events.is_empty() {
        return;
    }
    let body = json!({ "events": events });
    let count = events.len();

    for attempt in 0..=config.max_retries {
        let mut request = client.post(&config.url).json(&body);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(url = %config.url, count, "Webhook batch delivered");
                stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(response) if response.status().is_client_error() => {
                // Permanent: one attempt only.
                tracing::warn!(
                    url = %config.url,
                    status = %response.status(),
                    "Webhook rejected batch, dropping"
                );
                stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(counter) = drop_counter {
                    counter.inc(&["4xx"]);
                }
                return;
            }
            Ok(response) => {
                tracing::warn!(
                    url = %config.url,
                    status = %response.status(),
                    attempt = attempt + 1,
                    "Webhook server error"
                );
            }
            Err(e) => {
                tracing::warn!(
                    url = %config.url,
                    error = %e,
                    attempt = attempt + 1,
                    "Webhook request failed"
                );
            }
        }

        if attempt < config.max_retries {
            let backoff = config.retry_backoff * 2u32.saturating_pow(attempt);
            tokio::time::sleep(backoff).await;
        }
    }

    tracing::error!(
        url = %config.url,
        count,
        attempts = config.max_retries + 1,
        "Dropping webhook batch after retries"
    );
    stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
    if let Some(counter) = drop_counter {
        counter.inc(&["retry_exhausted"]);
    }
}
