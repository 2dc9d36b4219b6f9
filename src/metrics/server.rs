//! HTTP server exposing metrics for Prometheus scraping.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::collector::MetricsCollector;

/// Content type for the Prometheus text exposition format.
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Configuration for the metrics server.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

/// HTTP server serving `GET /metrics` and `GET /health`.
pub struct MetricsServer {
    config: MetricsServerConfig,
    collector: Arc<MetricsCollector>,
    cancel: CancellationToken,
}

impl MetricsServer {
    #[must_use]
    pub fn new(collector: Arc<MetricsCollector>, cancel: CancellationToken) -> Self {
        Self {
            config: MetricsServerConfig::default(),
            collector,
            cancel,
        }
    }

    /// Set the server configuration (builder pattern).
    #[must_use]
    pub fn with_config(mut self, config: MetricsServerConfig) -> Self {
        self.config = config;
        self
    }

    /// The configured bind address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Build the axum router.
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/metrics", get(get_metrics))
            .route("/health", get(get_health))
            .with_state(self.collector.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(self) -> std::io::Result<()> {
        let addr = self.address();
        let cancel = self.cancel.clone();
        let app = self.build_router();

        tracing::info!(address = %addr, "Starting metrics server");
        let listener = TcpListener::bind(&addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("Metrics server shutting down");
            })
            .await
    }
}

async fn get_metrics(State(collector): State<Arc<MetricsCollector>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        collector.to_prometheus_text(),
    )
}

async fn get_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsServerConfig::default();
        assert_eq!(config.port, 9090);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_address() {
        let server = MetricsServer::new(
            Arc::new(MetricsCollector::new()),
            CancellationToken::new(),
        )
        .with_config(MetricsServerConfig {
            host: "127.0.0.1".to_string(),
            port: 19999,
        });
        assert_eq!(server.address(), "127.0.0.1:19999");
    }

    #[test]
    fn test_build_router() {
        let server = MetricsServer::new(
            Arc::new(MetricsCollector::new()),
            CancellationToken::new(),
        );
        let _router = server.build_router();
    }

    #[tokio::test]
    async fn test_serves_metrics_and_health() {
        let collector = Arc::new(MetricsCollector::new());
        let cancel = CancellationToken::new();
        let server = MetricsServer::new(collector, cancel.clone()).with_config(
            MetricsServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = server.build_router();
        let serve_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
                .await
                .unwrap();
        });

        let client = reqwest::Client::new();
        let health = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), 200);
        assert_eq!(health.text().await.unwrap(), "ok");

        let metrics = client
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .unwrap();
        assert_eq!(metrics.status(), 200);
        assert!(metrics
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert!(metrics.text().await.unwrap().contains("# TYPE active_sessions gauge"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
