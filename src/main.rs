//! Claude Watch - Realtime monitoring of Claude Code session transcripts.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_watch::config::WatcherConfig;
use claude_watch::events::EventType;
use claude_watch::filters::{self, EventFilter};
use claude_watch::format::{format_event, OutputFormat};
use claude_watch::live::RetentionPolicy;
use claude_watch::metrics::{MetricsCollector, MetricsServer, MetricsServerConfig};
use claude_watch::watcher::{SessionWatcher, WatcherHandle};
use claude_watch::webhook::{WebhookConfig, WebhookDispatcher};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RetentionArg {
    Full,
    Sliding,
    None,
}

impl From<RetentionArg> for RetentionPolicy {
    fn from(arg: RetentionArg) -> Self {
        match arg {
            RetentionArg::Full => RetentionPolicy::Full,
            RetentionArg::Sliding => RetentionPolicy::Sliding,
            RetentionArg::None => RetentionPolicy::None,
        }
    }
}

/// Options shared by the watch and metrics subcommands.
#[derive(Debug, clap::Args)]
struct WatchOptions {
    /// Base Claude directory.
    #[arg(long)]
    base_path: Option<PathBuf>,
    /// Poll interval in seconds.
    #[arg(long, default_value_t = 0.5)]
    poll_interval: f64,
    /// Seconds of inactivity before a session is idle.
    #[arg(long, default_value_t = 120.0)]
    idle_timeout: f64,
    /// Seconds of idleness before a session ends.
    #[arg(long, default_value_t = 300.0)]
    end_timeout: f64,
    /// Skip pre-existing file content, tailing from the end.
    #[arg(long)]
    no_process_existing: bool,
    /// Suppress session lifecycle events.
    #[arg(long)]
    no_session_events: bool,
    /// Keep oversized tool inputs intact.
    #[arg(long)]
    no_truncate_inputs: bool,
    /// Maximum tool input string length before truncation.
    #[arg(long, default_value_t = 1024)]
    max_input_length: usize,
    /// Persist tailer positions to this file.
    #[arg(long)]
    state_file: Option<PathBuf>,
    /// Seconds between state auto-saves.
    #[arg(long, default_value_t = 30.0)]
    save_interval: f64,
    /// Message retention policy for live sessions.
    #[arg(long, value_enum, default_value_t = RetentionArg::Full)]
    retention: RetentionArg,
    /// Per-thread message cap under sliding retention.
    #[arg(long, default_value_t = 1000)]
    max_messages: usize,
}

impl WatchOptions {
    fn to_config(&self) -> WatcherConfig {
        let mut config = WatcherConfig {
            poll_interval: Duration::from_secs_f64(self.poll_interval),
            idle_timeout: Duration::from_secs_f64(self.idle_timeout),
            end_timeout: Duration::from_secs_f64(self.end_timeout),
            process_existing: !self.no_process_existing,
            emit_session_events: !self.no_session_events,
            truncate_inputs: !self.no_truncate_inputs,
            max_input_length: self.max_input_length,
            state_file: self.state_file.clone(),
            save_interval: Duration::from_secs_f64(self.save_interval),
            retention_policy: self.retention.into(),
            max_messages: self.max_messages,
            ..Default::default()
        };
        if let Some(base_path) = &self.base_path {
            config.base_path = base_path.clone();
        }
        config
    }
}

#[derive(Parser)]
#[command(
    name = "claude-watch",
    about = "Realtime monitoring of Claude Code sessions",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch sessions and print events.
    Watch {
        #[command(flatten)]
        options: WatchOptions,

        /// Output format.
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,

        /// Only events from this project slug's sessions.
        #[arg(long)]
        project: Option<String>,
        /// Only events from this session id (prefix allowed).
        #[arg(long)]
        session: Option<String>,
        /// Only these event types (comma-separated).
        #[arg(long, value_delimiter = ',')]
        event_type: Option<Vec<String>>,
        /// Only these tool names (comma-separated).
        #[arg(long, value_delimiter = ',')]
        tool: Option<Vec<String>>,
        /// Only these tool categories (comma-separated).
        #[arg(long, value_delimiter = ',')]
        category: Option<Vec<String>>,
        /// Only error events and failed tool calls.
        #[arg(long)]
        errors_only: bool,
        /// Only sub-agent events.
        #[arg(long, conflicts_with = "main_only")]
        agents_only: bool,
        /// Only main-thread events.
        #[arg(long)]
        main_only: bool,

        /// Deliver events to this webhook URL (repeatable).
        #[arg(long)]
        webhook: Vec<String>,
        /// Webhook header as "Name: value" (repeatable, applies to all).
        #[arg(long)]
        webhook_header: Vec<String>,
        /// Events per webhook batch.
        #[arg(long, default_value_t = 10)]
        webhook_batch_size: usize,
        /// Seconds before an incomplete batch is flushed.
        #[arg(long, default_value_t = 5.0)]
        webhook_batch_timeout: f64,
        /// Retry attempts for failed webhook deliveries.
        #[arg(long, default_value_t = 3)]
        webhook_max_retries: u32,

        /// Also serve Prometheus metrics on this port.
        #[arg(long)]
        metrics_port: Option<u16>,
        /// Bind address for the metrics server.
        #[arg(long, default_value = "0.0.0.0")]
        metrics_host: String,
    },
    /// Serve Prometheus metrics for watched sessions.
    Metrics {
        #[command(flatten)]
        options: WatchOptions,

        /// Port to listen on.
        #[arg(long, default_value_t = 9090)]
        port: u16,
        /// Address to bind to.
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[allow(clippy::too_many_arguments)]
fn build_filter(
    project: Option<String>,
    session: Option<String>,
    event_type: Option<Vec<String>>,
    tool: Option<Vec<String>>,
    category: Option<Vec<String>>,
    errors_only: bool,
    agents_only: bool,
    main_only: bool,
) -> Result<Option<EventFilter>, String> {
    let mut parts: Vec<EventFilter> = Vec::new();

    if let Some(slug) = project {
        parts.push(filters::project(slug));
    }
    if let Some(id) = session {
        parts.push(filters::session_prefix(id));
    }
    if let Some(types) = event_type {
        let mut parsed = Vec::new();
        for name in &types {
            let ty =
                EventType::parse(name).ok_or_else(|| format!("unknown event type: {name}"))?;
            parsed.push(ty);
        }
        parts.push(filters::event_type(parsed));
    }
    if let Some(names) = tool {
        parts.push(filters::tool_name(names));
    }
    if let Some(categories) = category {
        parts.push(filters::tool_category(categories));
    }
    if errors_only {
        parts.push(filters::has_error());
    }
    if agents_only {
        parts.push(filters::agent());
    }
    if main_only {
        parts.push(filters::main_thread());
    }

    Ok(if parts.is_empty() {
        None
    } else {
        Some(filters::and_(parts))
    })
}

fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>, String> {
    let mut headers = HashMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| format!("invalid header (expected \"Name: value\"): {entry}"))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

fn spawn_metrics_server(collector: Arc<MetricsCollector>, host: String, port: u16) {
    let server = MetricsServer::new(collector, CancellationToken::new())
        .with_config(MetricsServerConfig { host, port });
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            eprintln!("metrics server error: {e}");
            std::process::exit(1);
        }
    });
}

fn spawn_signal_handler(handle: WatcherHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt, shutting down");
            handle.stop();
        }
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Watch {
            options,
            format,
            project,
            session,
            event_type,
            tool,
            category,
            errors_only,
            agents_only,
            main_only,
            webhook,
            webhook_header,
            webhook_batch_size,
            webhook_batch_timeout,
            webhook_max_retries,
            metrics_port,
            metrics_host,
        } => {
            let filter = match build_filter(
                project, session, event_type, tool, category, errors_only, agents_only, main_only,
            ) {
                Ok(filter) => filter,
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(2);
                }
            };
            let headers = match parse_headers(&webhook_header) {
                Ok(headers) => headers,
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(2);
                }
            };

            let mut watcher = SessionWatcher::new(options.to_config());
            let output_format: OutputFormat = format.into();

            // Formatted output, through the filter when one is configured.
            let output_filter = filter.clone();
            watcher.on_any(move |event| {
                if output_filter.as_ref().is_none_or(|f| f(event)) {
                    println!("{}", format_event(event, output_format));
                }
                Ok(())
            });

            let collector = Arc::new(MetricsCollector::new());
            let metrics = collector.clone();
            watcher.on_any(move |event| {
                metrics.handle_event(event);
                Ok(())
            });
            if let Some(port) = metrics_port {
                spawn_metrics_server(collector.clone(), metrics_host, port);
            }

            let mut dispatcher = None;
            if !webhook.is_empty() {
                let mut d = WebhookDispatcher::new()
                    .with_drop_counter(collector.webhook_drop_total.clone());
                for url in webhook {
                    d.add_webhook(WebhookConfig {
                        headers: headers.clone(),
                        batch_size: webhook_batch_size,
                        batch_timeout: Duration::from_secs_f64(webhook_batch_timeout),
                        max_retries: webhook_max_retries,
                        filter: filter.clone(),
                        ..WebhookConfig::new(url)
                    });
                }
                let d = Arc::new(d);
                let sink = d.clone();
                watcher.on_any(move |event| {
                    sink.handle_event(event);
                    Ok(())
                });
                dispatcher = Some(d);
            }

            spawn_signal_handler(watcher.handle());

            if let Err(e) = watcher.run().await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
            // Watcher handlers are dropped with the watcher, releasing the
            // dispatcher for the draining shutdown.
            drop(watcher);
            if let Some(dispatcher) = dispatcher {
                if let Ok(dispatcher) = Arc::try_unwrap(dispatcher) {
                    dispatcher.shutdown().await;
                }
            }
        }
        Commands::Metrics { options, port, host } => {
            let mut watcher = SessionWatcher::new(options.to_config());

            let collector = Arc::new(MetricsCollector::new());
            let metrics = collector.clone();
            watcher.on_any(move |event| {
                metrics.handle_event(event);
                Ok(())
            });

            spawn_metrics_server(collector, host, port);
            spawn_signal_handler(watcher.handle());

            if let Err(e) = watcher.run().await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
    }
}
