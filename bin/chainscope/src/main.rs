//! Chainscope - live Substrate chain explorer.
//!
//! # Usage
//!
//! ```bash
//! # Follow Polkadot with default settings
//! chainscope
//!
//! # Local node, bigger windows, environment overrides
//! WS_URL=ws://127.0.0.1:9944 chainscope --window-capacity 25
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};

use chainscope_core::metrics::init_metrics;
use chainscope_core::models::FeedStatus;
use chainscope_core::ports::ExplorerView;
use chainscope_core::services::{
    ConnectionConfig, DEFAULT_ENDPOINT, Explorer, ExplorerConfig, FeedConfig, PollerConfig,
};
use chainscope_graphql::{ServerConfig, build_schema, serve_with_shutdown};
use chainscope_substrate::SubstrateConnector;

/// Chainscope CLI - live Substrate chain explorer.
#[derive(Parser, Debug)]
#[command(name = "chainscope")]
#[command(about = "Chainscope - live block feed and network metrics for Substrate chains")]
#[command(version)]
struct Cli {
    /// Substrate node WebSocket URL.
    #[arg(long, env = "WS_URL", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Number of recent blocks (and extrinsics) kept in memory.
    #[arg(long, env = "WINDOW_CAPACITY", default_value = "10")]
    window_capacity: usize,

    /// Leading extrinsics recorded per accepted block.
    #[arg(long, env = "EXTRINSICS_PER_BLOCK", default_value = "3")]
    extrinsics_per_block: usize,

    /// Seconds between network metrics polls.
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "10")]
    poll_interval_secs: u64,

    /// Block time reported until it can be measured.
    #[arg(long, env = "EXPECTED_BLOCK_TIME_SECS", default_value = "6")]
    expected_block_time_secs: u64,

    /// Bound on opening the connection and on fetching chain metadata.
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value = "30")]
    connect_timeout_secs: u64,

    /// GraphQL server port.
    #[arg(long, env = "GRAPHQL_PORT", default_value = "4000")]
    graphql_port: u16,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Exit on the first connection or feed failure instead of reconnecting.
    #[arg(long, env = "NO_RECONNECT")]
    no_reconnect: bool,
}

impl Cli {
    fn explorer_config(&self) -> ExplorerConfig {
        ExplorerConfig {
            connection: ConnectionConfig {
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            },
            feed: FeedConfig {
                window_capacity: self.window_capacity,
                extrinsics_per_block: self.extrinsics_per_block,
            },
            poller: PollerConfig {
                interval: Duration::from_secs(self.poll_interval_secs),
                expected_block_time: Duration::from_secs(self.expected_block_time_secs),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => {
            match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => {
                    init_metrics();
                    true
                }
                Err(e) => {
                    warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                    false
                }
            }
        }
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Chainscope");
    debug!(endpoint = %mask_password(&cli.endpoint), "Substrate endpoint");

    let explorer = Explorer::new(Arc::new(SubstrateConnector::new()), cli.explorer_config())
        .context("Invalid configuration")?;
    let explorer = Arc::new(explorer);

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let mut graphql_shutdown_rx = shutdown_tx.subscribe();

    let graphql_config = ServerConfig {
        host: "0.0.0.0".to_string(),
        port: cli.graphql_port,
        enable_playground: true,
    };

    let view: Arc<dyn ExplorerView> = explorer.clone();
    let schema = build_schema(view);
    let graphql_port = cli.graphql_port;
    let graphql_handle = tokio::spawn(
        async move {
            let shutdown_signal = async move {
                wait_for_shutdown(&mut graphql_shutdown_rx).await;
            };

            if let Err(e) = serve_with_shutdown(schema, graphql_config, shutdown_signal).await {
                error!(error = %e, "❌ Server error");
            }
            debug!("Server stopped");
        }
        .instrument(info_span!("graphql")),
    );

    let supervisor = Supervisor {
        explorer: explorer.clone(),
        endpoint: cli.endpoint.clone(),
        reconnect: !cli.no_reconnect,
        shutdown_tx: shutdown_tx.clone(),
    };
    let supervisor_handle = tokio::spawn(supervisor.run().instrument(info_span!("explorer")));

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Chainscope ready");
    info!("   ⚡ GraphQL:  http://localhost:{}/graphql", graphql_port);
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = wait_for_shutdown(&mut shutdown_rx) => {}
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    let gave_up = match tokio::time::timeout(Duration::from_secs(10), supervisor_handle).await {
        Ok(Ok(outcome)) => outcome == SupervisorExit::GaveUp,
        Ok(Err(e)) => {
            error!(error = %e, "❌ Supervisor task failed");
            false
        }
        Err(_) => {
            warn!("⚠️  Supervisor shutdown timed out");
            false
        }
    };

    if tokio::time::timeout(Duration::from_secs(10), explorer.stop())
        .await
        .is_err()
    {
        warn!("⚠️  Explorer shutdown timed out");
    }

    match tokio::time::timeout(Duration::from_secs(10), graphql_handle).await {
        Ok(_) => debug!("GraphQL stopped"),
        Err(_) => warn!("⚠️  GraphQL shutdown timed out"),
    }

    info!("🛑 Shutdown complete");
    if gave_up {
        bail!("explorer stopped after a terminal failure (reconnect disabled)");
    }
    Ok(())
}

// =============================================================================
// Reconnect supervision
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorExit {
    Shutdown,
    GaveUp,
}

/// Keeps an explorer running against one endpoint.
///
/// The core never retries; this loop restarts it after a failed connect or a
/// failed feed, with exponential backoff.
struct Supervisor {
    explorer: Arc<Explorer>,
    endpoint: String,
    reconnect: bool,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    async fn run(self) -> SupervisorExit {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut backoff = Backoff::default();

        loop {
            let started = tokio::select! {
                result = self.explorer.start(&self.endpoint) => result,
                _ = wait_for_shutdown(&mut shutdown) => return SupervisorExit::Shutdown,
            };

            match started {
                Ok(session) => {
                    backoff.reset();
                    info!(
                        chain = %session.metadata().chain_name,
                        token = %session.metadata().properties.token_symbol,
                        "🔗 Following chain"
                    );

                    let status = tokio::select! {
                        status = self.explorer.wait_feed_terminal() => status,
                        _ = wait_for_shutdown(&mut shutdown) => return SupervisorExit::Shutdown,
                    };
                    match status {
                        Some(FeedStatus::Failed { reason }) => {
                            warn!(reason = %reason, "⚠️  Live feed failed")
                        }
                        other => debug!(status = ?other, "Live feed ended"),
                    }
                }
                Err(e) => error!(error = %e, "❌ Explorer failed to start"),
            }

            // A failed feed may sit on a dead session; always reconnect from scratch.
            self.explorer.stop().await;

            if !self.reconnect {
                let _ = self.shutdown_tx.send(true);
                return SupervisorExit::GaveUp;
            }

            let delay = backoff.next_delay();
            info!(delay = ?delay, "🔄 Reconnecting...");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => return SupervisorExit::Shutdown,
            }
        }
    }
}

/// Exponential reconnect delay.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        let initial = Duration::from_millis(500);
        Self {
            initial,
            max: Duration::from_secs(30),
            current: initial,
        }
    }
}

impl Backoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask credentials in an endpoint URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "❌ Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "❌ Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
