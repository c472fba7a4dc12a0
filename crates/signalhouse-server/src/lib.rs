// signalhouse-server - OTLP ingress and pipeline wiring
//
// Runs the gRPC and HTTP listeners, the metrics exporter, the background
// loops (adaptive sampling tick, stale-state sweeps, rule reload) and
// orchestrates graceful shutdown:
//   listeners drain -> final buffer flush -> loops cancelled -> clients closed.

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use signalhouse_config::{Compression, RuntimeConfig, TenancyConfig};
use signalhouse_rules::{
    load_rules, sink_http_client, AlertSink, AlertmanagerSink, RuleEngine, SlackSink, WebhookSink,
};
use signalhouse_sampler::{
    AdaptiveSettings, LimiterSettings, Sampler, SamplerSettings, TenantLimit, TenantLimiter,
};
use signalhouse_state::StateStore;
use signalhouse_writer::{BatchWriter, WriterConfig};
use serde_json::json;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod grpc;
mod http;
mod pipeline;
mod telemetry;

pub use pipeline::{IngestSummary, Pipeline};

use http::{handle_logs, handle_metrics, handle_traces, health_check, ready_check};

/// How often the adaptive sampling controller ticks.
const ADJUST_INTERVAL: Duration = Duration::from_secs(1);

/// Sweep cadence and staleness threshold for tenant state.
const TENANT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const TENANT_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Sweep cadence and staleness threshold for metric baselines.
const BASELINE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const BASELINE_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Application state shared across all HTTP requests
#[derive(Clone)]
pub(crate) struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub writer: Arc<BatchWriter>,
    pub state_store: StateStore,
    pub tenancy: TenancyConfig,
    pub max_body_bytes: usize,
}

/// Error type that implements IntoResponse
pub(crate) struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request error: {:?}", self.error);
        }
        (
            self.status,
            Json(json!({
                "error": self.error.to_string(),
            })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn bad_request(error: anyhow::Error) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, error)
    }
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Entry point: run the gateway until a shutdown signal arrives.
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    telemetry::init_tracing(&config.server);

    let metrics_addr: SocketAddr = config
        .server
        .metrics_addr
        .parse()
        .context("Invalid metrics listen address")?;
    telemetry::init_metrics(metrics_addr)?;
    info!(%metrics_addr, "Prometheus exposition enabled");

    // Shared state store; unreachable is a fatal startup error
    let state_store = StateStore::new(&config.state_store.url, &config.state_store.key_prefix)?;
    state_store
        .connect()
        .await
        .context("Failed to connect to the shared state store")?;
    info!(url = %config.state_store.url, "State store connected");

    // Columnar store client; the startup ping is mandatory
    let client = build_clickhouse_client(&config);
    let writer = Arc::new(BatchWriter::new(
        client,
        WriterConfig {
            max_rows: config.batch.max_rows,
            max_bytes: config.batch.max_bytes,
            hard_cap_rows: config.batch.hard_cap_rows,
            flush_interval: config.batch.flush_interval,
            insert_timeout: config.batch.insert_timeout,
        },
    ));
    writer
        .ping()
        .await
        .context("Columnar store ping failed at startup")?;
    info!(url = %config.clickhouse.url, database = %config.clickhouse.database, "Columnar store connected");

    // Two shutdown phases: listeners/loops first, flushers after the drain
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (flush_tx, flush_rx) = watch::channel(false);

    let flusher_handles = writer.spawn_flushers(flush_rx);

    // Sampler and limiter
    let limiter = TenantLimiter::new(LimiterSettings {
        enabled: config.rate_limit.enabled,
        default_rps: config.rate_limit.default_rps,
        default_burst: config.rate_limit.default_burst,
        overrides: config
            .rate_limit
            .overrides
            .iter()
            .map(|(tenant, ov)| {
                (
                    tenant.clone(),
                    TenantLimit {
                        rps: ov.rps,
                        burst: ov.burst,
                    },
                )
            })
            .collect(),
    });
    let sampler = Sampler::new(SamplerSettings {
        enabled: config.sampling.enabled,
        default_rate: config.sampling.default_rate,
        slow_threshold_ms: config.sampling.slow_threshold_ms,
        z_score_threshold: config.sampling.z_score_threshold,
        adaptive: AdaptiveSettings {
            enabled: config.sampling.adaptive.enabled,
            target_eps: config.sampling.adaptive.target_eps,
            min_rate: config.sampling.adaptive.min_rate,
            max_rate: config.sampling.adaptive.max_rate,
        },
    });

    // Rule engine with configured sinks
    let rules_path = config.alerting.rules_path.as_ref().map(PathBuf::from);
    let rule_engine = if config.alerting.enabled {
        let engine = Arc::new(RuleEngine::new(
            state_store.clone(),
            build_sinks(&config)?,
            config.alerting.labels.clone(),
        ));
        if let Some(path) = &rules_path {
            match load_rules(path) {
                Ok(rules) => {
                    info!(count = rules.len(), path = %path.display(), "Alert rules loaded");
                    engine.replace_rules(rules);
                }
                Err(e) => warn!(error = %e, "Failed to load alert rules; starting with none"),
            }
        } else {
            info!("No rules_path configured; rule engine idle");
        }
        Some(engine)
    } else {
        info!("Alerting disabled by configuration");
        None
    };

    let pipeline = Arc::new(Pipeline::new(
        limiter,
        sampler,
        Arc::clone(&writer),
        rule_engine.clone(),
        config.sampling.slow_threshold_ms,
    ));

    spawn_background_loops(
        Arc::clone(&pipeline),
        rule_engine,
        rules_path,
        config.alerting.reload_interval,
        shutdown_rx.clone(),
    );

    // HTTP ingress
    let state = AppState {
        pipeline: Arc::clone(&pipeline),
        writer: Arc::clone(&writer),
        state_store: state_store.clone(),
        tenancy: config.tenancy.clone(),
        max_body_bytes: config.server.max_body_bytes,
    };

    let app = Router::new()
        .route("/v1/traces", post(handle_traces))
        .route("/v1/logs", post(handle_logs))
        .route("/v1/metrics", post(handle_metrics))
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let http_addr = config.server.http_addr.clone();
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", http_addr))?;

    let mut http_shutdown = shutdown_rx.clone();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await
    });

    // gRPC ingress
    let grpc_addr: SocketAddr = config
        .server
        .grpc_addr
        .parse()
        .context("Invalid gRPC listen address")?;
    let grpc_handle = tokio::spawn(grpc::serve(
        grpc_addr,
        Arc::clone(&pipeline),
        config.tenancy.clone(),
        config.server.grpc_max_message_bytes,
        shutdown_rx.clone(),
    ));

    info!("OTLP HTTP endpoint listening on http://{}", http_addr);
    info!("OTLP gRPC endpoint listening on {}", grpc_addr);
    info!("Press Ctrl+C or send SIGTERM to stop");

    shutdown_signal().await;

    // Phase 1: stop accepting, drain in-flight requests
    let _ = shutdown_tx.send(true);
    let drain = config.server.shutdown_drain;
    if tokio::time::timeout(drain, async {
        let _ = http_handle.await;
        let _ = grpc_handle.await;
    })
    .await
    .is_err()
    {
        warn!(?drain, "Listener drain exceeded the deadline; proceeding");
    }

    // Phase 2: final flush of every table
    writer.begin_shutdown();
    let _ = flush_tx.send(true);
    for handle in flusher_handles {
        let _ = handle.await;
    }
    info!("Final buffer flush complete");

    // Phase 3: close clients
    state_store.quit().await;

    info!("Server shutdown complete");
    Ok(())
}

fn build_clickhouse_client(config: &RuntimeConfig) -> clickhouse::Client {
    let ch = &config.clickhouse;
    let mut client = clickhouse::Client::default()
        .with_url(&ch.url)
        .with_database(&ch.database)
        .with_user(&ch.username);

    if !ch.password.is_empty() {
        client = client.with_password(&ch.password);
    }

    client.with_compression(match ch.compression {
        Compression::None => clickhouse::Compression::None,
        Compression::Lz4 => clickhouse::Compression::Lz4,
    })
}

fn build_sinks(config: &RuntimeConfig) -> Result<Vec<Arc<dyn AlertSink>>> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
    let alerting = &config.alerting;

    if alerting.webhook_url.is_none()
        && alerting.alertmanager_url.is_none()
        && alerting.slack_webhook_url.is_none()
    {
        return Ok(sinks);
    }

    let client = sink_http_client().context("Failed to build sink HTTP client")?;

    if let Some(url) = &alerting.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(client.clone(), url.clone())));
    }
    if let Some(url) = &alerting.alertmanager_url {
        sinks.push(Arc::new(AlertmanagerSink::new(client.clone(), url.clone())));
    }
    if let Some(url) = &alerting.slack_webhook_url {
        sinks.push(Arc::new(SlackSink::new(client, url.clone())));
    }

    info!(count = sinks.len(), "Alert sinks configured");
    Ok(sinks)
}

/// Spawn the adaptive tick, the stale-state sweeps and the rule reload loop.
/// Every loop exits when the shutdown signal fires.
fn spawn_background_loops(
    pipeline: Arc<Pipeline>,
    rule_engine: Option<Arc<RuleEngine>>,
    rules_path: Option<PathBuf>,
    reload_interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    {
        let pipeline = Arc::clone(&pipeline);
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ADJUST_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => pipeline.sampler().adjust_tick(),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    {
        let pipeline = Arc::clone(&pipeline);
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TENANT_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pipeline.limiter().sweep_stale(TENANT_STALE_AFTER);
                        pipeline.sampler().sweep_stale(TENANT_STALE_AFTER);
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    {
        let pipeline = Arc::clone(&pipeline);
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BASELINE_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pipeline.sampler().sweep_baselines(BASELINE_STALE_AFTER);
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    if let (Some(engine), Some(path)) = (rule_engine, rules_path) {
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reload_interval);
            ticker.tick().await; // rules were loaded at startup
            loop {
                tokio::select! {
                    _ = ticker.tick() => reload_rules(&engine, &path),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }
}

/// A failed reload keeps the previous rule set.
fn reload_rules(engine: &RuleEngine, path: &Path) {
    match load_rules(path) {
        Ok(rules) => {
            engine.replace_rules(rules);
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Rule reload failed; keeping previous rules");
        }
    }
}
