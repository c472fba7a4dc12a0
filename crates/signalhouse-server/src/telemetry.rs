//! Logging and metrics exposition setup.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use signalhouse_config::{LogFormat, ServerConfig};
use std::net::SocketAddr;

/// Initialize tracing from server config.
pub(crate) fn init_tracing(config: &ServerConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format {
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
        LogFormat::Text => {
            registry.with(fmt::layer()).init();
        }
    }
}

/// Install the Prometheus exporter on the metrics port and register metric
/// descriptions. Must run inside the tokio runtime.
pub(crate) fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    describe_counter!(
        "ingestion_requests_total",
        "OTLP requests received, by signal type, protocol and outcome"
    );
    describe_counter!("ingestion_bytes_total", "OTLP payload bytes received");
    describe_histogram!(
        "ingestion_latency_seconds",
        "Request handling latency per signal type and protocol"
    );
    describe_counter!(
        "ingestion_data_points_total",
        "Records decoded from accepted requests, per tenant"
    );
    describe_counter!(
        "dropped_records_total",
        "Records dropped during decoding, by reason"
    );
    describe_counter!("rate_limit_hits_total", "Admissions denied by the token bucket");
    describe_counter!("rate_limit_allowed_total", "Admissions granted by the token bucket");
    describe_counter!(
        "sampling_decisions_total",
        "Sampling decisions, by tenant, data type, decision and reason"
    );
    describe_gauge!("sampling_rate", "Current per-tenant sample rate");
    describe_counter!("rows_written_total", "Rows persisted to the columnar store");
    describe_counter!(
        "batches_written_total",
        "Batch inserts submitted, by table and status"
    );
    describe_histogram!("write_latency_seconds", "Batch insert latency per table");
    describe_histogram!("batch_size", "Rows per submitted batch");
    describe_gauge!("buffer_size", "Rows currently buffered per table");
    describe_counter!(
        "buffer_dropped_rows_total",
        "Rows dropped because a buffer hit its hard cap"
    );
    describe_counter!(
        "rules_evaluated_total",
        "Rule evaluation passes, by stream type and status"
    );
    describe_counter!("alerts_fired_total", "Alerts fired, by rule and severity");
    describe_histogram!(
        "rule_evaluation_latency_seconds",
        "Rule evaluation latency per stream type"
    );

    Ok(())
}
