//! HTTP request handlers: OTLP ingestion plus health and readiness checks.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::{counter, histogram};
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use prost::Message;
use serde_json::json;
use signalhouse_core::otlp::InputFormat;
use signalhouse_core::SignalType;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::{AppError, AppState};

/// Deadline applied to the per-dependency checks on /health and /ready.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// POST /v1/traces - OTLP trace ingestion endpoint
pub(crate) async fn handle_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, AppError> {
    handle_signal(SignalType::Traces, &state, headers, body).await
}

/// POST /v1/logs - OTLP log ingestion endpoint
pub(crate) async fn handle_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, AppError> {
    handle_signal(SignalType::Logs, &state, headers, body).await
}

/// POST /v1/metrics - OTLP metrics ingestion endpoint
pub(crate) async fn handle_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, AppError> {
    handle_signal(SignalType::Metrics, &state, headers, body).await
}

async fn handle_signal(
    signal: SignalType,
    state: &AppState,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, AppError> {
    let started = Instant::now();
    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok());
    let format = InputFormat::from_content_type(content_type);

    debug!(
        signal = signal.as_str(),
        bytes = body.len(),
        ?format,
        "Received OTLP request"
    );

    counter!("ingestion_bytes_total", body.len() as u64, "type" => signal.as_str(), "protocol" => "http");

    if body.len() > state.max_body_bytes {
        request_finished(signal, "error");
        return Err(AppError::with_status(
            StatusCode::PAYLOAD_TOO_LARGE,
            anyhow::anyhow!(
                "payload {} exceeds limit {}",
                body.len(),
                state.max_body_bytes
            ),
        ));
    }

    let tenant = extract_tenant(&headers, state);

    if !state.pipeline.admit(&tenant) {
        request_finished(signal, "rate_limited");
        return Err(AppError::with_status(
            StatusCode::TOO_MANY_REQUESTS,
            anyhow::anyhow!("tenant {} exceeded its rate limit", tenant),
        ));
    }

    // Decode failures reject the whole request and count as an error
    let decode_failed = |e: AppError| {
        request_finished(signal, "error");
        e
    };

    let result = match signal {
        SignalType::Traces => {
            let request =
                decode_body::<ExportTraceServiceRequest>(&body, format).map_err(decode_failed)?;
            state
                .pipeline
                .ingest_traces(&tenant, request, body.len())
                .await;
            success_body(format, ExportTraceServiceResponse::default())
        }
        SignalType::Logs => {
            let request =
                decode_body::<ExportLogsServiceRequest>(&body, format).map_err(decode_failed)?;
            state
                .pipeline
                .ingest_logs(&tenant, request, body.len())
                .await;
            success_body(format, ExportLogsServiceResponse::default())
        }
        SignalType::Metrics => {
            let request =
                decode_body::<ExportMetricsServiceRequest>(&body, format).map_err(decode_failed)?;
            state
                .pipeline
                .ingest_metrics(&tenant, request, body.len())
                .await;
            success_body(format, ExportMetricsServiceResponse::default())
        }
    };

    request_finished(signal, "success");
    histogram!(
        "ingestion_latency_seconds",
        started.elapsed().as_secs_f64(),
        "type" => signal.as_str(),
        "protocol" => "http"
    );

    Ok(result)
}

fn request_finished(signal: SignalType, status: &'static str) {
    counter!("ingestion_requests_total", 1, "type" => signal.as_str(), "protocol" => "http", "status" => status);
}

/// Resolve the tenant from the configured header, falling back to the
/// default tenant when tenancy is disabled or the header is absent.
fn extract_tenant(headers: &HeaderMap, state: &AppState) -> String {
    if !state.tenancy.enabled {
        return state.tenancy.default_tenant.clone();
    }

    headers
        .get(state.tenancy.header.as_str())
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| state.tenancy.default_tenant.clone())
}

/// The whole request decodes or the whole request is rejected; partial
/// decoding is never attempted.
fn decode_body<R>(body: &[u8], format: InputFormat) -> Result<R, AppError>
where
    R: Message + Default + serde::de::DeserializeOwned,
{
    match format {
        InputFormat::Protobuf => R::decode(body).map_err(|e| {
            AppError::bad_request(anyhow::anyhow!("failed to decode OTLP protobuf: {}", e))
        }),
        InputFormat::Json => serde_json::from_slice(body).map_err(|e| {
            AppError::bad_request(anyhow::anyhow!("failed to decode OTLP JSON: {}", e))
        }),
    }
}

/// The minimal OTLP success response: empty protobuf body (full success has
/// no partial_success message) or `{}` for JSON callers.
fn success_body<R: Message + Default>(format: InputFormat, response: R) -> Response {
    match format {
        InputFormat::Protobuf => (
            StatusCode::OK,
            [("content-type", InputFormat::Protobuf.content_type())],
            response.encode_to_vec(),
        )
            .into_response(),
        InputFormat::Json => (
            StatusCode::OK,
            [("content-type", InputFormat::Json.content_type())],
            "{}".to_string(),
        )
            .into_response(),
    }
}

/// GET /health - per-dependency status document
pub(crate) async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let clickhouse = dependency_status(tokio::time::timeout(
        HEALTH_CHECK_TIMEOUT,
        state.writer.ping(),
    ))
    .await;
    let state_store = dependency_status(tokio::time::timeout(
        HEALTH_CHECK_TIMEOUT,
        state.state_store.ping(),
    ))
    .await;

    let healthy = clickhouse == "ok" && state_store == "ok";
    let status = if healthy { "healthy" } else { "degraded" };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "checks": {
                "clickhouse": clickhouse,
                "state_store": state_store,
            },
        })),
    )
}

/// GET /ready - 200 only when the store is reachable and no shutdown is in progress
pub(crate) async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.writer.is_shutting_down() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "shutting_down"})),
        );
    }

    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, state.writer.ping()).await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Ok(Err(e)) => {
            error!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "store_unreachable"})),
            )
        }
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "store_timeout"})),
        ),
    }
}

async fn dependency_status<T, E: std::fmt::Display>(
    check: impl std::future::Future<Output = Result<Result<(), E>, T>>,
) -> String {
    match check.await {
        Ok(Ok(())) => "ok".to_string(),
        Ok(Err(e)) => format!("error: {}", e),
        Err(_) => "error: timeout".to_string(),
    }
}
