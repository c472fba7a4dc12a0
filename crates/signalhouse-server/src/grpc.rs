//! gRPC OTLP ingress: the three collector service methods.

use crate::pipeline::Pipeline;
use metrics::{counter, histogram};
use opentelemetry_proto::tonic::collector::{
    logs::v1::{
        logs_service_server::{LogsService, LogsServiceServer},
        ExportLogsServiceRequest, ExportLogsServiceResponse,
    },
    metrics::v1::{
        metrics_service_server::{MetricsService, MetricsServiceServer},
        ExportMetricsServiceRequest, ExportMetricsServiceResponse,
    },
    trace::v1::{
        trace_service_server::{TraceService, TraceServiceServer},
        ExportTraceServiceRequest, ExportTraceServiceResponse,
    },
};
use prost::Message;
use signalhouse_config::TenancyConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tonic::transport::Server as TonicServer;
use tonic::{Request, Response, Status};
use tracing::debug;

/// Serve the three OTLP collector services until the shutdown signal fires.
pub(crate) async fn serve(
    addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    tenancy: TenancyConfig,
    max_message_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), tonic::transport::Error> {
    debug!(%addr, "Starting OTLP gRPC server");

    TonicServer::builder()
        .add_service(
            TraceServiceServer::new(OtlpTraceService {
                inner: ServiceInner::new(Arc::clone(&pipeline), tenancy.clone()),
            })
            .max_decoding_message_size(max_message_bytes)
            .max_encoding_message_size(max_message_bytes),
        )
        .add_service(
            LogsServiceServer::new(OtlpLogsService {
                inner: ServiceInner::new(Arc::clone(&pipeline), tenancy.clone()),
            })
            .max_decoding_message_size(max_message_bytes)
            .max_encoding_message_size(max_message_bytes),
        )
        .add_service(
            MetricsServiceServer::new(OtlpMetricsService {
                inner: ServiceInner::new(pipeline, tenancy),
            })
            .max_decoding_message_size(max_message_bytes)
            .max_encoding_message_size(max_message_bytes),
        )
        .serve_with_shutdown(addr, async move {
            let _ = shutdown.changed().await;
            debug!("OTLP gRPC server shutting down");
        })
        .await
}

/// State shared by the three service impls.
#[derive(Clone)]
struct ServiceInner {
    pipeline: Arc<Pipeline>,
    tenancy: TenancyConfig,
}

impl ServiceInner {
    fn new(pipeline: Arc<Pipeline>, tenancy: TenancyConfig) -> Self {
        Self { pipeline, tenancy }
    }

    /// Tenant from request metadata, falling back to the default tenant.
    fn extract_tenant<T>(&self, request: &Request<T>) -> String {
        if !self.tenancy.enabled {
            return self.tenancy.default_tenant.clone();
        }

        let header = self.tenancy.header.to_lowercase();
        request
            .metadata()
            .get(header.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.tenancy.default_tenant.clone())
    }

    fn admit(&self, tenant: &str, signal: &'static str) -> Result<(), Status> {
        if self.pipeline.admit(tenant) {
            Ok(())
        } else {
            counter!("ingestion_requests_total", 1, "type" => signal, "protocol" => "grpc", "status" => "rate_limited");
            Err(Status::resource_exhausted(format!(
                "tenant {} exceeded its rate limit",
                tenant
            )))
        }
    }
}

fn request_metrics(signal: &'static str, bytes: usize, started: Instant) {
    counter!("ingestion_requests_total", 1, "type" => signal, "protocol" => "grpc", "status" => "success");
    counter!("ingestion_bytes_total", bytes as u64, "type" => signal, "protocol" => "grpc");
    histogram!(
        "ingestion_latency_seconds",
        started.elapsed().as_secs_f64(),
        "type" => signal,
        "protocol" => "grpc"
    );
}

struct OtlpTraceService {
    inner: ServiceInner,
}

#[tonic::async_trait]
impl TraceService for OtlpTraceService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let started = Instant::now();
        let tenant = self.inner.extract_tenant(&request);
        self.inner.admit(&tenant, "traces")?;

        let req = request.into_inner();
        let approx_bytes = req.encoded_len();
        self.inner
            .pipeline
            .ingest_traces(&tenant, req, approx_bytes)
            .await;

        request_metrics("traces", approx_bytes, started);
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

struct OtlpLogsService {
    inner: ServiceInner,
}

#[tonic::async_trait]
impl LogsService for OtlpLogsService {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let started = Instant::now();
        let tenant = self.inner.extract_tenant(&request);
        self.inner.admit(&tenant, "logs")?;

        let req = request.into_inner();
        let approx_bytes = req.encoded_len();
        self.inner
            .pipeline
            .ingest_logs(&tenant, req, approx_bytes)
            .await;

        request_metrics("logs", approx_bytes, started);
        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: None,
        }))
    }
}

struct OtlpMetricsService {
    inner: ServiceInner,
}

#[tonic::async_trait]
impl MetricsService for OtlpMetricsService {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let started = Instant::now();
        let tenant = self.inner.extract_tenant(&request);
        self.inner.admit(&tenant, "metrics")?;

        let req = request.into_inner();
        let approx_bytes = req.encoded_len();
        self.inner
            .pipeline
            .ingest_metrics(&tenant, req, approx_bytes)
            .await;

        request_metrics("metrics", approx_bytes, started);
        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: None,
        }))
    }
}
