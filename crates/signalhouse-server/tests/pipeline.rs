//! End-to-end pipeline behavior without listeners: decoded OTLP requests go
//! through admission, sampling and the per-table buffers.

use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::{
    metric::Data, Histogram, HistogramDataPoint, Metric, ResourceMetrics, ScopeMetrics,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{status, ResourceSpans, ScopeSpans, Span, Status};
use signalhouse_sampler::{
    AdaptiveSettings, LimiterSettings, Sampler, SamplerSettings, TenantLimiter,
};
use signalhouse_server::Pipeline;
use signalhouse_writer::{BatchWriter, WriterConfig};
use std::sync::Arc;

fn pipeline_with_rate(rate: f64) -> (Arc<Pipeline>, Arc<BatchWriter>) {
    pipeline_with(rate, LimiterSettings::default())
}

fn pipeline_with(rate: f64, limits: LimiterSettings) -> (Arc<Pipeline>, Arc<BatchWriter>) {
    // The client points at nothing; flushers are never spawned in these tests
    let client = clickhouse::Client::default().with_url("http://localhost:1");
    let writer = Arc::new(BatchWriter::new(client, WriterConfig::default()));

    let sampler = Sampler::new(SamplerSettings {
        enabled: true,
        default_rate: rate,
        slow_threshold_ms: 1_000,
        z_score_threshold: 3.0,
        adaptive: AdaptiveSettings {
            enabled: true,
            target_eps: 1_000.0,
            min_rate: 0.0,
            max_rate: 1.0,
        },
    });

    let pipeline = Arc::new(Pipeline::new(
        TenantLimiter::new(limits),
        sampler,
        Arc::clone(&writer),
        None,
        1_000,
    ));
    (pipeline, writer)
}

fn resource(service: &str) -> Resource {
    Resource {
        attributes: vec![KeyValue {
            key: "service.name".to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(service.to_string())),
            }),
        }],
        ..Default::default()
    }
}

fn trace_request(spans: Vec<Span>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(resource("web")),
            scope_spans: vec![ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn span(trace_id: [u8; 16], start: u64, end: u64, error: bool) -> Span {
    Span {
        trace_id: trace_id.to_vec(),
        span_id: vec![0xcd; 8],
        name: "GET /".to_string(),
        kind: 2,
        start_time_unix_nano: start,
        end_time_unix_nano: end,
        status: error.then(|| Status {
            code: status::StatusCode::Error as i32,
            message: "boom".to_string(),
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_error_span_kept_despite_one_percent_rate() {
    let (pipeline, writer) = pipeline_with_rate(0.01);

    let request = trace_request(vec![span([1; 16], 0, 10_000_000, true)]);
    let summary = pipeline.ingest_traces("acme", request, 0).await;

    assert_eq!(summary.decoded, 1);
    assert_eq!(summary.kept, 1);
    assert_eq!(writer.buffered_rows(), 1);
}

#[tokio::test]
async fn test_probabilistic_sampling_is_all_or_none_per_trace() {
    let (pipeline, writer) = pipeline_with_rate(0.5);

    let trace_id = [7u8; 16];
    let spans: Vec<Span> = (0..10)
        .map(|i| span(trace_id, i, i + 1_000, false))
        .collect();
    let summary = pipeline.ingest_traces("acme", trace_request(spans), 0).await;

    assert_eq!(summary.decoded, 10);
    assert!(
        summary.kept == 0 || summary.kept == 10,
        "mixed trace decision: kept {} of 10",
        summary.kept
    );
    assert_eq!(writer.buffered_rows(), summary.kept);
}

#[tokio::test]
async fn test_empty_request_succeeds_with_no_records() {
    let (pipeline, writer) = pipeline_with_rate(1.0);

    let summary = pipeline
        .ingest_traces("acme", ExportTraceServiceRequest::default(), 0)
        .await;

    assert_eq!(summary.decoded, 0);
    assert_eq!(summary.kept, 0);
    assert_eq!(writer.buffered_rows(), 0);
}

#[tokio::test]
async fn test_invalid_timing_drops_only_that_span() {
    let (pipeline, writer) = pipeline_with_rate(1.0);

    let request = trace_request(vec![
        span([1; 16], 0, 1_000, false),
        span([2; 16], 2_000, 1_000, false),
    ]);
    let summary = pipeline.ingest_traces("acme", request, 0).await;

    assert_eq!(summary.decoded, 1);
    assert_eq!(summary.dropped_invalid, 1);
    assert_eq!(writer.buffered_rows(), 1);
}

#[tokio::test]
async fn test_histogram_point_produces_two_rows() {
    let (pipeline, writer) = pipeline_with_rate(1.0);

    let request = ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(resource("web")),
            scope_metrics: vec![ScopeMetrics {
                metrics: vec![Metric {
                    name: "http.duration".to_string(),
                    data: Some(Data::Histogram(Histogram {
                        data_points: vec![HistogramDataPoint {
                            time_unix_nano: 9,
                            count: 3,
                            sum: Some(1.5),
                            ..Default::default()
                        }],
                        aggregation_temporality: 2,
                    })),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    };

    let summary = pipeline.ingest_metrics("acme", request, 0).await;
    assert_eq!(summary.decoded, 2);
    assert_eq!(summary.kept, 2);
    assert_eq!(writer.buffered_rows(), 2);
}

#[tokio::test]
async fn test_admission_burst_boundary() {
    let (pipeline, _writer) = pipeline_with(
        1.0,
        LimiterSettings {
            enabled: true,
            default_rps: 0.0001,
            default_burst: 3.0,
            overrides: Default::default(),
        },
    );

    for _ in 0..3 {
        assert!(pipeline.admit("acme"));
    }
    assert!(!pipeline.admit("acme"));
    // A different tenant is unaffected
    assert!(pipeline.admit("other"));
}
