//! The shared ingest pipeline behind both transports.
//!
//! Order per record: sampling decision, append to the writer's per-table
//! buffer, then rule evaluation over the kept records of the batch. Tenant
//! admission happens at the request level before decoding.

use metrics::counter;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use signalhouse_core::otlp::{decode_logs, decode_metrics, decode_traces};
use signalhouse_core::TelemetryRecord;
use signalhouse_rules::RuleEngine;
use signalhouse_sampler::{Decision, Sampler, TenantLimiter};
use signalhouse_writer::{BatchWriter, LogRow, MetricRow, TraceRow};
use std::sync::Arc;

/// Outcome of ingesting one decoded request.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestSummary {
    /// Records decoded from the payload
    pub decoded: usize,
    /// Records that passed sampling and were buffered
    pub kept: usize,
    /// Records dropped by per-record validation
    pub dropped_invalid: usize,
}

pub struct Pipeline {
    limiter: TenantLimiter,
    sampler: Sampler,
    writer: Arc<BatchWriter>,
    rules: Option<Arc<RuleEngine>>,
    slow_threshold_ms: u64,
}

impl Pipeline {
    pub fn new(
        limiter: TenantLimiter,
        sampler: Sampler,
        writer: Arc<BatchWriter>,
        rules: Option<Arc<RuleEngine>>,
        slow_threshold_ms: u64,
    ) -> Self {
        Self {
            limiter,
            sampler,
            writer,
            rules,
            slow_threshold_ms,
        }
    }

    /// Cost-1 admission against the tenant's token bucket.
    pub fn admit(&self, tenant: &str) -> bool {
        self.limiter.check(tenant)
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn limiter(&self) -> &TenantLimiter {
        &self.limiter
    }

    pub async fn ingest_traces(
        &self,
        tenant: &str,
        request: ExportTraceServiceRequest,
        approx_bytes: usize,
    ) -> IngestSummary {
        let batch = decode_traces(request);
        let decoded = batch.spans.len();
        if batch.dropped_invalid_timing > 0 {
            counter!(
                "dropped_records_total",
                batch.dropped_invalid_timing as u64,
                "type" => "traces",
                "reason" => "invalid_timing"
            );
        }
        counter!("ingestion_data_points_total", decoded as u64, "type" => "traces", "tenant" => tenant.to_string());

        let per_record_bytes = approx_bytes / decoded.max(1);
        let mut kept = Vec::new();

        for span in batch.spans {
            let record = TelemetryRecord::Span(span);
            let decision = self.sampler.decide(tenant, &record, per_record_bytes);
            let TelemetryRecord::Span(span) = record else {
                continue;
            };

            if let Some(sample_rate) = self.sample_rate_for(tenant, decision) {
                self.writer.append_trace(TraceRow::new(
                    tenant,
                    &span,
                    self.slow_threshold_ms,
                    sample_rate,
                ));
                kept.push(span);
            }
        }

        if let Some(rules) = &self.rules {
            rules.evaluate_traces(&kept).await;
        }

        IngestSummary {
            decoded,
            kept: kept.len(),
            dropped_invalid: batch.dropped_invalid_timing,
        }
    }

    pub async fn ingest_logs(
        &self,
        tenant: &str,
        request: ExportLogsServiceRequest,
        approx_bytes: usize,
    ) -> IngestSummary {
        let batch = decode_logs(request);
        let decoded = batch.logs.len();
        counter!("ingestion_data_points_total", decoded as u64, "type" => "logs", "tenant" => tenant.to_string());

        let per_record_bytes = approx_bytes / decoded.max(1);
        let mut kept = Vec::new();

        for log in batch.logs {
            let record = TelemetryRecord::Log(log);
            let decision = self.sampler.decide(tenant, &record, per_record_bytes);
            let TelemetryRecord::Log(log) = record else {
                continue;
            };

            if let Some(sample_rate) = self.sample_rate_for(tenant, decision) {
                self.writer.append_log(LogRow::new(tenant, &log, sample_rate));
                kept.push(log);
            }
        }

        if let Some(rules) = &self.rules {
            rules.evaluate_logs(&kept).await;
        }

        IngestSummary {
            decoded,
            kept: kept.len(),
            dropped_invalid: 0,
        }
    }

    pub async fn ingest_metrics(
        &self,
        tenant: &str,
        request: ExportMetricsServiceRequest,
        approx_bytes: usize,
    ) -> IngestSummary {
        let batch = decode_metrics(request);
        let decoded = batch.points.len();
        if batch.skipped.has_skipped() {
            counter!(
                "dropped_records_total",
                batch.skipped.total() as u64,
                "type" => "metrics",
                "reason" => "unsupported"
            );
        }
        counter!("ingestion_data_points_total", decoded as u64, "type" => "metrics", "tenant" => tenant.to_string());

        let per_record_bytes = approx_bytes / decoded.max(1);
        let mut kept = Vec::new();

        for point in batch.points {
            let record = TelemetryRecord::Metric(point);
            let decision = self.sampler.decide(tenant, &record, per_record_bytes);
            let TelemetryRecord::Metric(point) = record else {
                continue;
            };

            if let Some(sample_rate) = self.sample_rate_for(tenant, decision) {
                self.writer
                    .append_metric(MetricRow::new(tenant, &point, sample_rate));
                kept.push(point);
            }
        }

        if let Some(rules) = &self.rules {
            rules.evaluate_metrics(&kept).await;
        }

        IngestSummary {
            decoded,
            kept: kept.len(),
            dropped_invalid: batch.skipped.total(),
        }
    }

    /// The sample rate recorded on a persisted row: 1.0 for deterministic
    /// keeps, the tenant's current rate for probabilistic keeps, None for drops.
    fn sample_rate_for(&self, tenant: &str, decision: Decision) -> Option<f64> {
        match decision {
            Decision::Keep(_) => Some(1.0),
            Decision::Sampled => Some(self.sampler.tenant_rate(tenant).unwrap_or(1.0)),
            Decision::Dropped => None,
        }
    }
}
