//! Log decoding: ExportLogsServiceRequest into canonical log records.

use crate::otlp::common::{any_value_string, attrs_to_map, id_to_hex, resource_service_name};
use crate::pattern;
use crate::types::LogRecord;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;

/// Result of decoding one logs request.
#[derive(Debug, Default)]
pub struct LogBatch {
    pub logs: Vec<LogRecord>,
}

/// Decode every log record in the request.
///
/// Records with a zero `time_unix_nano` fall back to `observed_time_unix_nano`
/// per the OTLP data model. The pattern hash is computed here so every
/// downstream consumer sees the same fingerprint.
pub fn decode_logs(request: ExportLogsServiceRequest) -> LogBatch {
    let mut batch = LogBatch::default();

    for resource_logs in request.resource_logs {
        let service_name = resource_service_name(resource_logs.resource.as_ref());

        for scope_logs in resource_logs.scope_logs {
            for record in scope_logs.log_records {
                let ts = if record.time_unix_nano > 0 {
                    record.time_unix_nano
                } else {
                    record.observed_time_unix_nano
                };

                let body = record
                    .body
                    .as_ref()
                    .and_then(any_value_string)
                    .unwrap_or_default();

                batch.logs.push(LogRecord {
                    ts,
                    severity: record.severity_number,
                    severity_text: record.severity_text.clone(),
                    pattern_hash: pattern::fingerprint(&body),
                    body,
                    service_name: service_name.clone(),
                    trace_id: id_to_hex(&record.trace_id),
                    span_id: id_to_hex(&record.span_id),
                    attributes: attrs_to_map(&record.attributes),
                });
            }
        }
    }

    batch
}
