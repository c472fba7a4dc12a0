//! Trace decoding: ExportTraceServiceRequest into canonical spans.

use crate::otlp::common::{attrs_to_map, id_to_hex, resource_service_name};
use crate::types::{Span, SpanKind, SpanStatus};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;

/// Result of decoding one trace request.
#[derive(Debug, Default)]
pub struct TraceBatch {
    pub spans: Vec<Span>,
    /// Spans rejected because `end_ts < start_ts`
    pub dropped_invalid_timing: usize,
}

/// Decode every span in the request.
///
/// A span with `end_ts < start_ts` is dropped individually; the rest of the
/// batch is unaffected.
pub fn decode_traces(request: ExportTraceServiceRequest) -> TraceBatch {
    let mut batch = TraceBatch::default();

    for resource_spans in request.resource_spans {
        let service_name = resource_service_name(resource_spans.resource.as_ref());

        for scope_spans in resource_spans.scope_spans {
            for span in scope_spans.spans {
                if span.end_time_unix_nano < span.start_time_unix_nano {
                    batch.dropped_invalid_timing += 1;
                    continue;
                }

                let (status, status_message) = match span.status.as_ref() {
                    Some(status) => (SpanStatus::from_otlp(status.code), status.message.clone()),
                    None => (SpanStatus::Unset, String::new()),
                };

                batch.spans.push(Span {
                    trace_id: id_to_hex(&span.trace_id),
                    span_id: id_to_hex(&span.span_id),
                    parent_span_id: id_to_hex(&span.parent_span_id),
                    name: span.name.clone(),
                    kind: SpanKind::from_otlp(span.kind),
                    start_ts: span.start_time_unix_nano,
                    end_ts: span.end_time_unix_nano,
                    status,
                    status_message,
                    service_name: service_name.clone(),
                    attributes: attrs_to_map(&span.attributes),
                });
            }
        }
    }

    batch
}
