//! Row structs matching the three raw tables.
//!
//! Field order matches the column order of the destination tables; attribute
//! and label maps are serialized as JSON strings.

use clickhouse::Row;
use serde::Serialize;
use signalhouse_core::otlp::common::semconv;
use signalhouse_core::types::AttrMap;
use signalhouse_core::{LogRecord, MetricPoint, Span};

/// Row for `metrics_raw`.
#[derive(Debug, Clone, Row, Serialize)]
pub struct MetricRow {
    pub tenant_id: String,
    pub timestamp: i64,
    pub metric_name: String,
    pub metric_type: String,
    pub value: f64,
    pub labels: String,
    pub service_name: String,
    pub host: String,
    pub environment: String,
    pub sample_rate: f64,
}

impl MetricRow {
    pub fn new(tenant: &str, point: &MetricPoint, sample_rate: f64) -> Self {
        Self {
            tenant_id: tenant.to_string(),
            timestamp: point.ts as i64,
            metric_name: point.name.clone(),
            metric_type: point.metric_type.as_str().to_string(),
            value: point.value,
            labels: map_to_json(&point.labels),
            service_name: point.service_name.clone(),
            host: attr(&point.labels, semconv::HOST_NAME),
            environment: attr(&point.labels, semconv::ENVIRONMENT),
            sample_rate,
        }
    }

    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.tenant_id.len()
            + self.metric_name.len()
            + self.labels.len()
            + self.service_name.len()
            + self.host.len()
            + self.environment.len()
    }
}

/// Row for `logs_raw`.
#[derive(Debug, Clone, Row, Serialize)]
pub struct LogRow {
    pub tenant_id: String,
    pub timestamp: i64,
    pub trace_id: String,
    pub span_id: String,
    pub severity: String,
    pub severity_number: i32,
    pub body: String,
    pub attributes: String,
    pub service_name: String,
    pub host: String,
    pub pattern_hash: u64,
    pub occurrence_count: u64,
    pub sample_rate: f64,
}

impl LogRow {
    pub fn new(tenant: &str, log: &LogRecord, sample_rate: f64) -> Self {
        Self {
            tenant_id: tenant.to_string(),
            timestamp: log.ts as i64,
            trace_id: log.trace_id.clone(),
            span_id: log.span_id.clone(),
            severity: log.severity_text.clone(),
            severity_number: log.severity,
            body: log.body.clone(),
            attributes: map_to_json(&log.attributes),
            service_name: log.service_name.clone(),
            host: attr(&log.attributes, semconv::HOST_NAME),
            pattern_hash: log.pattern_hash,
            occurrence_count: 1,
            sample_rate,
        }
    }

    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.tenant_id.len()
            + self.trace_id.len()
            + self.span_id.len()
            + self.severity.len()
            + self.body.len()
            + self.attributes.len()
            + self.service_name.len()
            + self.host.len()
    }
}

/// Row for `traces_raw`.
#[derive(Debug, Clone, Row, Serialize)]
pub struct TraceRow {
    pub tenant_id: String,
    pub timestamp: i64,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub span_name: String,
    pub span_kind: String,
    pub service_name: String,
    pub duration_ns: u64,
    pub status_code: String,
    pub status_message: String,
    pub attributes: String,
    pub http_method: String,
    pub http_status_code: u16,
    pub http_url: String,
    pub db_system: String,
    pub sample_rate: f64,
    pub is_error: bool,
    pub is_slow: bool,
}

impl TraceRow {
    pub fn new(tenant: &str, span: &Span, slow_threshold_ms: u64, sample_rate: f64) -> Self {
        let attrs = &span.attributes;
        Self {
            tenant_id: tenant.to_string(),
            timestamp: span.start_ts as i64,
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            span_name: span.name.clone(),
            span_kind: span.kind.as_str().to_string(),
            service_name: span.service_name.clone(),
            duration_ns: span.duration_ns(),
            status_code: span.status.as_str().to_string(),
            status_message: span.status_message.clone(),
            attributes: map_to_json(attrs),
            http_method: first_attr(attrs, &[semconv::HTTP_REQUEST_METHOD, semconv::HTTP_METHOD]),
            http_status_code: first_attr(
                attrs,
                &[
                    semconv::HTTP_RESPONSE_STATUS_CODE,
                    semconv::HTTP_STATUS_CODE,
                ],
            )
            .parse()
            .unwrap_or(0),
            http_url: first_attr(attrs, &[semconv::URL_FULL, semconv::HTTP_URL]),
            db_system: attr(attrs, semconv::DB_SYSTEM),
            sample_rate,
            is_error: span.is_error(),
            is_slow: span.is_slow(slow_threshold_ms),
        }
    }

    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.tenant_id.len()
            + self.trace_id.len()
            + self.span_id.len()
            + self.parent_span_id.len()
            + self.span_name.len()
            + self.service_name.len()
            + self.status_message.len()
            + self.attributes.len()
            + self.http_url.len()
    }
}

fn map_to_json(map: &AttrMap) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
}

fn attr(map: &AttrMap, key: &str) -> String {
    map.get(key).cloned().unwrap_or_default()
}

fn first_attr(map: &AttrMap, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| map.get(*key))
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalhouse_core::{MetricType, SpanKind, SpanStatus};

    fn span_with_attrs(attrs: AttrMap) -> Span {
        Span {
            trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            span_id: "b7ad6b7169203331".to_string(),
            parent_span_id: String::new(),
            name: "GET /cart".to_string(),
            kind: SpanKind::Server,
            start_ts: 1_000,
            end_ts: 2_000_000_000,
            status: SpanStatus::Error,
            status_message: "timeout".to_string(),
            service_name: "web".to_string(),
            attributes: attrs,
        }
    }

    #[test]
    fn test_trace_row_hoists_http_attributes() {
        let mut attrs = AttrMap::new();
        attrs.insert("http.method".to_string(), "GET".to_string());
        attrs.insert("http.status_code".to_string(), "503".to_string());
        attrs.insert("http.url".to_string(), "https://shop/cart".to_string());
        attrs.insert("db.system".to_string(), "postgresql".to_string());

        let row = TraceRow::new("acme", &span_with_attrs(attrs), 1_000, 0.5);
        assert_eq!(row.http_method, "GET");
        assert_eq!(row.http_status_code, 503);
        assert_eq!(row.http_url, "https://shop/cart");
        assert_eq!(row.db_system, "postgresql");
        assert!(row.is_error);
        assert!(row.is_slow);
        assert_eq!(row.sample_rate, 0.5);
    }

    #[test]
    fn test_trace_row_prefers_stable_semconv_names() {
        let mut attrs = AttrMap::new();
        attrs.insert("http.request.method".to_string(), "POST".to_string());
        attrs.insert("http.method".to_string(), "GET".to_string());

        let row = TraceRow::new("acme", &span_with_attrs(attrs), 1_000, 1.0);
        assert_eq!(row.http_method, "POST");
    }

    #[test]
    fn test_trace_row_unparsable_status_is_zero() {
        let mut attrs = AttrMap::new();
        attrs.insert("http.status_code".to_string(), "abc".to_string());
        let row = TraceRow::new("acme", &span_with_attrs(attrs), 1_000, 1.0);
        assert_eq!(row.http_status_code, 0);
    }

    #[test]
    fn test_metric_row_serializes_labels_as_json() {
        let mut labels = AttrMap::new();
        labels.insert("host.name".to_string(), "node-1".to_string());
        labels.insert("le".to_string(), "+Inf".to_string());

        let point = MetricPoint {
            name: "http.duration_sum".to_string(),
            metric_type: MetricType::Histogram,
            unit: "ms".to_string(),
            ts: 42,
            value: 12.5,
            service_name: "web".to_string(),
            labels,
        };

        let row = MetricRow::new("acme", &point, 1.0);
        assert_eq!(row.timestamp, 42);
        assert_eq!(row.host, "node-1");
        let parsed: AttrMap = serde_json::from_str(&row.labels).unwrap();
        assert_eq!(parsed.get("le").unwrap(), "+Inf");
    }

    #[test]
    fn test_log_row_carries_pattern_hash() {
        let log = LogRecord {
            ts: 7,
            severity: 17,
            severity_text: "ERROR".to_string(),
            body: "disk full".to_string(),
            service_name: "web".to_string(),
            trace_id: String::new(),
            span_id: String::new(),
            attributes: AttrMap::new(),
            pattern_hash: 0xdead_beef,
        };

        let row = LogRow::new("acme", &log, 1.0);
        assert_eq!(row.pattern_hash, 0xdead_beef);
        assert_eq!(row.occurrence_count, 1);
        assert_eq!(row.severity_number, 17);
        assert_eq!(row.attributes, "{}");
    }
}
