//! Canonical record types shared across the pipeline
//!
//! These types are defined here to avoid circular dependencies between
//! the sampler, writer and rule engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Attribute maps carry scalar values formatted as strings.
pub type AttrMap = BTreeMap<String, String>;

/// OpenTelemetry signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
    /// Metrics signal
    Metrics,
    /// Logs signal
    Logs,
    /// Traces signal
    Traces,
}

impl SignalType {
    /// Returns the string representation used in metric labels and table routing
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Metrics => "metrics",
            SignalType::Logs => "logs",
            SignalType::Traces => "traces",
        }
    }

    /// Returns the destination table for this signal
    pub fn table_name(&self) -> &'static str {
        match self {
            SignalType::Metrics => "metrics_raw",
            SignalType::Logs => "logs_raw",
            SignalType::Traces => "traces_raw",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metrics" => Ok(SignalType::Metrics),
            "logs" => Ok(SignalType::Logs),
            "traces" => Ok(SignalType::Traces),
            _ => Err(format!("unknown signal type: {}", s)),
        }
    }
}

/// Metric point kinds carried through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Gauge,
    Counter,
    Histogram,
    Summary,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Span kind per the OTLP enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    /// Maps the raw OTLP enum value; unknown values collapse to Unspecified
    pub fn from_otlp(kind: i32) -> Self {
        match kind {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Unspecified => "unspecified",
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }
}

/// Span status per the OTLP enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn from_otlp(code: i32) -> Self {
        match code {
            1 => SpanStatus::Ok,
            2 => SpanStatus::Error,
            _ => SpanStatus::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "unset",
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
        }
    }
}

/// A single decoded span
#[derive(Debug, Clone)]
pub struct Span {
    /// 16-byte trace id rendered as lowercase hex; empty when absent
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub name: String,
    pub kind: SpanKind,
    /// Nanosecond timestamps; decode guarantees start_ts <= end_ts
    pub start_ts: u64,
    pub end_ts: u64,
    pub status: SpanStatus,
    pub status_message: String,
    pub service_name: String,
    pub attributes: AttrMap,
}

impl Span {
    pub fn duration_ns(&self) -> u64 {
        self.end_ts - self.start_ts
    }

    pub fn is_error(&self) -> bool {
        self.status == SpanStatus::Error
    }

    pub fn is_slow(&self, slow_threshold_ms: u64) -> bool {
        self.duration_ns() > slow_threshold_ms.saturating_mul(1_000_000)
    }
}

/// A single decoded log record
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub ts: u64,
    /// OTLP severity number, 0..=24; >= 17 is error-class
    pub severity: i32,
    pub severity_text: String,
    pub body: String,
    pub service_name: String,
    /// Hex-rendered ids; empty when the record is not trace-correlated
    pub trace_id: String,
    pub span_id: String,
    pub attributes: AttrMap,
    /// Stable fingerprint of the body skeleton
    pub pattern_hash: u64,
}

impl LogRecord {
    pub fn is_error(&self) -> bool {
        self.severity >= 17
    }
}

/// A single decoded metric data point
#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub name: String,
    pub metric_type: MetricType,
    pub unit: String,
    pub ts: u64,
    pub value: f64,
    pub service_name: String,
    pub labels: AttrMap,
}

/// Tagged union handed to the sampler and rule engine
#[derive(Debug, Clone)]
pub enum TelemetryRecord {
    Span(Span),
    Log(LogRecord),
    Metric(MetricPoint),
}

impl TelemetryRecord {
    pub fn signal_type(&self) -> SignalType {
        match self {
            TelemetryRecord::Span(_) => SignalType::Traces,
            TelemetryRecord::Log(_) => SignalType::Logs,
            TelemetryRecord::Metric(_) => SignalType::Metrics,
        }
    }

    pub fn service_name(&self) -> &str {
        match self {
            TelemetryRecord::Span(span) => &span.service_name,
            TelemetryRecord::Log(log) => &log.service_name,
            TelemetryRecord::Metric(point) => &point.service_name,
        }
    }

    /// Hex trace id when the record carries one, used for decision-consistent sampling
    pub fn trace_id(&self) -> Option<&str> {
        let id = match self {
            TelemetryRecord::Span(span) => span.trace_id.as_str(),
            TelemetryRecord::Log(log) => log.trace_id.as_str(),
            TelemetryRecord::Metric(_) => return None,
        };
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: u64, end: u64) -> Span {
        Span {
            trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            span_id: "b7ad6b7169203331".to_string(),
            parent_span_id: String::new(),
            name: "GET /".to_string(),
            kind: SpanKind::Server,
            start_ts: start,
            end_ts: end,
            status: SpanStatus::Unset,
            status_message: String::new(),
            service_name: "web".to_string(),
            attributes: AttrMap::new(),
        }
    }

    #[test]
    fn test_signal_type_round_trip() {
        for signal in [SignalType::Metrics, SignalType::Logs, SignalType::Traces] {
            assert_eq!(signal.as_str().parse::<SignalType>().unwrap(), signal);
        }
        assert!("spans".parse::<SignalType>().is_err());
    }

    #[test]
    fn test_zero_duration_is_never_slow() {
        let s = span(1_000, 1_000);
        assert_eq!(s.duration_ns(), 0);
        assert!(!s.is_slow(0));
        assert!(!s.is_slow(1_000));
    }

    #[test]
    fn test_slow_threshold_boundary() {
        // 1ms threshold: exactly at the threshold is not slow, one ns past is
        let s = span(0, 1_000_000);
        assert!(!s.is_slow(1));
        let s = span(0, 1_000_001);
        assert!(s.is_slow(1));
    }

    #[test]
    fn test_log_error_class() {
        let mut log = LogRecord {
            ts: 0,
            severity: 16,
            severity_text: "WARN4".to_string(),
            body: String::new(),
            service_name: String::new(),
            trace_id: String::new(),
            span_id: String::new(),
            attributes: AttrMap::new(),
            pattern_hash: 0,
        };
        assert!(!log.is_error());
        log.severity = 17;
        assert!(log.is_error());
    }

    #[test]
    fn test_span_kind_from_unknown_value() {
        assert_eq!(SpanKind::from_otlp(42), SpanKind::Unspecified);
        assert_eq!(SpanKind::from_otlp(2), SpanKind::Server);
    }

    #[test]
    fn test_record_trace_id_empty_is_none() {
        let log = LogRecord {
            ts: 0,
            severity: 9,
            severity_text: String::new(),
            body: "hello".to_string(),
            service_name: "svc".to_string(),
            trace_id: String::new(),
            span_id: String::new(),
            attributes: AttrMap::new(),
            pattern_hash: 0,
        };
        assert!(TelemetryRecord::Log(log).trace_id().is_none());
    }
}
