// signalhouse-core - Canonical record model and OTLP decoding
//
// This crate contains the PURE decoding logic turning OTLP protobuf
// structs into canonical records. No I/O, no async, no runtime
// dependencies: everything downstream (sampler, writer, rule engine)
// dispatches on the record types defined here.

pub mod otlp;
pub mod pattern;
pub mod types;

pub use types::{
    AttrMap, LogRecord, MetricPoint, MetricType, SignalType, Span, SpanKind, SpanStatus,
    TelemetryRecord,
};
