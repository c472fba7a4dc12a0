// OTLP decoding - protobuf structs into canonical records
//
// One module per signal, mirroring the three collector service methods.
// Decoding never fails as a whole: individual records that fail semantic
// validation are dropped and counted, the rest of the batch survives.

pub mod common;
pub mod logs;
pub mod metrics;
pub mod traces;

pub use common::{InputFormat, UNKNOWN_SERVICE_NAME};
pub use logs::{decode_logs, LogBatch};
pub use metrics::{decode_metrics, MetricBatch, SkippedMetrics};
pub use traces::{decode_traces, TraceBatch};
