// signalhouse-writer - Batched persistence to the columnar store
//
// Accumulates canonical rows in per-table buffers and flushes them in large
// RowBinary inserts. Flushes trigger on row count, buffered bytes, a ticker,
// or shutdown; the arrival path never blocks on store I/O.

mod buffer;
mod rows;
mod writer;

pub use buffer::{BufferLimits, TableBuffer};
pub use rows::{LogRow, MetricRow, TraceRow};
pub use writer::{BatchWriter, WriterConfig};
