//! The batched writer: per-table buffers, background flushers, and the
//! RowBinary insert path.

use crate::buffer::{BufferLimits, TableBuffer};
use crate::rows::{LogRow, MetricRow, TraceRow};
use clickhouse::{Client, Row};
use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_rows: usize,
    pub max_bytes: usize,
    pub hard_cap_rows: usize,
    pub flush_interval: Duration,
    pub insert_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            max_bytes: 32 * 1024 * 1024,
            hard_cap_rows: 100_000,
            flush_interval: Duration::from_secs(1),
            insert_timeout: Duration::from_secs(30),
        }
    }
}

/// Writer owning one buffer per destination table.
pub struct BatchWriter {
    client: Client,
    limits: BufferLimits,
    flush_interval: Duration,
    insert_timeout: Duration,
    metrics: Arc<TableBuffer<MetricRow>>,
    logs: Arc<TableBuffer<LogRow>>,
    traces: Arc<TableBuffer<TraceRow>>,
    shutting_down: AtomicBool,
}

impl BatchWriter {
    pub fn new(client: Client, config: WriterConfig) -> Self {
        Self {
            client,
            limits: BufferLimits {
                max_rows: config.max_rows,
                max_bytes: config.max_bytes,
                hard_cap_rows: config.hard_cap_rows,
            },
            flush_interval: config.flush_interval,
            insert_timeout: config.insert_timeout,
            metrics: Arc::new(TableBuffer::new("metrics_raw")),
            logs: Arc::new(TableBuffer::new("logs_raw")),
            traces: Arc::new(TableBuffer::new("traces_raw")),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Round-trip to the store. A failed ping at startup is fatal.
    pub async fn ping(&self) -> Result<(), clickhouse::error::Error> {
        self.client.query("SELECT 1").fetch_one::<u8>().await?;
        Ok(())
    }

    pub fn append_metric(&self, row: MetricRow) -> bool {
        let bytes = row.approx_size();
        self.metrics.append(row, bytes, &self.limits)
    }

    pub fn append_log(&self, row: LogRow) -> bool {
        let bytes = row.approx_size();
        self.logs.append(row, bytes, &self.limits)
    }

    pub fn append_trace(&self, row: TraceRow) -> bool {
        let bytes = row.approx_size();
        self.traces.append(row, bytes, &self.limits)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Spawn one flusher per table. Each performs a final flush when the
    /// shutdown signal fires; await the returned handles to guarantee it.
    pub fn spawn_flushers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(run_flusher(
                self.client.clone(),
                Arc::clone(&self.metrics),
                self.flush_interval,
                self.insert_timeout,
                shutdown.clone(),
            )),
            tokio::spawn(run_flusher(
                self.client.clone(),
                Arc::clone(&self.logs),
                self.flush_interval,
                self.insert_timeout,
                shutdown.clone(),
            )),
            tokio::spawn(run_flusher(
                self.client.clone(),
                Arc::clone(&self.traces),
                self.flush_interval,
                self.insert_timeout,
                shutdown,
            )),
        ]
    }

    /// Buffered row count across all tables; used by tests and introspection.
    pub fn buffered_rows(&self) -> usize {
        self.metrics.len() + self.logs.len() + self.traces.len()
    }
}

/// Flush loop for one table: ticker, size-trigger wakeups, and a final flush
/// on shutdown, in one select.
async fn run_flusher<R>(
    client: Client,
    buffer: Arc<TableBuffer<R>>,
    flush_interval: Duration,
    insert_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    R: Row + Serialize + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush(&client, &buffer, insert_timeout).await;
            }
            _ = buffer.flush_requested() => {
                flush(&client, &buffer, insert_timeout).await;
            }
            _ = shutdown.changed() => {
                flush(&client, &buffer, insert_timeout).await;
                info!(table = buffer.table(), "Flusher stopped after final flush");
                break;
            }
        }
    }
}

/// Swap the buffer and submit the batch. The swap happens under the buffer
/// lock; the insert happens outside it. A failed batch is logged and counted
/// and its rows are lost.
async fn flush<R>(client: &Client, buffer: &TableBuffer<R>, insert_timeout: Duration)
where
    R: Row + Serialize,
{
    let rows = buffer.swap();
    if rows.is_empty() {
        return;
    }

    let table = buffer.table();
    let count = rows.len();
    let started = Instant::now();

    let outcome = tokio::time::timeout(insert_timeout, insert_rows(client, table, &rows)).await;

    match outcome {
        Ok(Ok(())) => {
            counter!("rows_written_total", count as u64, "table" => table);
            counter!("batches_written_total", 1, "table" => table, "status" => "success");
            histogram!("write_latency_seconds", started.elapsed().as_secs_f64(), "table" => table);
            histogram!("batch_size", count as f64, "table" => table);
        }
        Ok(Err(e)) => {
            counter!("batches_written_total", 1, "table" => table, "status" => "error");
            error!(table, rows = count, error = %e, "Batch insert failed; batch lost");
        }
        Err(_) => {
            counter!("batches_written_total", 1, "table" => table, "status" => "error");
            error!(table, rows = count, timeout = ?insert_timeout, "Batch insert timed out; batch lost");
        }
    }
}

async fn insert_rows<R>(client: &Client, table: &str, rows: &[R]) -> clickhouse::error::Result<()>
where
    R: Row + Serialize,
{
    let mut insert = client.insert(table)?;
    for row in rows {
        insert.write(row).await?;
    }
    insert.end().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalhouse_core::types::AttrMap;
    use signalhouse_core::{MetricPoint, MetricType};

    fn test_writer(config: WriterConfig) -> Arc<BatchWriter> {
        // Points at nothing; tests exercise buffering, not the insert path
        let client = Client::default().with_url("http://localhost:1");
        Arc::new(BatchWriter::new(client, config))
    }

    fn metric_row(name: &str) -> MetricRow {
        let point = MetricPoint {
            name: name.to_string(),
            metric_type: MetricType::Gauge,
            unit: String::new(),
            ts: 1,
            value: 1.0,
            service_name: "web".to_string(),
            labels: AttrMap::new(),
        };
        MetricRow::new("acme", &point, 1.0)
    }

    #[test]
    fn test_append_counts_rows() {
        let writer = test_writer(WriterConfig::default());
        for i in 0..7 {
            assert!(writer.append_metric(metric_row(&format!("m{}", i))));
        }
        assert_eq!(writer.buffered_rows(), 7);
    }

    #[test]
    fn test_hard_cap_rejects_appends() {
        let writer = test_writer(WriterConfig {
            max_rows: 1,
            hard_cap_rows: 2,
            ..WriterConfig::default()
        });
        assert!(writer.append_metric(metric_row("a")));
        assert!(writer.append_metric(metric_row("b")));
        assert!(!writer.append_metric(metric_row("c")));
        assert_eq!(writer.buffered_rows(), 2);
    }

    #[test]
    fn test_shutdown_flag() {
        let writer = test_writer(WriterConfig::default());
        assert!(!writer.is_shutting_down());
        writer.begin_shutdown();
        assert!(writer.is_shutting_down());
    }

    #[tokio::test]
    async fn test_final_flush_empties_buffers_on_shutdown() {
        let writer = test_writer(WriterConfig {
            // Long interval: only the shutdown path may flush
            flush_interval: Duration::from_secs(3600),
            insert_timeout: Duration::from_millis(200),
            ..WriterConfig::default()
        });
        for _ in 0..7 {
            writer.append_metric(metric_row("m"));
        }

        let (tx, rx) = watch::channel(false);
        let handles = writer.spawn_flushers(rx);

        // Give the flushers a moment to pass their first immediate tick
        tokio::time::sleep(Duration::from_millis(50)).await;
        for _ in 0..7 {
            writer.append_metric(metric_row("m"));
        }

        tx.send(true).expect("flushers alive");
        for handle in handles {
            handle.await.expect("flusher task panicked");
        }

        // The insert fails (no server) but the buffers must have been swapped
        assert_eq!(writer.buffered_rows(), 0);
    }
}
