//! Per-table in-memory buffer with swap-on-flush semantics.
//!
//! The lock is held only for the append and the swap; flush I/O happens on a
//! fresh vector while appenders keep writing to the replacement. A hard row
//! cap bounds worst-case memory by dropping (and counting) new rows.

use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy)]
pub struct BufferLimits {
    /// Row count that triggers an eager flush
    pub max_rows: usize,
    /// Approximate buffered bytes that trigger an eager flush
    pub max_bytes: usize,
    /// Row count at which appends start dropping
    pub hard_cap_rows: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            max_bytes: 32 * 1024 * 1024,
            hard_cap_rows: 100_000,
        }
    }
}

pub struct TableBuffer<R> {
    table: &'static str,
    rows: Mutex<Vec<R>>,
    approx_bytes: AtomicUsize,
    flush_now: Notify,
}

impl<R> TableBuffer<R> {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            rows: Mutex::new(Vec::new()),
            approx_bytes: AtomicUsize::new(0),
            flush_now: Notify::new(),
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Append one row. Returns false when the hard cap forced a drop.
    ///
    /// Reaching `max_rows` or `max_bytes` wakes the flusher; the append
    /// itself still succeeds so the arrival path never waits on store I/O.
    pub fn append(&self, row: R, row_bytes: usize, limits: &BufferLimits) -> bool {
        let len = {
            let mut rows = self.rows.lock();
            if rows.len() >= limits.hard_cap_rows {
                drop(rows);
                counter!("buffer_dropped_rows_total", 1, "table" => self.table);
                return false;
            }
            rows.push(row);
            rows.len()
        };

        let bytes = self.approx_bytes.fetch_add(row_bytes, Ordering::Relaxed) + row_bytes;
        gauge!("buffer_size", len as f64, "table" => self.table);

        if len >= limits.max_rows || bytes >= limits.max_bytes {
            self.flush_now.notify_one();
        }

        true
    }

    /// Swap the buffer for a fresh one, returning the accumulated rows.
    pub fn swap(&self) -> Vec<R> {
        let rows = {
            let mut guard = self.rows.lock();
            std::mem::take(&mut *guard)
        };
        self.approx_bytes.store(0, Ordering::Relaxed);
        gauge!("buffer_size", 0.0, "table" => self.table);
        rows
    }

    /// Resolves when an append crossed a flush threshold.
    pub async fn flush_requested(&self) {
        self.flush_now.notified().await;
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits(max_rows: usize, hard_cap: usize) -> BufferLimits {
        BufferLimits {
            max_rows,
            max_bytes: usize::MAX,
            hard_cap_rows: hard_cap,
        }
    }

    #[test]
    fn test_append_and_swap_preserve_order() {
        let buffer: TableBuffer<u32> = TableBuffer::new("metrics_raw");
        let limits = limits(100, 1000);
        for i in 0..5 {
            assert!(buffer.append(i, 8, &limits));
        }
        assert_eq!(buffer.len(), 5);

        let rows = buffer.swap();
        assert_eq!(rows, vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_hard_cap_drops() {
        let buffer: TableBuffer<u32> = TableBuffer::new("logs_raw");
        let limits = limits(100, 3);
        assert!(buffer.append(1, 8, &limits));
        assert!(buffer.append(2, 8, &limits));
        assert!(buffer.append(3, 8, &limits));
        assert!(!buffer.append(4, 8, &limits));
        assert_eq!(buffer.len(), 3);
    }

    #[tokio::test]
    async fn test_size_trigger_wakes_flusher() {
        let buffer: TableBuffer<u32> = TableBuffer::new("traces_raw");
        let limits = limits(3, 1000);

        buffer.append(1, 8, &limits);
        buffer.append(2, 8, &limits);
        buffer.append(3, 8, &limits);

        // The third append crossed max_rows: the notification must be pending
        tokio::time::timeout(Duration::from_millis(100), buffer.flush_requested())
            .await
            .expect("flush should have been requested");
    }

    #[tokio::test]
    async fn test_byte_trigger_wakes_flusher() {
        let buffer: TableBuffer<u32> = TableBuffer::new("traces_raw");
        let limits = BufferLimits {
            max_rows: 1000,
            max_bytes: 100,
            hard_cap_rows: 1000,
        };

        buffer.append(1, 60, &limits);
        buffer.append(2, 60, &limits);

        tokio::time::timeout(Duration::from_millis(100), buffer.flush_requested())
            .await
            .expect("flush should have been requested");
    }

    #[test]
    fn test_swap_resets_byte_accounting() {
        let buffer: TableBuffer<u32> = TableBuffer::new("metrics_raw");
        let limits = BufferLimits {
            max_rows: 1000,
            max_bytes: 100,
            hard_cap_rows: 1000,
        };
        buffer.append(1, 90, &limits);
        buffer.swap();
        assert_eq!(buffer.approx_bytes.load(Ordering::Relaxed), 0);
    }
}
