//! Online metric baselines for anomaly detection.
//!
//! One baseline per (tenant, service, metric_name), updated with
//! exponentially weighted moving statistics. The z-score is computed against
//! the baseline as it stood before the observation, and only once the
//! baseline has seen more than `MIN_COUNT` points.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// EWMA smoothing factor for mean and variance updates.
const ALPHA: f64 = 0.1;

/// Observations required before the stddev is considered defined.
const MIN_COUNT: u64 = 10;

#[derive(Debug)]
struct Baseline {
    mean: f64,
    variance: f64,
    count: u64,
    last_update: Instant,
}

/// Tracker holding every live baseline behind a concurrent map.
pub struct BaselineTracker {
    baselines: DashMap<String, Mutex<Baseline>>,
}

impl Default for BaselineTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BaselineTracker {
    pub fn new() -> Self {
        Self {
            baselines: DashMap::new(),
        }
    }

    /// Feed one observation, returning the z-score against the prior state
    /// when the baseline is warm enough to make it meaningful.
    pub fn observe(&self, tenant: &str, service: &str, metric_name: &str, value: f64) -> Option<f64> {
        let key = format!("{}:{}:{}", tenant, service, metric_name);
        let entry = self.baselines.entry(key).or_insert_with(|| {
            Mutex::new(Baseline {
                mean: value,
                variance: 0.0,
                count: 0,
                last_update: Instant::now(),
            })
        });

        let mut baseline = entry.lock();

        let z = if baseline.count > MIN_COUNT {
            let stddev = baseline.variance.sqrt();
            if stddev > f64::EPSILON {
                Some((value - baseline.mean).abs() / stddev)
            } else {
                None
            }
        } else {
            None
        };

        let delta = value - baseline.mean;
        baseline.mean += ALPHA * delta;
        baseline.variance = (1.0 - ALPHA) * (baseline.variance + ALPHA * delta * delta);
        baseline.count += 1;
        baseline.last_update = Instant::now();

        z
    }

    /// Drop baselines not updated within `max_age`. Returns the evicted count.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let before = self.baselines.len();
        self.baselines
            .retain(|_, baseline| baseline.lock().last_update.elapsed() < max_age);
        let evicted = before - self.baselines.len();
        if evicted > 0 {
            debug!(evicted, "Swept stale metric baselines");
        }
        evicted
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.baselines.len()
    }
}
