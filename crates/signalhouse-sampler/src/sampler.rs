//! Sampling decisions and adaptive rate control.
//!
//! Decision order, first match wins: error, slow, anomaly, first-seen,
//! probabilistic. The probabilistic arm hashes the trace id so every span of
//! a trace lands on the same side of the rate threshold.

use crate::baseline::BaselineTracker;
use dashmap::{DashMap, DashSet};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use signalhouse_core::{SignalType, TelemetryRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

/// Slots in the per-tenant ring of per-second event counts.
const RING_SLOTS: usize = 60;

/// Upper bound on remembered first-seen log patterns per tenant.
const MAX_PATTERNS_PER_TENANT: usize = 100_000;

#[derive(Debug, Clone)]
pub struct AdaptiveSettings {
    pub enabled: bool,
    pub target_eps: f64,
    pub min_rate: f64,
    pub max_rate: f64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            target_eps: 1_000.0,
            min_rate: 0.01,
            max_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub enabled: bool,
    pub default_rate: f64,
    pub slow_threshold_ms: u64,
    pub z_score_threshold: f64,
    pub adaptive: AdaptiveSettings,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_rate: 1.0,
            slow_threshold_ms: 1_000,
            z_score_threshold: 3.0,
            adaptive: AdaptiveSettings::default(),
        }
    }
}

/// Why a record was kept outside the probabilistic arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    Error,
    Slow,
    Anomaly,
    FirstSeen,
}

impl KeepReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeepReason::Error => "error",
            KeepReason::Slow => "slow",
            KeepReason::Anomaly => "anomaly",
            KeepReason::FirstSeen => "first_seen",
        }
    }
}

/// The fate of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep(KeepReason),
    Sampled,
    Dropped,
}

impl Decision {
    pub fn is_kept(&self) -> bool {
        !matches!(self, Decision::Dropped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Keep(_) => "keep",
            Decision::Sampled => "sample",
            Decision::Dropped => "drop",
        }
    }

    pub fn reason_str(&self) -> &'static str {
        match self {
            Decision::Keep(reason) => reason.as_str(),
            Decision::Sampled | Decision::Dropped => "probabilistic",
        }
    }
}

struct RateState {
    current_rate: f64,
    ring: [u64; RING_SLOTS],
    idx: usize,
}

struct TenantState {
    rate: Mutex<RateState>,
    events_this_second: AtomicU64,
    bytes_this_second: AtomicU64,
    last_seen: AtomicU64,
    seen_patterns: DashSet<u64>,
}

impl TenantState {
    fn new(default_rate: f64) -> Self {
        Self {
            rate: Mutex::new(RateState {
                current_rate: default_rate,
                ring: [0; RING_SLOTS],
                idx: 0,
            }),
            events_this_second: AtomicU64::new(0),
            bytes_this_second: AtomicU64::new(0),
            last_seen: AtomicU64::new(unix_secs()),
            seen_patterns: DashSet::new(),
        }
    }
}

/// Per-tenant sampler with adaptive rate control.
pub struct Sampler {
    settings: SamplerSettings,
    tenants: DashMap<String, Arc<TenantState>>,
    baselines: BaselineTracker,
}

impl Sampler {
    pub fn new(settings: SamplerSettings) -> Self {
        Self {
            settings,
            tenants: DashMap::new(),
            baselines: BaselineTracker::new(),
        }
    }

    /// Decide the fate of one record. `approx_bytes` feeds the per-tenant
    /// byte counter used for introspection; zero is acceptable.
    pub fn decide(&self, tenant: &str, record: &TelemetryRecord, approx_bytes: usize) -> Decision {
        if !self.settings.enabled {
            return Decision::Sampled;
        }

        let state = self.tenant_state(tenant);
        state.events_this_second.fetch_add(1, Ordering::Relaxed);
        state
            .bytes_this_second
            .fetch_add(approx_bytes as u64, Ordering::Relaxed);
        state.last_seen.store(unix_secs(), Ordering::Relaxed);

        let decision = self.classify(tenant, &state, record);

        let data_type = record.signal_type().as_str();
        counter!(
            "sampling_decisions_total",
            1,
            "tenant" => tenant.to_string(),
            "data_type" => data_type,
            "decision" => decision.as_str(),
            "reason" => decision.reason_str()
        );

        decision
    }

    fn classify(&self, tenant: &str, state: &TenantState, record: &TelemetryRecord) -> Decision {
        match record {
            TelemetryRecord::Span(span) => {
                if span.is_error() {
                    return Decision::Keep(KeepReason::Error);
                }
                if span.is_slow(self.settings.slow_threshold_ms) {
                    return Decision::Keep(KeepReason::Slow);
                }
                self.probabilistic(state, Some(&span.trace_id))
            }
            TelemetryRecord::Log(log) => {
                if log.is_error() {
                    return Decision::Keep(KeepReason::Error);
                }
                if self.first_seen(state, log.pattern_hash) {
                    return Decision::Keep(KeepReason::FirstSeen);
                }
                let trace_id = (!log.trace_id.is_empty()).then_some(log.trace_id.as_str());
                self.probabilistic(state, trace_id)
            }
            TelemetryRecord::Metric(point) => {
                let z =
                    self.baselines
                        .observe(tenant, &point.service_name, &point.name, point.value);
                if let Some(z) = z {
                    if z > self.settings.z_score_threshold {
                        return Decision::Keep(KeepReason::Anomaly);
                    }
                }
                self.probabilistic(state, None)
            }
        }
    }

    /// Probabilistic arm. Deterministic in the trace id so sibling spans share
    /// the outcome; a random draw covers records without one.
    fn probabilistic(&self, state: &TenantState, trace_id: Option<&str>) -> Decision {
        let rate = state.rate.lock().current_rate;

        let hash = match trace_id {
            Some(id) => xxh3_64(id.as_bytes()),
            None => rand::random::<u64>(),
        };

        if (hash as f64 / u64::MAX as f64) < rate {
            Decision::Sampled
        } else {
            Decision::Dropped
        }
    }

    fn first_seen(&self, state: &TenantState, pattern_hash: u64) -> bool {
        if state.seen_patterns.contains(&pattern_hash) {
            return false;
        }
        if state.seen_patterns.len() >= MAX_PATTERNS_PER_TENANT {
            return false;
        }
        state.seen_patterns.insert(pattern_hash)
    }

    /// Current sample rate for a tenant, when the tenant has been seen.
    pub fn tenant_rate(&self, tenant: &str) -> Option<f64> {
        self.tenants
            .get(tenant)
            .map(|state| state.rate.lock().current_rate)
    }

    /// Operator override: pin a tenant's rate (clamped to the adaptive bounds).
    pub fn set_tenant_rate(&self, tenant: &str, rate: f64) {
        let clamped = rate.clamp(self.settings.adaptive.min_rate, self.settings.adaptive.max_rate);
        let state = self.tenant_state(tenant);
        state.rate.lock().current_rate = clamped;
        info!(tenant, rate = clamped, "Tenant sample rate overridden");
    }

    /// One adjustment tick: drain the hot counters into the ring and steer
    /// each tenant's rate toward the target event rate. Call at 1 Hz.
    pub fn adjust_tick(&self) {
        for entry in self.tenants.iter() {
            let tenant = entry.key();
            let state = entry.value();

            let events = state.events_this_second.swap(0, Ordering::Relaxed);
            state.bytes_this_second.swap(0, Ordering::Relaxed);

            let mut rate_state = state.rate.lock();
            let idx = rate_state.idx;
            rate_state.ring[idx] = events;
            rate_state.idx = (idx + 1) % RING_SLOTS;

            if self.settings.adaptive.enabled {
                let avg: f64 =
                    rate_state.ring.iter().sum::<u64>() as f64 / RING_SLOTS as f64;
                let adaptive = &self.settings.adaptive;

                if avg > adaptive.target_eps {
                    let scaled = rate_state.current_rate * (adaptive.target_eps / avg);
                    rate_state.current_rate = scaled.max(adaptive.min_rate);
                } else if avg < adaptive.target_eps / 2.0 {
                    rate_state.current_rate =
                        (rate_state.current_rate * 1.10).min(adaptive.max_rate);
                }
            }

            gauge!(
                "sampling_rate",
                rate_state.current_rate,
                "tenant" => tenant.clone(),
                "data_type" => "all"
            );
        }
    }

    /// Drop tenant state idle for longer than `max_idle`. Returns the evicted count.
    pub fn sweep_stale(&self, max_idle: Duration) -> usize {
        let cutoff = unix_secs().saturating_sub(max_idle.as_secs());
        let before = self.tenants.len();
        self.tenants
            .retain(|_, state| state.last_seen.load(Ordering::Relaxed) >= cutoff);
        let evicted = before - self.tenants.len();
        if evicted > 0 {
            debug!(evicted, "Swept stale tenant sampler state");
        }
        evicted
    }

    /// Sweep metric baselines older than `max_age`.
    pub fn sweep_baselines(&self, max_age: Duration) -> usize {
        self.baselines.sweep_stale(max_age)
    }

    fn tenant_state(&self, tenant: &str) -> Arc<TenantState> {
        self.tenants
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(TenantState::new(self.settings.default_rate)))
            .clone()
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
