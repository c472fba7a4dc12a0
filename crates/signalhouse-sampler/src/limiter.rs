//! Per-tenant token-bucket admission.
//!
//! One bucket per tenant, created on first sight, refilled continuously at
//! `rps` up to `burst` capacity. Requests cost one token. The map is swept
//! periodically so idle tenants do not accumulate.

use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Per-tenant limit override.
#[derive(Debug, Clone, Copy)]
pub struct TenantLimit {
    pub rps: f64,
    pub burst: f64,
}

#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub enabled: bool,
    pub default_rps: f64,
    pub default_burst: f64,
    pub overrides: HashMap<String, TenantLimit>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_rps: 1_000.0,
            default_burst: 2_000.0,
            overrides: HashMap::new(),
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    rps: f64,
    burst: f64,
}

struct TenantBucket {
    state: Mutex<BucketState>,
    last_used: AtomicU64,
}

impl TenantBucket {
    fn new(limit: TenantLimit) -> Self {
        Self {
            state: Mutex::new(BucketState {
                // Buckets start full so a new tenant gets its burst immediately
                tokens: limit.burst,
                last_refill: Instant::now(),
                rps: limit.rps,
                burst: limit.burst,
            }),
            last_used: AtomicU64::new(unix_secs()),
        }
    }
}

/// Token-bucket limiter keyed by tenant.
pub struct TenantLimiter {
    settings: LimiterSettings,
    tenants: DashMap<String, TenantBucket>,
}

impl TenantLimiter {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            settings,
            tenants: DashMap::new(),
        }
    }

    /// Submit a cost-1 request for the tenant. Returns false when the bucket
    /// is exhausted; the caller responds `resource_exhausted`.
    pub fn check(&self, tenant: &str) -> bool {
        if !self.settings.enabled {
            return true;
        }

        let bucket = self
            .tenants
            .entry(tenant.to_string())
            .or_insert_with(|| TenantBucket::new(self.limit_for(tenant)));
        bucket.last_used.store(unix_secs(), Ordering::Relaxed);

        let allowed = {
            let mut state = bucket.state.lock();
            let elapsed = state.last_refill.elapsed().as_secs_f64();
            state.tokens = (state.tokens + elapsed * state.rps).min(state.burst);
            state.last_refill = Instant::now();

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                true
            } else {
                false
            }
        };

        if allowed {
            counter!("rate_limit_allowed_total", 1, "tenant" => tenant.to_string());
        } else {
            counter!("rate_limit_hits_total", 1, "tenant" => tenant.to_string());
        }

        allowed
    }

    /// Drop buckets idle for longer than `max_idle`. Returns the evicted count.
    pub fn sweep_stale(&self, max_idle: Duration) -> usize {
        let cutoff = unix_secs().saturating_sub(max_idle.as_secs());
        let before = self.tenants.len();
        self.tenants
            .retain(|_, bucket| bucket.last_used.load(Ordering::Relaxed) >= cutoff);
        let evicted = before - self.tenants.len();
        if evicted > 0 {
            debug!(evicted, "Swept stale tenant limiters");
        }
        evicted
    }

    fn limit_for(&self, tenant: &str) -> TenantLimit {
        self.settings
            .overrides
            .get(tenant)
            .copied()
            .unwrap_or(TenantLimit {
                rps: self.settings.default_rps,
                burst: self.settings.default_burst,
            })
    }

    #[cfg(test)]
    fn tenant_count(&self) -> usize {
        self.tenants.len()
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(rps: f64, burst: f64) -> LimiterSettings {
        LimiterSettings {
            enabled: true,
            default_rps: rps,
            default_burst: burst,
            overrides: HashMap::new(),
        }
    }

    #[test]
    fn test_burst_boundary() {
        // Negligible refill rate: exactly `burst` requests pass, the next is denied
        let limiter = TenantLimiter::new(settings(0.0001, 5.0));
        for _ in 0..5 {
            assert!(limiter.check("acme"));
        }
        assert!(!limiter.check("acme"));
    }

    #[test]
    fn test_refill_restores_tokens() {
        let limiter = TenantLimiter::new(settings(100.0, 2.0));
        assert!(limiter.check("acme"));
        assert!(limiter.check("acme"));
        assert!(!limiter.check("acme"));

        // 100 rps: ~50ms refills well over one token
        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.check("acme"));
    }

    #[test]
    fn test_tenants_are_independent() {
        let limiter = TenantLimiter::new(settings(0.0001, 1.0));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn test_override_applies() {
        let mut s = settings(0.0001, 1.0);
        s.overrides.insert(
            "vip".to_string(),
            TenantLimit {
                rps: 0.0001,
                burst: 3.0,
            },
        );
        let limiter = TenantLimiter::new(s);
        for _ in 0..3 {
            assert!(limiter.check("vip"));
        }
        assert!(!limiter.check("vip"));
    }

    #[test]
    fn test_disabled_always_allows() {
        let mut s = settings(0.0001, 1.0);
        s.enabled = false;
        let limiter = TenantLimiter::new(s);
        for _ in 0..100 {
            assert!(limiter.check("acme"));
        }
        // Disabled limiter tracks no tenants
        assert_eq!(limiter.tenant_count(), 0);
    }

    #[test]
    fn test_sweep_evicts_idle_tenants() {
        let limiter = TenantLimiter::new(settings(10.0, 10.0));
        limiter.check("acme");
        assert_eq!(limiter.sweep_stale(Duration::from_secs(1800)), 0);
        assert_eq!(limiter.tenant_count(), 1);

        // Backdate the tenant past the idle threshold
        limiter
            .tenants
            .get("acme")
            .unwrap()
            .last_used
            .store(unix_secs() - 3600, Ordering::Relaxed);
        assert_eq!(limiter.sweep_stale(Duration::from_secs(1800)), 1);
        assert_eq!(limiter.tenant_count(), 0);
    }
}
