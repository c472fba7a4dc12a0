// signalhouse-sampler - Admission and sampling
//
// Decides the fate of every canonical record with adaptive fairness across
// tenants: per-tenant token buckets gate request admission, per-record
// decisions keep errors, slow spans, anomalies and first-seen log patterns,
// and a probabilistic arm with an adaptive rate covers the rest.

mod baseline;
mod limiter;
mod sampler;

pub use baseline::BaselineTracker;
pub use limiter::{LimiterSettings, TenantLimit, TenantLimiter};
pub use sampler::{AdaptiveSettings, Decision, KeepReason, Sampler, SamplerSettings};
