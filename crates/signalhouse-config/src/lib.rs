// signalhouse-config - Unified configuration for the telemetry gateway
//
// Supports configuration from multiple sources:
// 1. Environment variables with the SIGNALHOUSE prefix (highest priority)
// 2. Explicit config file path (--config / load_from_path)
// 3. Default config file locations (./signalhouse.yaml, ./config/signalhouse.yaml,
//    /etc/signalhouse/signalhouse.yaml)
// 4. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

mod sources;
mod validation;

pub use sources::ConfigError;

/// Main runtime configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub clickhouse: ClickHouseConfig,
    pub batch: BatchConfig,
    pub state_store: StateStoreConfig,
    pub rate_limit: RateLimitConfig,
    pub tenancy: TenancyConfig,
    pub sampling: SamplingConfig,
    pub alerting: AlertingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            clickhouse: ClickHouseConfig::default(),
            batch: BatchConfig::default(),
            state_store: StateStoreConfig::default(),
            rate_limit: RateLimitConfig::default(),
            tenancy: TenancyConfig::default(),
            sampling: SamplingConfig::default(),
            alerting: AlertingConfig::default(),
        }
    }
}

/// Listener addresses and logging
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub grpc_addr: String,
    pub http_addr: String,
    pub metrics_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Maximum decoded HTTP body size in bytes
    pub max_body_bytes: usize,
    /// Maximum decoded gRPC message size in bytes
    pub grpc_max_message_bytes: usize,
    /// How long to wait for in-flight requests on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_drain: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: "0.0.0.0:4317".to_string(),
            http_addr: "0.0.0.0:4318".to_string(),
            metrics_addr: "0.0.0.0:9464".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            max_body_bytes: 10 * 1024 * 1024,
            grpc_max_message_bytes: 16 * 1024 * 1024,
            shutdown_drain: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Columnar store connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClickHouseConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub compression: Compression,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "telemetry".to_string(),
            username: "default".to_string(),
            password: String::new(),
            compression: Compression::Lz4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Lz4,
}

/// Batched-writer tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Row count that triggers an eager flush
    pub max_rows: usize,
    /// Approximate buffered bytes that trigger an eager flush
    pub max_bytes: usize,
    /// Row count at which the writer starts dropping (hard memory cap)
    pub hard_cap_rows: usize,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub insert_timeout: Duration,
}

impl Default for BatchConfig {
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

/// Shared state store (Redis protocol)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateStoreConfig {
    pub url: String,
    pub key_prefix: String,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "signalhouse".to_string(),
        }
    }
}

/// Per-tenant token-bucket admission
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default_rps: f64,
    pub default_burst: f64,
    /// Per-tenant overrides keyed by tenant id
    pub overrides: HashMap<String, TenantLimitOverride>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_rps: 1_000.0,
            default_burst: 2_000.0,
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantLimitOverride {
    pub rps: f64,
    pub burst: f64,
}

/// Tenant extraction
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    pub enabled: bool,
    /// Request header carrying the tenant id
    pub header: String,
    pub default_tenant: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header: "x-tenant-id".to_string(),
            default_tenant: "default".to_string(),
        }
    }
}

/// Sampling decisions and adaptive rate control
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub enabled: bool,
    /// Initial per-tenant sample rate in [0, 1]
    pub default_rate: f64,
    /// Spans longer than this are always kept
    pub slow_threshold_ms: u64,
    /// Z-score above which a metric point is an anomaly
    pub z_score_threshold: f64,
    pub adaptive: AdaptiveConfig,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_rate: 1.0,
            slow_threshold_ms: 1_000,
            z_score_threshold: 3.0,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Events per second the controller steers each tenant toward
    pub target_eps: f64,
    pub min_rate: f64,
    pub max_rate: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_eps: 1_000.0,
            min_rate: 0.01,
            max_rate: 1.0,
        }
    }
}

/// Alert rule evaluation and sink fan-out
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub enabled: bool,
    /// YAML file containing the rule list; alerting is a no-op when absent
    pub rules_path: Option<String>,
    #[serde(with = "humantime_serde")]
    pub reload_interval: Duration,
    pub webhook_url: Option<String>,
    pub alertmanager_url: Option<String>,
    pub slack_webhook_url: Option<String>,
    /// Labels merged into every alert
    pub labels: HashMap<String, String>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules_path: None,
            reload_interval: Duration::from_secs(60),
            webhook_url: None,
            alertmanager_url: None,
            slack_webhook_url: None,
            labels: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from default locations plus environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        sources::load_config(None)
    }

    /// Load configuration from an explicit file path plus environment overrides
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        sources::load_config(Some(path))
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        validation::validate_config(self)
    }
}
