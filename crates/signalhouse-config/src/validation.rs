// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use std::net::SocketAddr;
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_batch_config(&config.batch)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_sampling_config(&config.sampling)?;
    validate_alerting_config(&config.alerting)?;

    if config.clickhouse.database.is_empty() {
        bail!("clickhouse.database must not be empty");
    }
    if config.state_store.url.is_empty() {
        bail!("state_store.url must not be empty");
    }

    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    for (name, addr) in [
        ("server.grpc_addr", &config.grpc_addr),
        ("server.http_addr", &config.http_addr),
        ("server.metrics_addr", &config.metrics_addr),
    ] {
        if addr.parse::<SocketAddr>().is_err() {
            bail!("{} is not a valid socket address: {}", name, addr);
        }
    }

    if config.max_body_bytes == 0 {
        bail!("server.max_body_bytes must be greater than 0");
    }
    if config.grpc_max_message_bytes == 0 {
        bail!("server.grpc_max_message_bytes must be greater than 0");
    }

    if config.max_body_bytes > 100 * 1024 * 1024 {
        warn!(
            max_body_bytes = config.max_body_bytes,
            "server.max_body_bytes is very large; may cause memory issues"
        );
    }

    Ok(())
}

fn validate_batch_config(config: &BatchConfig) -> Result<()> {
    if config.max_rows == 0 {
        bail!("batch.max_rows must be greater than 0");
    }
    if config.max_bytes == 0 {
        bail!("batch.max_bytes must be greater than 0");
    }
    if config.hard_cap_rows < config.max_rows {
        bail!("batch.hard_cap_rows must be >= batch.max_rows");
    }
    if config.flush_interval.is_zero() {
        bail!("batch.flush_interval must be greater than 0");
    }

    if config.max_rows > 10_000_000 {
        warn!(
            max_rows = config.max_rows,
            "batch.max_rows is very large; may cause memory issues"
        );
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    if config.default_rps <= 0.0 {
        bail!("rate_limit.default_rps must be greater than 0");
    }
    if config.default_burst < 1.0 {
        bail!("rate_limit.default_burst must be at least 1");
    }

    for (tenant, limits) in &config.overrides {
        if limits.rps <= 0.0 || limits.burst < 1.0 {
            bail!("rate_limit.overrides.{} has non-positive limits", tenant);
        }
    }

    Ok(())
}

fn validate_sampling_config(config: &SamplingConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&config.default_rate) {
        bail!("sampling.default_rate must be within [0, 1]");
    }
    if config.z_score_threshold <= 0.0 {
        bail!("sampling.z_score_threshold must be greater than 0");
    }

    let adaptive = &config.adaptive;
    if !(0.0..=1.0).contains(&adaptive.min_rate) || !(0.0..=1.0).contains(&adaptive.max_rate) {
        bail!("sampling.adaptive rates must be within [0, 1]");
    }
    if adaptive.min_rate > adaptive.max_rate {
        bail!("sampling.adaptive.min_rate must be <= max_rate");
    }
    if adaptive.enabled && adaptive.target_eps <= 0.0 {
        bail!("sampling.adaptive.target_eps must be greater than 0");
    }
    if config.default_rate < adaptive.min_rate || config.default_rate > adaptive.max_rate {
        bail!("sampling.default_rate must lie within [min_rate, max_rate]");
    }

    Ok(())
}

fn validate_alerting_config(config: &AlertingConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    if config.reload_interval.is_zero() {
        bail!("alerting.reload_interval must be greater than 0");
    }

    for (name, url) in [
        ("alerting.webhook_url", &config.webhook_url),
        ("alerting.alertmanager_url", &config.alertmanager_url),
        ("alerting.slack_webhook_url", &config.slack_webhook_url),
    ] {
        if let Some(url) = url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("{} must be an http(s) URL: {}", name, url);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_listen_addr_rejected() {
        let mut config = RuntimeConfig::default();
        config.server.http_addr = "not-an-addr".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hard_cap_below_max_rows_rejected() {
        let mut config = RuntimeConfig::default();
        config.batch.hard_cap_rows = config.batch.max_rows - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_rate_outside_clamp_rejected() {
        let mut config = RuntimeConfig::default();
        config.sampling.default_rate = 0.5;
        config.sampling.adaptive.min_rate = 0.6;
        config.sampling.adaptive.max_rate = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_rate_above_one_rejected() {
        let mut config = RuntimeConfig::default();
        config.sampling.default_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_http_sink_url_rejected() {
        let mut config = RuntimeConfig::default();
        config.alerting.webhook_url = Some("ftp://example.com/hook".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_rate_limit_skips_checks() {
        let mut config = RuntimeConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.default_rps = 0.0;
        assert!(config.validate().is_ok());
    }
}
