// Configuration source loading
//
// Priority (highest wins):
// 1. Environment variables: SIGNALHOUSE__SECTION__KEY
// 2. Explicit config file path
// 3. First existing default config file
// 4. Built-in defaults

use crate::RuntimeConfig;
use config::{Config, Environment, File};
use std::path::Path;
use thiserror::Error;

const ENV_PREFIX: &str = "SIGNALHOUSE";

/// Default locations probed when no explicit path is given
const DEFAULT_LOCATIONS: &[&str] = &[
    "./signalhouse.yaml",
    "./config/signalhouse.yaml",
    "/etc/signalhouse/signalhouse.yaml",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read configuration: {0}")]
    Read(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] anyhow::Error),
}

/// Load configuration, merging file, environment and defaults
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let mut builder = Config::builder();

    match path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            builder = builder.add_source(File::from(path));
        }
        None => {
            // First existing default location wins; none existing is fine,
            // the built-in defaults cover every field.
            if let Some(found) = DEFAULT_LOCATIONS.iter().find(|p| Path::new(p).exists()) {
                tracing::debug!(path = found, "Loading config file");
                builder = builder.add_source(File::with_name(found));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__"),
    );

    let config: RuntimeConfig = builder.build()?.try_deserialize()?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let result = load_config(Some(Path::new("/nonexistent/signalhouse.yaml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_no_file_falls_back_to_defaults() {
        // No default location exists in the test environment
        let config = load_config(None).expect("defaults should load");
        assert_eq!(config.tenancy.default_tenant, "default");
        assert_eq!(config.batch.max_rows, 10_000);
    }
}
