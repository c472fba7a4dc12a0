use anyhow::{Context, Result};
use clap::Parser;
use signalhouse_config::RuntimeConfig;
use std::path::PathBuf;

/// Multi-tenant OTLP gateway writing to ClickHouse
#[derive(Parser)]
#[command(name = "signalhouse")]
#[command(version)]
#[command(about = "Multi-tenant OTLP gateway with adaptive sampling and alerting", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP listen port (overrides config file)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build tokio runtime and run async server
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Step 1: Load base configuration
    let mut config = if let Some(config_path) = &cli.config {
        RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load().context("Failed to load configuration")?
    };

    // Step 2: Apply CLI overrides (highest priority)
    apply_cli_overrides(&mut config, &cli);

    // Step 3: Validate the merged configuration before binding anything
    config
        .validate()
        .context("Configuration failed validation")?;

    // Step 4: Run server with resolved config
    signalhouse_server::run_with_config(config).await
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(port) = cli.port {
        config.server.http_addr = format!("0.0.0.0:{}", port);
    }

    if let Some(level) = &cli.log_level {
        config.server.log_level = level.clone();
    }
}
