//! # Backend Connectivity Check
//!
//! Resolves the active backend configuration the same way the application does and
//! runs one health check against it. Exits 0 when the backend is healthy, 1 otherwise.

use anyhow::Context;
use backend_resilience::client::HttpClientFactory;
use backend_resilience::config::{ConfigResolver, SettingsLoader};
use backend_resilience::health::{HealthCheckResult, HealthMonitor};
use backend_resilience::logging::init_structured_logging;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "connectivity-check")]
#[command(about = "Check backend reachability and credential validity")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Settings file (TOML); defaults to config/backend-resilience.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file holding the user override and offline flag
    #[arg(long)]
    override_file: Option<PathBuf>,

    /// Probe timeout in milliseconds (overrides settings)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_structured_logging();

    match run(&cli).await {
        Ok(result) => {
            if let Err(e) = print_result(&result, cli.format) {
                eprintln!("❌ {e:#}");
                process::exit(1);
            }
            process::exit(if result.healthy { 0 } else { 1 });
        }
        Err(e) => {
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<HealthCheckResult> {
    let loader = match &cli.config {
        Some(path) => SettingsLoader::new().with_file(path),
        None => SettingsLoader::new(),
    };
    let mut settings = loader.load().context("failed to load settings")?;

    if let Some(path) = &cli.override_file {
        settings.connection.override_path = Some(path.clone());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        settings.health.probe_timeout_ms = timeout_ms;
    }

    let factory = HttpClientFactory::new().with_connectivity_path(settings.health.probe_path.clone());
    let resolver = Arc::new(ConfigResolver::from_settings(
        &settings.connection,
        Arc::new(factory),
    ));
    resolver.reinitialize(false);

    if let Some(config) = resolver.current_config() {
        info!(source = ?config.source, offline = config.offline, "Resolved backend configuration");
    }

    let monitor = HealthMonitor::new(resolver, settings.health);
    Ok(monitor.check().await)
}

fn print_result(result: &HealthCheckResult, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Text => {
            if result.healthy {
                println!("✅ Backend healthy");
            } else {
                let kind = result
                    .kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                println!(
                    "❌ Backend unhealthy ({kind}): {}",
                    result.error.as_deref().unwrap_or("no details")
                );
                if let Some(secs) = result.retry_after_secs {
                    println!("   retry in {secs}s");
                }
                if result.is_expired_credential {
                    println!("   issue a new credential and update the configuration");
                }
            }
        }
    }
    Ok(())
}
