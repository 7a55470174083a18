//! svcguard CLI — inspect breaker configuration and replay failure scenarios.
//!
//! # Commands
//! ```text
//! svcguard defaults
//! svcguard check-config --file <path.json>
//! svcguard simulate     --service <name> --outcomes <pattern> [--step-ms <N>] [--fallback]
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use svcguard_core::{CircuitBreakerConfig, RegistryConfig};
use svcguard_observability::{init_tracing, LogConfig};

mod cmd_simulate;

#[derive(Parser)]
#[command(
    name = "svcguard",
    about = "Circuit breaker configuration and scenario tool",
    long_about = "
svcguard: validate per-dependency circuit breaker configs and replay
success/failure sequences against a breaker to see how it reacts.

ENVIRONMENT VARIABLES:
  SVCGUARD_CONFIG   Path to a registry config JSON file
  RUST_LOG          Overrides --log-level when set
",
    version
)]
struct Cli {
    /// Default log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Registry config file (JSON)
    #[arg(long, global = true, env = "SVCGUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the built-in breaker defaults as JSON
    Defaults,

    /// Load and validate a registry config, then print each resolved service config
    #[command(name = "check-config")]
    CheckConfig {
        /// Config file to check (falls back to --config / SVCGUARD_CONFIG)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Drive one breaker through a scripted outcome sequence
    Simulate {
        /// Dependency name (selects per-service overrides from the config)
        #[arg(long)]
        service: String,
        /// Outcomes, one char per step: s = success, f = failure, w = wait
        #[arg(long)]
        outcomes: String,
        /// How long each `w` step waits, in milliseconds
        #[arg(long, default_value_t = 1_000)]
        step_ms: u64,
        /// Serve a fallback value instead of surfacing errors
        #[arg(long)]
        fallback: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
        ..Default::default()
    });

    match cli.command {
        Commands::Defaults => {
            let json = serde_json::to_string_pretty(&CircuitBreakerConfig::default())?;
            println!("{json}");
            Ok(())
        }
        Commands::CheckConfig { file } => {
            let path = file
                .or(cli.config)
                .context("no config file given (use --file, --config or SVCGUARD_CONFIG)")?;
            cmd_check_config(&path)
        }
        Commands::Simulate {
            service,
            outcomes,
            step_ms,
            fallback,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let script = cmd_simulate::parse_script(&outcomes)?;
            let report = cmd_simulate::run(config, &service, &script, step_ms, fallback).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<RegistryConfig> {
    match path {
        Some(path) => RegistryConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(RegistryConfig::default()),
    }
}

fn cmd_check_config(path: &std::path::Path) -> Result<()> {
    let config = load_config(Some(path))?;

    println!("{}: OK", path.display());
    println!(
        "  defaults: failure_threshold={} success_threshold={} reset_timeout={}ms window={}ms",
        config.defaults.failure_threshold,
        config.defaults.success_threshold,
        config.defaults.reset_timeout_ms,
        config.defaults.monitoring_window_ms,
    );

    let mut services: Vec<_> = config.services.keys().collect();
    services.sort();
    for name in services {
        let c = config.for_service(name);
        let probes = c
            .half_open_max_probes
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string());
        println!(
            "  {name}: failure_threshold={} success_threshold={} reset_timeout={}ms window={}ms probes={probes}",
            c.failure_threshold, c.success_threshold, c.reset_timeout_ms, c.monitoring_window_ms,
        );
    }
    Ok(())
}
