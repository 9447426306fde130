//! fleetload CLI
//!
//! Launches a fleet of simulated devices against one server and reports how
//! their registrations, updates and deregistrations went.
//!
//! # Usage
//!
//! ```bash
//! # 1000 endpoints started over 5 minutes, 1700 updates per minute, 1 hour
//! fleetload run -u coap://localhost:5683 -n 1000 -s 5m --updates-per-minute 1700 -d 1h
//!
//! # Everything from a file, report written as JSON
//! fleetload run --config fleet.toml --report-json report.json
//! ```

use clap::{Args, Parser, Subcommand};
use fleetload_launcher::{parse_rehandshake, FileConfig, LaunchConfig, Launcher};
use fleetload_scheduler::RehandshakePolicy;
use fleetload_synthetic::{SyntheticConfig, SyntheticFactory};
use std::error::Error;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetload")]
#[command(about = "Simulate a fleet of devices against one server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a fleet and wait for the run to end
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file (TOML). Flags given explicitly override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server URI, e.g. coap://localhost:5683. Use coaps for pre-shared keys.
    #[arg(short = 'u', long)]
    server_url: Option<String>,

    /// Number of endpoints to simulate [default: 1]
    #[arg(short = 'n', long, alias = "endpoints")]
    number_of_clients: Option<usize>,

    /// Window to start every endpoint in [default: 3s per endpoint]
    #[arg(short = 's', long)]
    start_time: Option<humantime::Duration>,

    /// Period of self-driven updates of every endpoint [default: 60s]
    #[arg(short = 'c', long, conflicts_with = "updates_per_minute")]
    communication_period: Option<humantime::Duration>,

    /// Updates triggered per minute across the whole fleet, one endpoint at
    /// a time
    #[arg(long)]
    updates_per_minute: Option<u32>,

    /// Send no updates at all
    #[arg(long, conflicts_with_all = ["communication_period", "updates_per_minute"])]
    no_refresh: bool,

    /// Handshake forced by triggered updates (none, full, abbreviated)
    #[arg(long, value_parser = parse_rehandshake_arg)]
    rehandshake: Option<RehandshakePolicy>,

    /// Bootstrap instead of registering directly
    #[arg(short = 'b', long)]
    bootstrap: bool,

    /// Reconnect (rehandshake) on every update
    #[arg(short = 'r', long)]
    reconnect_on_update: bool,

    /// Do not resume the previous session when reconnecting
    #[arg(short = 'f', long)]
    no_resume: bool,

    /// Run duration, e.g. "30s", "10m", "1h" [default: until Ctrl+C]
    #[arg(short = 'd', long)]
    duration: Option<humantime::Duration>,

    /// Endpoint name pattern [default: LESHAN%08d]
    #[arg(short = 'e', long)]
    endpoint_pattern: Option<String>,

    /// Pre-shared key identity pattern [default: the endpoint pattern]
    #[arg(short = 'i', long)]
    pskid_pattern: Option<String>,

    /// Pre-shared key pattern, hexadecimal once expanded
    /// [default: 1234567890ABCDEF%08X]
    #[arg(short = 'k', long)]
    pskkey_pattern: Option<String>,

    /// Additional registration attribute (key=value, both may be patterns)
    #[arg(short = 'a', long = "additional-attribute", value_parser = parse_key_val)]
    additional_attributes: Vec<(String, String)>,

    /// Worker threads for endpoint I/O [default: one per 8 endpoints]
    #[arg(long)]
    workers: Option<usize>,

    /// Log every metric periodically while the run is active
    #[arg(long)]
    log_period: Option<humantime::Duration>,

    /// Report to a Graphite server
    #[arg(short = 'g', long)]
    graphite_report: bool,

    /// Graphite server address [default: localhost:2003]
    #[arg(long)]
    graphite_url: Option<String>,

    /// Graphite push period [default: 5s]
    #[arg(long)]
    graphite_polling_period: Option<humantime::Duration>,

    /// Write the final report as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Minimum simulated exchange latency
    #[arg(long)]
    latency_min: Option<humantime::Duration>,

    /// Maximum simulated exchange latency
    #[arg(long)]
    latency_max: Option<humantime::Duration>,

    /// Share of simulated exchanges that fail (0.0 to 1.0)
    #[arg(long)]
    failure_ratio: Option<f64>,

    /// Share of simulated exchanges that time out (0.0 to 1.0)
    #[arg(long)]
    timeout_ratio: Option<f64>,

    /// Seed of the simulated outcomes
    #[arg(long)]
    seed: Option<u64>,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_rehandshake_arg(s: &str) -> Result<RehandshakePolicy, String> {
    parse_rehandshake(s).ok_or_else(|| format!("Unknown rehandshake policy: {}", s))
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected key=value, got: {}", s))?;
    Ok((key.to_string(), value.to_string()))
}

fn build_config(args: &RunArgs, file: Option<&FileConfig>) -> Result<LaunchConfig, Box<dyn Error>> {
    let mut config = LaunchConfig::default();
    if let Some(file) = file {
        config = file.apply(config)?;
    }

    match (&args.server_url, file.and_then(|f| f.server_uri.as_ref())) {
        (Some(url), _) => config.server_uri = url.clone(),
        (None, Some(_)) => {}
        (None, None) => return Err("--server-url is required unless the config file sets server_uri".into()),
    }
    if let Some(endpoints) = args.number_of_clients {
        config.endpoints = endpoints;
    }
    if let Some(window) = args.start_time {
        config.start_window = Some(*window);
    }
    if let Some(period) = args.communication_period {
        config = config.with_communication_period(*period);
    }
    if let Some(rate) = args.updates_per_minute {
        config = config.with_global_rate(rate);
    }
    if args.no_refresh {
        config = config.without_refresh();
    }
    if let Some(policy) = args.rehandshake {
        config.rehandshake = policy;
    }
    if let Some(duration) = args.duration {
        config.duration = Some(*duration);
    }
    if args.bootstrap {
        config.bootstrap = true;
    }
    if args.reconnect_on_update {
        config.reconnect_on_update = true;
    }
    if args.no_resume {
        config.resume_on_connect = false;
    }
    if let Some(pattern) = &args.endpoint_pattern {
        config.endpoint_pattern = pattern.clone();
    }
    if let Some(pattern) = &args.pskid_pattern {
        config.psk_id_pattern = Some(pattern.clone());
    }
    if let Some(pattern) = &args.pskkey_pattern {
        config.psk_key_pattern = pattern.clone();
    }
    for (key, value) in &args.additional_attributes {
        config = config.with_attribute(key, value);
    }
    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    }
    if let Some(period) = args.log_period {
        config.log_period = Some(*period);
    }
    if args.graphite_report || args.graphite_url.is_some() || args.graphite_polling_period.is_some()
    {
        let mut graphite = config.graphite.take().unwrap_or_default();
        if let Some(url) = &args.graphite_url {
            graphite.address = url.clone();
        }
        if let Some(period) = args.graphite_polling_period {
            graphite.period = *period;
        }
        config.graphite = Some(graphite);
    }
    Ok(config)
}

fn synthetic_config(args: &RunArgs, file: Option<&FileConfig>) -> SyntheticConfig {
    let mut config = file
        .and_then(|f| f.synthetic.clone())
        .unwrap_or_default();
    if let Some(min) = args.latency_min {
        config.min_latency_ms = min.as_millis() as u64;
    }
    if let Some(max) = args.latency_max {
        config.max_latency_ms = max.as_millis() as u64;
    }
    if let Some(ratio) = args.failure_ratio {
        config.failure_ratio = ratio;
    }
    if let Some(ratio) = args.timeout_ratio {
        config.timeout_ratio = ratio;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
                )
                .init();

            let file = args.config.as_deref().map(FileConfig::load).transpose()?;
            let config = build_config(&args, file.as_ref())?;
            let factory = SyntheticFactory::new(synthetic_config(&args, file.as_ref()))?;
            info!(synthetic = ?factory.config(), "Using the synthetic endpoint backend");

            let mut launcher = Launcher::new(config, &factory)?;
            launcher.start()?;

            let interrupted = tokio::select! {
                _ = launcher.completed() => false,
                _ = shutdown_signal() => true,
            };
            let report = if interrupted {
                info!("Stopping endpoints without deregistration");
                launcher.destroy(false).await
            } else {
                launcher.wait_to_end().await?
            };

            info!("Finished");
            println!("{}", report);

            if let Some(path) = &args.report_json {
                std::fs::write(path, report.to_json()?)?;
                info!(path = %path.display(), "Report written");
            }
        }
    }

    Ok(())
}
