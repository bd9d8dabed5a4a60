//! Backhaul worker CLI
//!
//! Runs a reverse tunnel worker: dials out to the master, registers one TCP
//! forward route per `--route` mapping, and serves until stopped.

use anyhow::{Context, Result};
use backhaul_worker::{TcpForwardHandler, Worker, WorkerConfig};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Backhaul reverse tunnel worker - exposes local services through a master's remote ports
#[derive(Parser, Debug)]
#[command(name = "backhaul")]
#[command(about = "Backhaul reverse tunnel worker")]
#[command(version)]
#[command(long_about = r#"
Backhaul dials out to a master over a single control connection and serves
traffic addressed to the master's remote ports by forwarding it to local
services. It never accepts inbound connections itself, so it works from
behind NAT and firewalls.

EXAMPLES:
  # Expose local port 3000 as the master's remote port 7000
  backhaul --master master.example.com:7070 --route 7000=localhost:3000

  # Multiple routes, custom retry policy
  backhaul --master master.example.com:7070 \
    --route 7000=localhost:3000 --route 7001=localhost:5432 \
    --retry-interval-ms 500 --retry-max-attempts 10

  # Run from a config file
  backhaul --config worker.yaml

ENVIRONMENT VARIABLES:
  BACKHAUL_MASTER     Master address (host:port)
  BACKHAUL_WORKER_ID  Worker identifier sent in the handshake
"#)]
struct Args {
    /// Master address (e.g., master.example.com:7070)
    #[arg(long, env = "BACKHAUL_MASTER")]
    master: Option<String>,

    /// Worker ID (auto-generated if not specified)
    #[arg(long, env = "BACKHAUL_WORKER_ID")]
    worker_id: Option<String>,

    /// Route mapping REMOTE_PORT=HOST:PORT (repeatable)
    #[arg(long = "route")]
    routes: Vec<String>,

    /// Pause between dial attempts in milliseconds
    #[arg(long)]
    retry_interval_ms: Option<u64>,

    /// Maximum number of dial attempts
    #[arg(long)]
    retry_max_attempts: Option<u32>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    /// Master connection settings
    master: MasterConfig,

    /// Worker settings
    #[serde(default)]
    worker: WorkerSection,

    /// Route mappings
    #[serde(default)]
    routes: Vec<RouteEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MasterConfig {
    /// Master address (host:port)
    address: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkerSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    retry_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    retry_max_attempts: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RouteEntry {
    remote_port: u16,
    target: String,
}

fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

fn load_config_file(path: &PathBuf) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Parse a REMOTE_PORT=HOST:PORT mapping
fn parse_route(spec: &str) -> Result<(u16, String)> {
    let (port, target) = spec
        .split_once('=')
        .with_context(|| format!("Invalid route '{}' (expected REMOTE_PORT=HOST:PORT)", spec))?;

    let remote_port: u16 = port
        .parse()
        .with_context(|| format!("Invalid remote port in route '{}'", spec))?;

    validate_address(target, "route target")?;
    Ok((remote_port, target.to_string()))
}

/// Validate address format (should be host:port)
fn validate_address(addr: &str, addr_type: &str) -> Result<()> {
    let (host, port) = addr.rsplit_once(':').with_context(|| {
        format!(
            "Invalid {} address format: '{}' (expected format: host:port)",
            addr_type, addr
        )
    })?;

    if host.is_empty() {
        anyhow::bail!(
            "Invalid {} address format: '{}' (host cannot be empty)",
            addr_type,
            addr
        );
    }

    port.parse::<u16>()
        .with_context(|| format!("Invalid port in {} address: {}", addr_type, addr))?;

    Ok(())
}

/// Merge CLI args with config file, giving precedence to CLI args
fn build_worker(args: &Args) -> Result<(WorkerConfig, Vec<(u16, String)>)> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    let master_addr = args
        .master
        .clone()
        .or_else(|| (!file.master.address.is_empty()).then(|| file.master.address.clone()))
        .context("Master address is required (use --master or config file)")?;
    validate_address(&master_addr, "master")?;

    let mut config = WorkerConfig::new(master_addr);

    if let Some(id) = args.worker_id.clone().or(file.worker.id) {
        config = config.with_worker_id(id);
    }
    if let Some(ms) = args.retry_interval_ms.or(file.worker.retry_interval_ms) {
        config = config.with_retry_interval(Duration::from_millis(ms));
    }
    if let Some(attempts) = args.retry_max_attempts.or(file.worker.retry_max_attempts) {
        config = config.with_retry_max_attempts(attempts);
    }

    let mut routes = Vec::new();
    for entry in &file.routes {
        validate_address(&entry.target, "route target")?;
        routes.push((entry.remote_port, entry.target.clone()));
    }
    for spec in &args.routes {
        routes.push(parse_route(spec)?);
    }

    if routes.is_empty() {
        anyhow::bail!("At least one route is required (use --route or config file)");
    }

    Ok((config, routes))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level)?;

    info!("Backhaul worker starting...");

    let (config, routes) = build_worker(&args).context("Failed to build worker configuration")?;

    let mut worker = Worker::new(config);
    worker.init();

    info!("Worker ID: {}", worker.worker_id());
    for (remote_port, target) in &routes {
        info!("Route: remote port {} -> {}", remote_port, target);
        worker.add_route(*remote_port, Arc::new(TcpForwardHandler::new(*remote_port, target.clone())));
    }

    let worker = Arc::new(worker);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut session = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.start().await })
    };

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
            worker.stop();
            match (&mut session).await {
                Ok(Ok(())) => info!("Worker stopped"),
                Ok(Err(e)) => {
                    error!("Worker error during shutdown: {:#}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Worker task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
        result = &mut session => {
            match result {
                Ok(Ok(())) => info!("Worker stopped normally"),
                Ok(Err(e)) => {
                    error!("Worker error: {:#}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Worker task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
