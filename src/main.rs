//! mqtt-health - broker connectivity health endpoint
//!
//! Loads a service configuration, registers one MQTT health check, and either
//! serves the report over HTTP or prints a single report and exits.

use clap::{Parser, Subcommand};
use mqtt_healthcheck::client::{MqttClient, RumqttDirectClient, RumqttManagedClient};
use mqtt_healthcheck::config::{CheckMode, ServiceConfig};
use mqtt_healthcheck::health::{
    HealthCheckRegistry, HealthChecksBuilder, HealthReport, HealthStatus,
};
use mqtt_healthcheck::observability::{init_default_logging, HealthServer};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long `check` waits for the first connection when no timeout is configured
const DEFAULT_CONNECT_WAIT: Duration = Duration::from_secs(5);

/// MQTT broker connectivity health check
#[derive(Parser)]
#[command(name = "mqtt-health")]
#[command(about = "Report whether an MQTT broker is reachable")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_HEALTH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the health report over HTTP until interrupted
    Run {
        /// Only run checks carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Print one health report as JSON; exits 1 when unhealthy
    Check {
        /// Only run checks carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Run { tag } => run_service(config, tag).await,
        Commands::Check { tag } => run_single_check(config, tag).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(2);
        }
    }
}

fn load_configuration(
    config_path: Option<&PathBuf>,
) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ServiceConfig::load_from_file(path)?);
    }

    for candidate in ["mqtt-health.toml", "config/mqtt-health.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ServiceConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create mqtt-health.toml".into())
}

/// Register the configured broker check; also hands back the client so
/// callers can wait for its first connection
fn build_registry(
    config: &ServiceConfig,
) -> Result<(HealthCheckRegistry, Arc<dyn MqttClient>), Box<dyn std::error::Error>> {
    let mut builder = HealthChecksBuilder::new();
    let check_options = config.to_check_options();

    let client: Arc<dyn MqttClient> = match config.health.mode {
        CheckMode::Managed => {
            let client = Arc::new(RumqttManagedClient::new());
            builder.add_mqtt_managed(client.clone(), config.to_managed_options()?, check_options)?;
            client
        }
        CheckMode::Direct => {
            let client = Arc::new(RumqttDirectClient::new());
            builder.add_mqtt_direct(
                client.clone(),
                Some(config.to_client_options()?),
                check_options,
            )?;
            client
        }
    };

    info!(
        broker = %config.mqtt.broker_url,
        mode = ?config.health.mode,
        name = %config.health.name,
        "Registered MQTT health check"
    );
    Ok((builder.build(), client))
}

async fn run_service(
    config: ServiceConfig,
    tag: Option<String>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let (registry, _client) = build_registry(&config)?;
    let registry = Arc::new(registry);

    let mut server = HealthServer::new(registry.clone(), config.server.port, &config.server.path);
    if let Some(tag) = tag {
        server = server.with_tag(tag);
    }
    let server = Arc::new(server);

    let shutdown = CancellationToken::new();
    let mut server_task = tokio::spawn(server.start(shutdown.clone().cancelled_owned()));

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        outcome = &mut server_task => {
            registry.shutdown().await;
            outcome??;
            return Err("health server exited unexpectedly".into());
        }
    }

    shutdown.cancel();
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Health server failed: {}", e),
        Err(e) => warn!("Health server task ended abnormally: {}", e),
    }
    registry.shutdown().await;

    info!("Shutdown complete");
    Ok(0)
}

async fn run_single_check(
    config: ServiceConfig,
    tag: Option<String>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let (registry, client) = build_registry(&config)?;

    let connect_wait = config
        .health
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_CONNECT_WAIT);
    if !wait_until_connected(client.as_ref(), connect_wait).await {
        warn!(
            wait_ms = connect_wait.as_millis() as u64,
            "Broker not connected yet, reporting current state"
        );
    }

    let report: HealthReport = match tag {
        Some(tag) => registry.check_health_tagged(&tag).await,
        None => registry.check_health().await,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    registry.shutdown().await;
    Ok(if report.status == HealthStatus::Unhealthy { 1 } else { 0 })
}

async fn wait_until_connected(client: &dyn MqttClient, wait: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    while !client.is_connected() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    true
}

fn handle_config_command(
    config: &ServiceConfig,
    show: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(0)
}
