//! Sensor publisher - main entry point

use clap::{Parser, Subcommand};
use hass_sensor_publisher::config::PublisherConfig;
use hass_sensor_publisher::network::HostNetworkLink;
use hass_sensor_publisher::observability::init_default_logging;
use hass_sensor_publisher::publisher::SensorPublisher;
use hass_sensor_publisher::transport::MqttTransport;
use hass_sensor_publisher::PublisherError;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DEFAULT_CONFIG_PATHS: &[&str] = &["publisher.toml", "config/publisher.toml"];

/// Publish sensor readings to an MQTT broker with Home Assistant discovery
#[derive(Parser)]
#[command(name = "hass-sensor-publisher")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "PUBLISHER_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging when LOG_LEVEL is unset
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach, announce the sensors and publish until interrupted
    Run,
    /// Validate the configuration
    Config {
        /// Print the resolved configuration and sensor descriptors
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting sensor publisher v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(e.exit_code());
        }
    };

    let result = match cli.command {
        Commands::Run => run_publisher(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(e.exit_code());
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<PublisherConfig, PublisherError> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(PublisherConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(PublisherConfig::load_from_file(path)?);
        }
    }

    Err(PublisherError::Config(
        hass_sensor_publisher::ConfigError::Validation(
            "no configuration file found; pass -c/--config or create publisher.toml".to_string(),
        ),
    ))
}

async fn run_publisher(config: PublisherConfig) -> Result<(), PublisherError> {
    let cancel = CancellationToken::new();
    let link = HostNetworkLink::new(config.reach_address()?);
    let transport = MqttTransport::new(config.mqtt_settings());

    let mut publisher = SensorPublisher::from_config(&config, link, transport, cancel.clone())?;

    let signals = tokio::spawn(wait_for_shutdown(cancel.clone()));

    let result = publisher.run().await;
    publisher.shutdown().await;
    signals.abort();

    result
}

/// Cancel `cancel` on SIGINT or SIGTERM
async fn wait_for_shutdown(cancel: CancellationToken) {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            if signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT, shutting down gracefully...");
            }
            cancel.cancel();
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    cancel.cancel();
}

fn handle_config_command(config: &PublisherConfig, show: bool) -> Result<(), PublisherError> {
    // Credentials must resolve before a run can succeed
    config.broker_session_config()?;
    config.network_credentials()?;

    if show {
        println!("Current configuration:");
        match toml::to_string_pretty(config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => error!("Failed to render configuration: {}", e),
        }

        println!("Sensor descriptors:");
        for descriptor in config.descriptors() {
            match serde_json::to_string_pretty(&descriptor) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => error!("Failed to render descriptor: {}", e),
            }
        }
    }

    info!(sensors = config.sensors.len(), "Configuration validation complete");
    Ok(())
}
