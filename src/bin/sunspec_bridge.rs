//! SunSpec bridge service
//!
//! Subscribes to a Ferroamp EnergyHub over MQTT and serves its telemetry as a
//! SunSpec device over Modbus TCP. Every option can also be given through
//! the environment variable named in `--help`.
//!
//! Usage: sunspec-bridge --mqtt-host broker.local --port 502
//! Example: SUNSPEC_SERIAL=FA-0042 sunspec-bridge --mqtt-host 192.168.1.10

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voltage_sunspec::{
    Bridge, BridgeConfig, DeviceIdentity, EhubListener, MqttConfig, SunspecResult,
};

/// Serve Ferroamp EnergyHub telemetry as a SunSpec Modbus TCP device
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Modbus TCP listen host
    #[clap(long, default_value = "0.0.0.0", env = "SUNSPEC_HOST")]
    host: String,

    /// Modbus TCP listen port
    #[clap(short = 'p', long, default_value_t = 502, env = "SUNSPEC_PORT")]
    port: u16,

    /// Register address of the "SunS" marker
    #[clap(long, default_value_t = 40000, env = "SUNSPEC_BASE_ADDRESS")]
    base_address: u16,

    /// Milliseconds allowed for the rest of a frame after its first byte
    #[clap(long, default_value_t = 5000, env = "SUNSPEC_FRAME_TIMEOUT_MS")]
    frame_timeout_ms: u64,

    /// Capacity of the sample queue between MQTT and the register map
    #[clap(long, default_value_t = 1024, env = "SUNSPEC_INGEST_CAPACITY")]
    ingest_capacity: usize,

    /// MQTT broker host
    #[clap(long, default_value = "localhost", env = "MQTT_HOST")]
    mqtt_host: String,

    /// MQTT broker port
    #[clap(long, default_value_t = 1883, env = "MQTT_PORT")]
    mqtt_port: u16,

    /// Topic carrying the ehub messages
    #[clap(long, default_value = "extapi/data/ehub", env = "MQTT_TOPIC")]
    mqtt_topic: String,

    /// MQTT client identifier
    #[clap(long, default_value = "sunspec-bridge", env = "MQTT_CLIENT_ID")]
    mqtt_client_id: String,

    #[clap(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    #[clap(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Common model `Mn`
    #[clap(long, default_value = "Ferroamp", env = "SUNSPEC_MANUFACTURER")]
    manufacturer: String,

    /// Common model `Md`
    #[clap(long, default_value = "EnergyHub 14", env = "SUNSPEC_MODEL")]
    model: String,

    /// Common model `Opt`
    #[clap(long, default_value = "", env = "SUNSPEC_OPTIONS")]
    options: String,

    /// Common model `Vr`
    #[clap(long = "device-version", default_value = "1", env = "SUNSPEC_VERSION")]
    device_version: String,

    /// Common model `SN`
    #[clap(long, default_value = "123456789", env = "SUNSPEC_SERIAL")]
    serial_number: String,

    /// Common model `DA`
    #[clap(long, default_value_t = 1, env = "SUNSPEC_DEVICE_ADDRESS")]
    device_address: u16,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[clap(short = 'l', long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

impl Args {
    fn config(&self) -> BridgeConfig {
        let mut mqtt = MqttConfig::new(&self.mqtt_host)
            .with_port(self.mqtt_port)
            .with_topic(&self.mqtt_topic)
            .with_client_id(&self.mqtt_client_id);
        mqtt.username = self.mqtt_username.clone();
        mqtt.password = self.mqtt_password.clone();

        let identity = DeviceIdentity {
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            options: self.options.clone(),
            version: self.device_version.clone(),
            serial_number: self.serial_number.clone(),
            device_address: self.device_address,
        };

        BridgeConfig::new()
            .with_listen(&self.host, self.port)
            .with_base_address(self.base_address)
            .with_frame_timeout(Duration::from_millis(self.frame_timeout_ms))
            .with_ingest_capacity(self.ingest_capacity)
            .with_identity(identity)
            .with_mqtt(mqtt)
    }
}

fn init_logging(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn run(config: BridgeConfig) -> SunspecResult<()> {
    let bridge = Bridge::new(config)?;
    let listener = bridge.listen().await?;
    let (samples, queue) = bridge.channel();
    let shutdown = CancellationToken::new();

    let listener_task = tokio::spawn(
        EhubListener::new(bridge.config().mqtt.clone()).run(samples, shutdown.clone()),
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let served = bridge.run(listener, queue, shutdown.clone()).await;
    shutdown.cancel();
    match listener_task.await {
        Ok(Err(e)) => warn!("MQTT listener failed: {}", e),
        Err(e) => warn!("MQTT listener task failed: {}", e),
        Ok(Ok(())) => {}
    }
    served
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Starting sunspec-bridge {}", env!("CARGO_PKG_VERSION"));
    match run(args.config()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("sunspec-bridge failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
