//! # Bridge Configuration
//!
//! Resolved startup settings. The binary fills these from CLI flags and
//! environment variables; tests build them directly with the `with_*`
//! methods.
//!
//! | Setting | Default |
//! |---------|---------|
//! | Modbus listen address | `0.0.0.0:502` |
//! | SunSpec base address | `40000` |
//! | Frame timeout | 5 s |
//! | Ingest queue capacity | 1024 samples |
//! | MQTT broker | `localhost:1883`, topic `extapi/data/ehub` |

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::constants::{DEFAULT_TCP_PORT, SUNSPEC_BASE_ADDRESS};
use crate::error::{SunspecError, SunspecResult};

/// Default time allowed for the rest of a frame once its first byte arrived.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the sample queue between MQTT and the binder.
pub const DEFAULT_INGEST_CAPACITY: usize = 1024;

/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Identity strings published in the SunSpec Common model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// `Mn`, up to 32 bytes
    pub manufacturer: String,
    /// `Md`, up to 32 bytes
    pub model: String,
    /// `Opt`, up to 16 bytes
    pub options: String,
    /// `Vr`, up to 16 bytes
    pub version: String,
    /// `SN`, up to 32 bytes
    pub serial_number: String,
    /// `DA`
    pub device_address: u16,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "Ferroamp".to_string(),
            model: "EnergyHub 14".to_string(),
            options: String::new(),
            version: "1".to_string(),
            serial_number: "123456789".to_string(),
            device_address: 1,
        }
    }
}

impl DeviceIdentity {
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = serial_number.into();
        self
    }

    pub fn with_device_address(mut self, device_address: u16) -> Self {
        self.device_address = device_address;
        self
    }

    fn validate(&self) -> SunspecResult<()> {
        for (name, value, limit) in [
            ("manufacturer", &self.manufacturer, 32),
            ("model", &self.model, 32),
            ("options", &self.options, 16),
            ("version", &self.version, 16),
            ("serial number", &self.serial_number, 32),
        ] {
            if value.len() > limit {
                return Err(SunspecError::configuration(format!(
                    "{} {:?} is longer than {} bytes",
                    name, value, limit
                )));
            }
        }
        Ok(())
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Pause after a broker connection error before polling again
    pub reconnect_delay: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_MQTT_PORT,
            topic: crate::ferroamp::EHUB_TOPIC.to_string(),
            client_id: "sunspec-bridge".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl MqttConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn validate(&self) -> SunspecResult<()> {
        if self.host.is_empty() {
            return Err(SunspecError::configuration("MQTT host is empty"));
        }
        if self.topic.is_empty() || self.topic.contains(['+', '#']) {
            return Err(SunspecError::configuration(format!(
                "MQTT topic {:?} must be a concrete topic",
                self.topic
            )));
        }
        if self.client_id.is_empty() {
            return Err(SunspecError::configuration("MQTT client id is empty"));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(SunspecError::configuration("MQTT password given without username"));
        }
        Ok(())
    }
}

/// Complete bridge configuration.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use voltage_sunspec::BridgeConfig;
///
/// let config = BridgeConfig::new()
///     .with_listen("127.0.0.1", 1502)
///     .with_frame_timeout(Duration::from_secs(2));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.socket_addr().unwrap().port(), 1502);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Modbus listen host
    pub host: String,
    /// Modbus listen port
    pub port: u16,
    /// Wire address of the "SunS" marker
    pub base_address: u16,
    pub frame_timeout: Duration,
    pub ingest_capacity: usize,
    pub identity: DeviceIdentity,
    pub mqtt: MqttConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_TCP_PORT,
            base_address: SUNSPEC_BASE_ADDRESS,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            ingest_capacity: DEFAULT_INGEST_CAPACITY,
            identity: DeviceIdentity::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listen(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_base_address(mut self, base_address: u16) -> Self {
        self.base_address = base_address;
        self
    }

    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn with_ingest_capacity(mut self, capacity: usize) -> Self {
        self.ingest_capacity = capacity;
        self
    }

    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_mqtt(mut self, mqtt: MqttConfig) -> Self {
        self.mqtt = mqtt;
        self
    }

    /// Resolve the Modbus listen address.
    pub fn socket_addr(&self) -> SunspecResult<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                SunspecError::configuration(format!("invalid listen address {}: {}", self.host, e))
            })?
            .next()
            .ok_or_else(|| {
                SunspecError::configuration(format!("listen address {} did not resolve", self.host))
            })
    }

    /// Check everything that can be checked before binding sockets.
    pub fn validate(&self) -> SunspecResult<()> {
        if self.frame_timeout.is_zero() {
            return Err(SunspecError::configuration("frame timeout must be positive"));
        }
        if self.ingest_capacity == 0 {
            return Err(SunspecError::configuration("ingest capacity must be positive"));
        }
        self.identity.validate()?;
        self.mqtt.validate()
    }
}
