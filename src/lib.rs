//! # Voltage SunSpec - Ferroamp to SunSpec Modbus TCP Bridge
//!
//! Serves live Ferroamp EnergyHub telemetry as a read-only SunSpec device
//! over Modbus TCP, so that SunSpec-aware consumers (energy managers,
//! EV chargers, monitoring loggers) can read a Ferroamp system as if it were
//! a standard inverter with a grid meter.
//!
//! ## Architecture
//!
//! ```text
//! MQTT ehub ──► ferroamp::decode_ehub ──► mpsc<Sample> ──► FieldBinder ──► RegisterMap
//!                                                                              │
//!                          Modbus TCP clients ◄── SunspecServer (FC 0x03) ◄────┘
//! ```
//!
//! ## Register Layout
//!
//! | Address | Content | Registers |
//! |---------|---------|-----------|
//! | 40000 | `"SunS"` marker | 2 |
//! | 40002 | Common (model 1) | 2 + 66 |
//! | 40070 | Inverter, three phase float (model 113) | 2 + 60 |
//! | 40132 | Meter, three phase wye float (model 213) | 2 + 124 |
//! | 40258 | End marker `0xFFFF, 0` | 2 |
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Server | Client |
//! |------|----------|--------|--------|
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//!
//! Every other function code is answered with exception 0x01.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_sunspec::{Bridge, BridgeConfig, SunspecResult};
//! use voltage_sunspec::tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> SunspecResult<()> {
//!     let bridge = Bridge::new(BridgeConfig::new().with_listen("127.0.0.1", 1502))?;
//!     let listener = bridge.listen().await?;
//!     let (samples, queue) = bridge.channel();
//!
//!     // Feed `samples` from MQTT (see `mqtt::EhubListener`) or any other source.
//!     drop(samples);
//!
//!     bridge.run(listener, queue, CancellationToken::new()).await
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error types and result handling
pub mod error;

/// Modbus and SunSpec protocol constants
pub mod constants;

/// SunSpec model and field definitions
pub mod model;

/// Telemetry and register value types
pub mod value;

/// Field encoding to SunSpec register bytes
pub mod codec;

/// Built-in SunSpec models 1, 113 and 213
pub mod catalog;

/// Shared register store
pub mod register_map;

// ============================================================================
// Telemetry side
// ============================================================================

/// Telemetry keys and timestamped samples
pub mod telemetry;

/// Mapping from telemetry keys to register fields
pub mod binder;

/// Ferroamp ExtAPI payloads and field profile
pub mod ferroamp;

/// MQTT ingest adapter
#[cfg(feature = "mqtt")]
pub mod mqtt;

// ============================================================================
// Modbus side
// ============================================================================

/// Stack-allocated PDU
pub mod pdu;

/// MBAP framing and request dispatch
pub mod protocol;

/// Modbus TCP server
pub mod server;

/// Modbus TCP read client
pub mod client;

// ============================================================================
// Assembly
// ============================================================================

/// Bridge configuration
pub mod config;

/// Bridge assembly and lifecycle
pub mod bridge;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;
pub use tokio_util;

// === Error handling ===
pub use error::{SunspecError, SunspecResult};

// === Core types ===
pub use model::{Field, FieldType, Model, ModelId, ModelRegistry};
pub use register_map::{FieldSlot, RegisterMap};
pub use telemetry::{Sample, TelemetryKey};
pub use value::{FieldValue, SampleValue};

// === Telemetry side ===
pub use binder::{FieldBinder, FieldBinderBuilder, IngestOutcome};
#[cfg(feature = "mqtt")]
pub use mqtt::EhubListener;

// === Modbus side ===
pub use client::ModbusTcpClient;
pub use pdu::{ModbusPdu, PduBuilder};
pub use server::{ServerStatsSnapshot, SunspecServer};

// === Assembly ===
pub use bridge::Bridge;
pub use config::{BridgeConfig, DeviceIdentity, MqttConfig};

// === Protocol limits ===
pub use constants::{MAX_PDU_SIZE, MAX_READ_REGISTERS, SUNSPEC_BASE_ADDRESS};
