//! Error types for the SunSpec bridge
//!
//! A single error enum covers the whole crate. Variants are grouped by where
//! they can occur:
//!
//! | Variant | Raised by | Severity |
//! |---------|-----------|----------|
//! | `Configuration` | model registry, binder builder, config | fatal at startup |
//! | `SizeMismatch`, `OutOfRange` | register map | rejected call, map untouched |
//! | `Transform` | field binder | one update discarded |
//! | `Protocol`, `Framing`, `Exception`, `Timeout` | server / client | connection-local |
//! | `Telemetry` | ehub decoder, MQTT adapter | sample(s) skipped |

use std::io;

use thiserror::Error;

/// Result alias used across the crate.
pub type SunspecResult<T> = Result<T, SunspecError>;

/// Errors produced by the bridge.
#[derive(Debug, Error)]
pub enum SunspecError {
    /// Invalid static definition or startup configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// `set_field` called with the wrong number of bytes
    #[error("Size mismatch for field {field}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// Register span outside the configured model blocks
    #[error("Register range out of bounds: start={start}, count={count}")]
    OutOfRange { start: u16, count: u16 },

    /// Value not representable in the target field encoding
    #[error("Cannot encode value for field {field}: {message}")]
    Transform { field: String, message: String },

    /// Malformed or unsupported protocol data
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// MBAP framing violation; the connection must be closed
    #[error("Framing error: {message}")]
    Framing { message: String },

    /// Exception response received from a server
    #[error("Modbus exception: function={function:02X}, code={code:02X}")]
    Exception { function: u8, code: u8 },

    /// Operation did not complete in time
    #[error("Timeout: {message} ({timeout_ms} ms)")]
    Timeout { message: String, timeout_ms: u64 },

    /// Telemetry payload could not be decoded or delivered
    #[error("Telemetry error: {message}")]
    Telemetry { message: String },

    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SunspecError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transform error for a named field
    pub fn transform(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transform {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a framing error
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            message: message.into(),
            timeout_ms,
        }
    }

    /// Create a telemetry error
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry {
            message: message.into(),
        }
    }

    /// Whether the error only affects a single connection or update.
    ///
    /// Configuration errors are the only ones that should stop the process.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration { .. })
    }
}

impl From<serde_json::Error> for SunspecError {
    fn from(err: serde_json::Error) -> Self {
        Self::telemetry(format!("invalid ehub payload: {}", err))
    }
}
