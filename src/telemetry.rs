//! Telemetry samples
//!
//! A [`Sample`] is one timestamped reading of a [`TelemetryKey`]. Keys form a
//! closed set; text names only appear at the transport boundary, through
//! [`FromStr`] and [`Display`](fmt::Display).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::SunspecError;
use crate::value::SampleValue;

macro_rules! telemetry_keys {
    ($($variant:ident => $name:literal, $doc:literal;)+) => {
        /// Quantity reported by the energy hub.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum TelemetryKey {
            $(
                #[doc = $doc]
                $variant,
            )+
        }

        impl TelemetryKey {
            /// Every key, in declaration order.
            pub const ALL: &'static [TelemetryKey] = &[$(TelemetryKey::$variant),+];

            /// Stable name used on the wire and in logs.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(TelemetryKey::$variant => $name,)+
                }
            }
        }

        impl FromStr for TelemetryKey {
            type Err = SunspecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(TelemetryKey::$variant),)+
                    other => Err(SunspecError::telemetry(format!("unknown telemetry key {}", other))),
                }
            }
        }
    };
}

telemetry_keys! {
    Hz => "Hz", "Grid frequency (Hz)";
    PhV => "PhV", "Average line-to-neutral voltage (V)";
    PhVphA => "PhVphA", "Line-to-neutral voltage, phase A (V)";
    PhVphB => "PhVphB", "Line-to-neutral voltage, phase B (V)";
    PhVphC => "PhVphC", "Line-to-neutral voltage, phase C (V)";
    A => "A", "Inverter AC current, all phases (A)";
    AphA => "AphA", "Inverter AC current, phase A (A)";
    AphB => "AphB", "Inverter AC current, phase B (A)";
    AphC => "AphC", "Inverter AC current, phase C (A)";
    W => "W", "Inverter AC active power (W)";
    VAr => "VAr", "Inverter AC reactive power (var)";
    WH => "WH", "Inverter AC energy produced (mJ)";
    DCV => "DCV", "DC link voltage (V)";
    DCW => "DCW", "Solar DC power (W)";
    GridA => "GridA", "Grid current, all phases (A)";
    GridAphA => "GridAphA", "Grid current, phase A (A)";
    GridAphB => "GridAphB", "Grid current, phase B (A)";
    GridAphC => "GridAphC", "Grid current, phase C (A)";
    GridW => "GridW", "Grid active power, positive when importing (W)";
    GridWphA => "GridWphA", "Grid active power, phase A (W)";
    GridWphB => "GridWphB", "Grid active power, phase B (W)";
    GridWphC => "GridWphC", "Grid active power, phase C (W)";
    GridVAr => "GridVAr", "Grid reactive power (var)";
    GridWhImp => "GridWhImp", "Energy imported from the grid (mJ)";
    GridWhExp => "GridWhExp", "Energy exported to the grid (mJ)";
    State => "State", "Vendor system state";
    Soc => "Soc", "Battery state of charge (%)";
    BatW => "BatW", "Battery power (W)";
}

impl TelemetryKey {
    /// Dense index for table lookups.
    #[inline]
    pub const fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for TelemetryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One telemetry reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub key: TelemetryKey,
    pub value: SampleValue,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(key: TelemetryKey, value: impl Into<SampleValue>, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            value: value.into(),
            timestamp,
        }
    }

    /// Sample stamped with the current time
    pub fn now(key: TelemetryKey, value: impl Into<SampleValue>) -> Self {
        Self::new(key, value, Utc::now())
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} @ {}", self.key, self.value, self.timestamp.to_rfc3339())
    }
}
