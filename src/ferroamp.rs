//! # Ferroamp EnergyHub Profile
//!
//! Everything specific to the Ferroamp ExtAPI lives here: the decoder for
//! `extapi/data/ehub` messages and the binding table from the decoded
//! telemetry keys to SunSpec fields.
//!
//! ## Payload Shape
//!
//! Every reading is an object of string-encoded numbers:
//!
//! ```json
//! {
//!   "gridfreq": {"val": "50.02"},
//!   "ul":       {"L1": "230.1", "L2": "229.8", "L3": "231.0"},
//!   "udc":      {"pos": "386.5", "neg": "-386.3"},
//!   "wextconsq": {"L1": "1.2e10", "L2": "1.1e10", "L3": "1.3e10"}
//! }
//! ```
//!
//! Energies are reported in millijoules and converted to Wh by the binding.
//!
//! ## Binding Table
//!
//! | Key | Source | Targets |
//! |-----|--------|---------|
//! | `Hz` | `gridfreq` | 113 `Hz`, 213 `Hz` |
//! | `PhVphA..C` | `ul` | 113 and 213 `PhVphA..C` |
//! | `PhV` | mean of `ul` | 213 `PhV` |
//! | `A`, `AphA..C` | `il` | 113 |
//! | `W`, `VAr` | sum of `pinv`, `pinvreactive` | 113 |
//! | `WH` | sum of `winvprodq` | 113 `WH` (mJ to Wh) |
//! | `DCV` | `udc.pos - udc.neg` | 113 `DCV` |
//! | `DCW` | `ppv` | 113 `DCW` |
//! | `GridA*`, `GridW*`, `GridVAr` | `iext`, `pext`, `pextreactive` | 213 |
//! | `GridWhImp`, `GridWhExp` | sum of `wextconsq`, `wextprodq` | 213 (mJ to Wh) |
//! | `State`, `Soc`, `BatW` | `state`, `soc`, `pbat` | unbound |

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::binder::{BindingTarget, FieldBinderBuilder};
use crate::catalog::{COMMON_MODEL_ID, INVERTER_MODEL_ID, METER_MODEL_ID};
use crate::config::DeviceIdentity;
use crate::error::{SunspecError, SunspecResult};
use crate::telemetry::{Sample, TelemetryKey};

/// Default ExtAPI topic carrying `ehub` messages
pub const EHUB_TOPIC: &str = "extapi/data/ehub";

/// Millijoules to watt-hours
pub const MJ_TO_WH: f64 = 1.0 / 3_600_000.0;

// ============================================================================
// Binding Table
// ============================================================================

const INV: u16 = INVERTER_MODEL_ID;
const MTR: u16 = METER_MODEL_ID;

/// Fan-out of every bound Ferroamp key.
pub const BINDINGS: &[(TelemetryKey, &[BindingTarget])] = &[
    (
        TelemetryKey::Hz,
        &[BindingTarget::new(INV, "Hz"), BindingTarget::new(MTR, "Hz")],
    ),
    (TelemetryKey::PhV, &[BindingTarget::new(MTR, "PhV")]),
    (
        TelemetryKey::PhVphA,
        &[BindingTarget::new(INV, "PhVphA"), BindingTarget::new(MTR, "PhVphA")],
    ),
    (
        TelemetryKey::PhVphB,
        &[BindingTarget::new(INV, "PhVphB"), BindingTarget::new(MTR, "PhVphB")],
    ),
    (
        TelemetryKey::PhVphC,
        &[BindingTarget::new(INV, "PhVphC"), BindingTarget::new(MTR, "PhVphC")],
    ),
    (TelemetryKey::A, &[BindingTarget::new(INV, "A")]),
    (TelemetryKey::AphA, &[BindingTarget::new(INV, "AphA")]),
    (TelemetryKey::AphB, &[BindingTarget::new(INV, "AphB")]),
    (TelemetryKey::AphC, &[BindingTarget::new(INV, "AphC")]),
    (TelemetryKey::W, &[BindingTarget::new(INV, "W")]),
    (TelemetryKey::VAr, &[BindingTarget::new(INV, "VAr")]),
    (TelemetryKey::WH, &[BindingTarget::scaled(INV, "WH", MJ_TO_WH)]),
    (TelemetryKey::DCV, &[BindingTarget::new(INV, "DCV")]),
    (TelemetryKey::DCW, &[BindingTarget::new(INV, "DCW")]),
    (TelemetryKey::GridA, &[BindingTarget::new(MTR, "A")]),
    (TelemetryKey::GridAphA, &[BindingTarget::new(MTR, "AphA")]),
    (TelemetryKey::GridAphB, &[BindingTarget::new(MTR, "AphB")]),
    (TelemetryKey::GridAphC, &[BindingTarget::new(MTR, "AphC")]),
    (TelemetryKey::GridW, &[BindingTarget::new(MTR, "W")]),
    (TelemetryKey::GridWphA, &[BindingTarget::new(MTR, "WphA")]),
    (TelemetryKey::GridWphB, &[BindingTarget::new(MTR, "WphB")]),
    (TelemetryKey::GridWphC, &[BindingTarget::new(MTR, "WphC")]),
    (TelemetryKey::GridVAr, &[BindingTarget::new(MTR, "VAR")]),
    (
        TelemetryKey::GridWhImp,
        &[BindingTarget::scaled(MTR, "TotWhImp", MJ_TO_WH)],
    ),
    (
        TelemetryKey::GridWhExp,
        &[BindingTarget::scaled(MTR, "TotWhExp", MJ_TO_WH)],
    ),
];

/// Keys reported by the hub with no confirmed SunSpec target.
pub const UNBOUND: &[(TelemetryKey, &str)] = &[
    (
        TelemetryKey::State,
        "mapping of the ehub system state to the SunSpec operating state is unconfirmed",
    ),
    (TelemetryKey::Soc, "no battery model is served"),
    (TelemetryKey::BatW, "no battery model is served"),
];

/// Operating state reported regardless of telemetry (MPPT)
pub const OPERATING_STATE: u16 = 4;

/// Declare the Ferroamp bindings, unbound keys and constant fields.
pub fn apply_profile(
    mut builder: FieldBinderBuilder,
    identity: &DeviceIdentity,
) -> SunspecResult<FieldBinderBuilder> {
    for (key, targets) in BINDINGS {
        builder = builder.bind(*key, targets)?;
    }
    for (key, reason) in UNBOUND {
        builder = builder.unbound(*key, reason)?;
    }

    builder
        .constant(COMMON_MODEL_ID, "Mn", identity.manufacturer.as_str())?
        .constant(COMMON_MODEL_ID, "Md", identity.model.as_str())?
        .constant(COMMON_MODEL_ID, "Opt", identity.options.as_str())?
        .constant(COMMON_MODEL_ID, "Vr", identity.version.as_str())?
        .constant(COMMON_MODEL_ID, "SN", identity.serial_number.as_str())?
        .constant(COMMON_MODEL_ID, "DA", identity.device_address)?
        .constant(COMMON_MODEL_ID, "Pad", 0u16)?
        .constant(INVERTER_MODEL_ID, "St", OPERATING_STATE)?
        .constant(INVERTER_MODEL_ID, "Evt1", 0u32)?
        .constant(METER_MODEL_ID, "Evt", 0u32)
}

// ============================================================================
// Payload Decoding
// ============================================================================

/// ExtAPI reading: a number, usually sent as a string.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawReading")]
struct Reading(f64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawReading {
    Number(f64),
    Text(String),
}

impl TryFrom<RawReading> for Reading {
    type Error = String;

    fn try_from(raw: RawReading) -> Result<Self, Self::Error> {
        match raw {
            RawReading::Number(n) => Ok(Reading(n)),
            RawReading::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Reading)
                .map_err(|e| format!("invalid reading {:?}: {}", s, e)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Scalar {
    val: Reading,
}

#[derive(Debug, Deserialize)]
struct Phases {
    #[serde(rename = "L1")]
    l1: Reading,
    #[serde(rename = "L2")]
    l2: Reading,
    #[serde(rename = "L3")]
    l3: Reading,
}

impl Phases {
    fn values(&self) -> [f64; 3] {
        [self.l1.0, self.l2.0, self.l3.0]
    }

    fn sum(&self) -> f64 {
        self.values().iter().sum()
    }

    fn mean(&self) -> f64 {
        self.sum() / 3.0
    }
}

#[derive(Debug, Deserialize)]
struct DcLink {
    pos: Reading,
    neg: Reading,
}

/// The `ehub` readings used by the bridge; other entries are ignored.
#[derive(Debug)]
struct EhubMessage {
    gridfreq: Option<Scalar>,
    ul: Option<Phases>,
    il: Option<Phases>,
    pinv: Option<Phases>,
    pinvreactive: Option<Phases>,
    winvprodq: Option<Phases>,
    udc: Option<DcLink>,
    ppv: Option<Scalar>,
    iext: Option<Phases>,
    pext: Option<Phases>,
    pextreactive: Option<Phases>,
    wextconsq: Option<Phases>,
    wextprodq: Option<Phases>,
    state: Option<Scalar>,
    soc: Option<Scalar>,
    pbat: Option<Scalar>,
}

/// Top-level entries of one message, parsed one at a time so that a bad
/// reading only costs its own entry.
struct Entries {
    raw: serde_json::Map<String, Value>,
    rejected: Vec<&'static str>,
}

impl Entries {
    fn take<T: DeserializeOwned>(&mut self, name: &'static str) -> Option<T> {
        let value = self.raw.remove(name)?;
        match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping ehub entry {}: {}", name, e);
                self.rejected.push(name);
                None
            }
        }
    }

    fn into_message(mut self) -> (EhubMessage, Vec<&'static str>) {
        let message = EhubMessage {
            gridfreq: self.take("gridfreq"),
            ul: self.take("ul"),
            il: self.take("il"),
            pinv: self.take("pinv"),
            pinvreactive: self.take("pinvreactive"),
            winvprodq: self.take("winvprodq"),
            udc: self.take("udc"),
            ppv: self.take("ppv"),
            iext: self.take("iext"),
            pext: self.take("pext"),
            pextreactive: self.take("pextreactive"),
            wextconsq: self.take("wextconsq"),
            wextprodq: self.take("wextprodq"),
            state: self.take("state"),
            soc: self.take("soc"),
            pbat: self.take("pbat"),
        };
        (message, self.rejected)
    }
}

/// Samples decoded from one `ehub` message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EhubDecode {
    pub samples: Vec<Sample>,
    /// Entries present in the message whose readings could not be parsed
    pub rejected: Vec<&'static str>,
}

struct SampleSink {
    samples: Vec<Sample>,
    timestamp: DateTime<Utc>,
}

impl SampleSink {
    fn push(&mut self, key: TelemetryKey, value: f64) {
        self.samples.push(Sample::new(key, value, self.timestamp));
    }

    fn scalar(&mut self, key: TelemetryKey, reading: &Option<Scalar>) {
        if let Some(s) = reading {
            self.push(key, s.val.0);
        }
    }

    fn phases(&mut self, total: Option<TelemetryKey>, per_phase: [TelemetryKey; 3], reading: &Option<Phases>) {
        if let Some(p) = reading {
            if let Some(key) = total {
                self.push(key, p.sum());
            }
            for (key, value) in per_phase.into_iter().zip(p.values()) {
                self.push(key, value);
            }
        }
    }

    fn total(&mut self, key: TelemetryKey, reading: &Option<Phases>) {
        if let Some(p) = reading {
            self.push(key, p.sum());
        }
    }
}

/// Decode one `ehub` message into samples stamped with `timestamp`.
///
/// Entries the bridge does not use are ignored; a missing entry simply
/// produces no sample. An entry with an unparseable reading is logged,
/// listed in [`EhubDecode::rejected`] and skipped; the rest of the message
/// is still decoded.
pub fn decode_ehub_entries(payload: &[u8], timestamp: DateTime<Utc>) -> SunspecResult<EhubDecode> {
    use TelemetryKey::*;

    let raw: serde_json::Map<String, Value> = serde_json::from_slice(payload)?;
    let (message, rejected) = Entries {
        raw,
        rejected: Vec::new(),
    }
    .into_message();

    let mut sink = SampleSink {
        samples: Vec::with_capacity(TelemetryKey::ALL.len()),
        timestamp,
    };

    sink.scalar(Hz, &message.gridfreq);
    if let Some(ul) = &message.ul {
        sink.push(PhV, ul.mean());
    }
    sink.phases(None, [PhVphA, PhVphB, PhVphC], &message.ul);
    sink.phases(Some(A), [AphA, AphB, AphC], &message.il);
    sink.total(W, &message.pinv);
    sink.total(VAr, &message.pinvreactive);
    sink.total(WH, &message.winvprodq);
    if let Some(udc) = &message.udc {
        sink.push(DCV, udc.pos.0 - udc.neg.0);
    }
    sink.scalar(DCW, &message.ppv);
    sink.phases(Some(GridA), [GridAphA, GridAphB, GridAphC], &message.iext);
    sink.phases(Some(GridW), [GridWphA, GridWphB, GridWphC], &message.pext);
    sink.total(GridVAr, &message.pextreactive);
    sink.total(GridWhImp, &message.wextconsq);
    sink.total(GridWhExp, &message.wextprodq);
    sink.scalar(State, &message.state);
    sink.scalar(Soc, &message.soc);
    sink.scalar(BatW, &message.pbat);

    if sink.samples.is_empty() {
        return Err(SunspecError::telemetry(if rejected.is_empty() {
            "ehub message carries no usable readings".to_string()
        } else {
            format!("ehub message carries no usable readings (rejected: {})", rejected.join(", "))
        }));
    }
    Ok(EhubDecode {
        samples: sink.samples,
        rejected,
    })
}

/// [`decode_ehub_entries`] without the list of rejected entries.
pub fn decode_ehub(payload: &[u8], timestamp: DateTime<Utc>) -> SunspecResult<Vec<Sample>> {
    decode_ehub_entries(payload, timestamp).map(|decoded| decoded.samples)
}
