//! # Field Binder
//!
//! Applies telemetry samples to the register map through a static binding
//! table.
//!
//! ## Binding States
//!
//! Every [`TelemetryKey`] is in exactly one state once the binder is built:
//!
//! | State | Declared with | Effect of a sample |
//! |-------|---------------|--------------------|
//! | bound | [`FieldBinderBuilder::bind`] | each target is transformed and written |
//! | unbound | [`FieldBinderBuilder::unbound`] or nothing | ignored, counted |
//!
//! Fields may also be declared constant with
//! [`FieldBinderBuilder::constant`]. Constants are written once by
//! [`FieldBinderBuilder::build`] and no sample can target them. Fields that
//! are neither bound nor constant keep their "not implemented" sentinel.
//!
//! ## Failure Handling
//!
//! A target whose value cannot be encoded is skipped: the field keeps its
//! previous bytes, a warning is logged and `updates_discarded` is counted.
//! Other targets of the same sample are still written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::encode_field;
use crate::error::{SunspecError, SunspecResult};
use crate::model::ModelId;
use crate::register_map::{FieldSlot, RegisterMap};
use crate::telemetry::{Sample, TelemetryKey};
use crate::value::SampleValue;

// ============================================================================
// Bindings
// ============================================================================

/// Unit conversion applied before encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    /// Value is written as received
    Identity,
    /// Value is multiplied by the factor
    Scale(f64),
}

impl Transform {
    /// Apply the conversion. Symbols only pass through [`Transform::Identity`].
    pub fn apply(&self, field: &str, value: &SampleValue) -> SunspecResult<SampleValue> {
        match (self, value) {
            (Transform::Identity, v) => Ok(v.clone()),
            (Transform::Scale(factor), SampleValue::Number(n)) => {
                Ok(SampleValue::Number(n * factor))
            }
            (Transform::Scale(_), SampleValue::Symbol(s)) => Err(SunspecError::transform(
                field,
                format!("cannot scale symbol {}", s),
            )),
        }
    }
}

/// Declarative binding target: a field of a model plus a transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BindingTarget {
    pub model_id: ModelId,
    pub field: &'static str,
    pub transform: Transform,
}

impl BindingTarget {
    pub const fn new(model_id: ModelId, field: &'static str) -> Self {
        Self {
            model_id,
            field,
            transform: Transform::Identity,
        }
    }

    pub const fn scaled(model_id: ModelId, field: &'static str, factor: f64) -> Self {
        Self {
            model_id,
            field,
            transform: Transform::Scale(factor),
        }
    }
}

/// A binding target resolved against a register map.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub slot: FieldSlot,
    pub transform: Transform,
}

/// Binding state of one telemetry key.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Samples fan out to these fields
    Targets(Vec<ResolvedTarget>),
    /// Samples are ignored
    Unbound { reason: &'static str },
}

impl Binding {
    /// Whether samples of this key are ignored
    pub fn is_unbound(&self) -> bool {
        matches!(self, Binding::Unbound { .. })
    }
}

const NOT_DECLARED: &str = "no binding declared";

// ============================================================================
// Statistics
// ============================================================================

/// Binder counters
#[derive(Debug, Default)]
pub struct BinderStats {
    /// Samples passed to `ingest`
    pub samples_received: AtomicU64,
    /// Field writes applied
    pub fields_written: AtomicU64,
    /// Field updates dropped because the value could not be encoded
    pub updates_discarded: AtomicU64,
    /// Samples whose key has no binding
    pub unbound_samples: AtomicU64,
}

impl BinderStats {
    /// Get a snapshot of current stats
    pub fn snapshot(&self) -> BinderStatsSnapshot {
        BinderStatsSnapshot {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            fields_written: self.fields_written.load(Ordering::Relaxed),
            updates_discarded: self.updates_discarded.load(Ordering::Relaxed),
            unbound_samples: self.unbound_samples.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of binder statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinderStatsSnapshot {
    pub samples_received: u64,
    pub fields_written: u64,
    pub updates_discarded: u64,
    pub unbound_samples: u64,
}

/// Result of applying one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The key has no binding
    Unbound,
    /// The sample reached its targets
    Applied { written: usize, discarded: usize },
}

// ============================================================================
// Builder
// ============================================================================

/// Startup-time builder for a [`FieldBinder`].
///
/// Every method resolves its fields immediately, so a misspelled model or
/// field fails at startup rather than on the first sample.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use voltage_sunspec::binder::{BindingTarget, FieldBinder};
/// use voltage_sunspec::catalog::{sunspec_registry, INVERTER_MODEL_ID};
/// use voltage_sunspec::{RegisterMap, Sample, TelemetryKey};
///
/// let map = Arc::new(RegisterMap::new(&sunspec_registry().unwrap(), 40000).unwrap());
/// let binder = FieldBinder::builder(Arc::clone(&map))
///     .bind(TelemetryKey::W, &[BindingTarget::new(INVERTER_MODEL_ID, "W")])
///     .unwrap()
///     .constant(INVERTER_MODEL_ID, "St", 4u16)
///     .unwrap()
///     .build()
///     .unwrap();
///
/// binder.ingest(&Sample::now(TelemetryKey::W, 1500.5));
/// ```
#[derive(Debug)]
pub struct FieldBinderBuilder {
    map: Arc<RegisterMap>,
    table: Vec<Option<Binding>>,
    constants: Vec<(FieldSlot, Vec<u8>)>,
}

impl FieldBinderBuilder {
    fn new(map: Arc<RegisterMap>) -> Self {
        Self {
            map,
            table: vec![None; TelemetryKey::ALL.len()],
            constants: Vec::new(),
        }
    }

    /// Register the fan-out list of a key.
    pub fn bind(mut self, key: TelemetryKey, targets: &[BindingTarget]) -> SunspecResult<Self> {
        self.ensure_undeclared(key)?;
        if targets.is_empty() {
            return Err(SunspecError::configuration(format!(
                "binding for {} has no targets",
                key
            )));
        }

        let mut resolved: Vec<ResolvedTarget> = Vec::with_capacity(targets.len());
        for target in targets {
            let slot = self.map.locate(target.model_id, target.field)?;
            if resolved.iter().any(|r| r.slot == slot) {
                return Err(SunspecError::configuration(format!(
                    "binding for {} targets {} twice",
                    key, slot
                )));
            }
            resolved.push(ResolvedTarget {
                slot,
                transform: target.transform,
            });
        }

        self.table[key.index()] = Some(Binding::Targets(resolved));
        Ok(self)
    }

    /// Declare that a key has no confirmed target.
    pub fn unbound(mut self, key: TelemetryKey, reason: &'static str) -> SunspecResult<Self> {
        self.ensure_undeclared(key)?;
        self.table[key.index()] = Some(Binding::Unbound { reason });
        Ok(self)
    }

    /// Declare a field with a fixed value.
    pub fn constant(
        mut self,
        model_id: ModelId,
        field: &str,
        value: impl Into<SampleValue>,
    ) -> SunspecResult<Self> {
        let slot = self.map.locate(model_id, field)?;
        if self.constants.iter().any(|(s, _)| *s == slot) {
            return Err(SunspecError::configuration(format!(
                "constant {} declared twice",
                slot
            )));
        }
        let bytes = encode_field(slot.field(), &value.into()).map_err(|e| {
            SunspecError::configuration(format!("constant {} is not encodable: {}", slot, e))
        })?;
        self.constants.push((slot, bytes));
        Ok(self)
    }

    /// Freeze the table and write every constant.
    pub fn build(self) -> SunspecResult<FieldBinder> {
        for (slot, _) in &self.constants {
            let bound_by = TelemetryKey::ALL.iter().find(|key| {
                matches!(
                    &self.table[key.index()],
                    Some(Binding::Targets(targets)) if targets.iter().any(|t| t.slot == *slot)
                )
            });
            if let Some(key) = bound_by {
                return Err(SunspecError::configuration(format!(
                    "field {} is constant but also bound to {}",
                    slot, key
                )));
            }
        }

        for (slot, bytes) in &self.constants {
            self.map.set_field(slot, bytes)?;
        }

        let table: Vec<Binding> = self
            .table
            .into_iter()
            .map(|b| b.unwrap_or(Binding::Unbound { reason: NOT_DECLARED }))
            .collect();

        let bound = table.iter().filter(|b| !b.is_unbound()).count();
        info!(
            "Field binder ready: {} keys bound, {} unbound, {} constants",
            bound,
            table.len() - bound,
            self.constants.len()
        );

        Ok(FieldBinder {
            map: self.map,
            table,
            stats: BinderStats::default(),
        })
    }

    fn ensure_undeclared(&self, key: TelemetryKey) -> SunspecResult<()> {
        if self.table[key.index()].is_some() {
            return Err(SunspecError::configuration(format!(
                "telemetry key {} declared twice",
                key
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Binder
// ============================================================================

/// Immutable binding table plus the map it writes to.
#[derive(Debug)]
pub struct FieldBinder {
    map: Arc<RegisterMap>,
    table: Vec<Binding>,
    stats: BinderStats,
}

impl FieldBinder {
    pub fn builder(map: Arc<RegisterMap>) -> FieldBinderBuilder {
        FieldBinderBuilder::new(map)
    }

    /// Apply one sample to every bound field.
    pub fn ingest(&self, sample: &Sample) -> IngestOutcome {
        self.stats.samples_received.fetch_add(1, Ordering::Relaxed);

        let targets = match &self.table[sample.key.index()] {
            Binding::Targets(targets) => targets,
            Binding::Unbound { reason } => {
                self.stats.unbound_samples.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring {} ({})", sample.key, reason);
                return IngestOutcome::Unbound;
            }
        };

        let mut written = 0;
        let mut discarded = 0;
        for target in targets {
            match self.apply(target, &sample.value) {
                Ok(()) => written += 1,
                Err(e) => {
                    discarded += 1;
                    warn!("Discarding {} update from {}: {}", target.slot, sample.key, e);
                }
            }
        }

        self.stats
            .fields_written
            .fetch_add(written as u64, Ordering::Relaxed);
        self.stats
            .updates_discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        IngestOutcome::Applied { written, discarded }
    }

    fn apply(&self, target: &ResolvedTarget, value: &SampleValue) -> SunspecResult<()> {
        let field = target.slot.field();
        let value = target.transform.apply(field.name, value)?;
        let bytes = encode_field(field, &value)?;
        self.map.set_field(&target.slot, &bytes)
    }

    /// Binding state of a key
    pub fn binding(&self, key: TelemetryKey) -> &Binding {
        &self.table[key.index()]
    }

    pub fn stats(&self) -> BinderStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn register_map(&self) -> &Arc<RegisterMap> {
        &self.map
    }
}

// ============================================================================
// Ingest Loop
// ============================================================================

/// Feed samples from `receiver` into `binder` until shutdown.
///
/// On cancellation the receiver is closed and every sample already queued
/// is still applied. Returns when drained or when all senders are gone.
pub async fn run_ingest(
    binder: Arc<FieldBinder>,
    mut receiver: mpsc::Receiver<Sample>,
    shutdown: CancellationToken,
) {
    info!("Ingest loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(sample) => {
                    binder.ingest(&sample);
                }
                None => {
                    info!("Telemetry channel closed, ingest loop stopping");
                    return;
                }
            },
        }
    }

    receiver.close();
    let mut drained = 0usize;
    while let Some(sample) = receiver.recv().await {
        binder.ingest(&sample);
        drained += 1;
    }
    info!("Ingest loop stopped after draining {} queued samples", drained);
}
