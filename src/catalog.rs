//! # SunSpec Model Catalog
//!
//! Definitions of the information-model blocks served by the bridge.
//!
//! | Model | Name | Length |
//! |-------|------|--------|
//! | 1 | Common | 66 |
//! | 113 | Three-Phase Inverter (float) | 60 |
//! | 213 | Wye-Connect Three-Phase Meter (float) | 124 |
//!
//! Field offsets are derived from declaration order by [`LayoutBuilder`], so
//! a table here reads like the SunSpec model sheet it is transcribed from.

use crate::error::SunspecResult;
use crate::model::{Field, ModelId, ModelRegistry, Symbol};

/// Common model
pub const COMMON_MODEL_ID: ModelId = 1;
/// Three-phase inverter, float encoding
pub const INVERTER_MODEL_ID: ModelId = 113;
/// Wye-connect three-phase meter, float encoding
pub const METER_MODEL_ID: ModelId = 213;

// ============================================================================
// Symbol Tables
// ============================================================================

/// Inverter operating state (113 `St`)
pub const OPERATING_STATES: &[Symbol] = &[
    Symbol::new("OFF", 1),
    Symbol::new("SLEEPING", 2),
    Symbol::new("STARTING", 3),
    Symbol::new("MPPT", 4),
    Symbol::new("THROTTLED", 5),
    Symbol::new("SHUTTING_DOWN", 6),
    Symbol::new("FAULT", 7),
    Symbol::new("STANDBY", 8),
];

/// Inverter event flags (113 `Evt1`), bit positions
pub const INVERTER_EVENTS: &[Symbol] = &[
    Symbol::new("GROUND_FAULT", 0),
    Symbol::new("DC_OVER_VOLT", 1),
    Symbol::new("AC_DISCONNECT", 2),
    Symbol::new("DC_DISCONNECT", 3),
    Symbol::new("GRID_DISCONNECT", 4),
    Symbol::new("CABINET_OPEN", 5),
    Symbol::new("MANUAL_SHUTDOWN", 6),
    Symbol::new("OVER_TEMP", 7),
    Symbol::new("OVER_FREQUENCY", 8),
    Symbol::new("UNDER_FREQUENCY", 9),
    Symbol::new("AC_OVER_VOLT", 10),
    Symbol::new("AC_UNDER_VOLT", 11),
    Symbol::new("BLOWN_STRING_FUSE", 12),
    Symbol::new("UNDER_TEMP", 13),
    Symbol::new("MEMORY_LOSS", 14),
    Symbol::new("HW_TEST_FAILURE", 15),
];

/// Meter event flags (213 `Evt`), bit positions
pub const METER_EVENTS: &[Symbol] = &[
    Symbol::new("POWER_FAILURE", 2),
    Symbol::new("UNDER_VOLTAGE", 3),
    Symbol::new("LOW_PF", 4),
    Symbol::new("OVER_CURRENT", 5),
    Symbol::new("OVER_VOLTAGE", 6),
    Symbol::new("MISSING_SENSOR", 7),
];

// ============================================================================
// Layout Builder
// ============================================================================

/// Fluent builder assigning contiguous offsets to fields.
///
/// # Example
///
/// ```rust
/// use voltage_sunspec::catalog::LayoutBuilder;
///
/// let fields = LayoutBuilder::new()
///     .float32("W", "W")
///     .uint16("DA", "")
///     .build();
/// assert_eq!(fields[1].offset, 2);
/// ```
#[derive(Debug, Default)]
pub struct LayoutBuilder {
    fields: Vec<Field>,
    next_offset: u16,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: Field) -> Self {
        self.next_offset += field.width;
        self.fields.push(field);
        self
    }

    pub fn uint16(self, name: &'static str, unit: &'static str) -> Self {
        let offset = self.next_offset;
        self.push(Field::uint16(name, offset, unit))
    }

    pub fn float32(self, name: &'static str, unit: &'static str) -> Self {
        let offset = self.next_offset;
        self.push(Field::float32(name, offset, unit))
    }

    /// Add one float32 field per `(name, unit)` pair
    pub fn float32_all(self, points: &[(&'static str, &'static str)]) -> Self {
        points
            .iter()
            .fold(self, |layout, &(name, unit)| layout.float32(name, unit))
    }

    pub fn enum16(self, name: &'static str, symbols: &'static [Symbol]) -> Self {
        let offset = self.next_offset;
        self.push(Field::enum16(name, offset, symbols))
    }

    pub fn bitfield32(self, name: &'static str, symbols: &'static [Symbol]) -> Self {
        let offset = self.next_offset;
        self.push(Field::bitfield32(name, offset, symbols))
    }

    pub fn string(self, name: &'static str, registers: u16) -> Self {
        let offset = self.next_offset;
        self.push(Field::string(name, offset, registers))
    }

    pub fn build(self) -> Vec<Field> {
        self.fields
    }
}

// ============================================================================
// Model Definitions
// ============================================================================

/// Common model (1) fields
pub fn common_fields() -> Vec<Field> {
    LayoutBuilder::new()
        .string("Mn", 16)
        .string("Md", 16)
        .string("Opt", 8)
        .string("Vr", 8)
        .string("SN", 16)
        .uint16("DA", "")
        .uint16("Pad", "")
        .build()
}

const INVERTER_MEASUREMENTS: &[(&str, &str)] = &[
    ("A", "A"),
    ("AphA", "A"),
    ("AphB", "A"),
    ("AphC", "A"),
    ("PPVphAB", "V"),
    ("PPVphBC", "V"),
    ("PPVphCA", "V"),
    ("PhVphA", "V"),
    ("PhVphB", "V"),
    ("PhVphC", "V"),
    ("W", "W"),
    ("Hz", "Hz"),
    ("VA", "VA"),
    ("VAr", "var"),
    ("PF", "Pct"),
    ("WH", "Wh"),
    ("DCA", "A"),
    ("DCV", "V"),
    ("DCW", "W"),
    ("TmpCab", "C"),
    ("TmpSnk", "C"),
    ("TmpTrns", "C"),
    ("TmpOt", "C"),
];

/// Three-phase inverter model (113) fields
pub fn inverter_fields() -> Vec<Field> {
    LayoutBuilder::new()
        .float32_all(INVERTER_MEASUREMENTS)
        .enum16("St", OPERATING_STATES)
        .enum16("StVnd", &[])
        .bitfield32("Evt1", INVERTER_EVENTS)
        .bitfield32("Evt2", &[])
        .bitfield32("EvtVnd1", &[])
        .bitfield32("EvtVnd2", &[])
        .bitfield32("EvtVnd3", &[])
        .bitfield32("EvtVnd4", &[])
        .build()
}

const METER_MEASUREMENTS: &[(&str, &str)] = &[
    ("A", "A"),
    ("AphA", "A"),
    ("AphB", "A"),
    ("AphC", "A"),
    ("PhV", "V"),
    ("PhVphA", "V"),
    ("PhVphB", "V"),
    ("PhVphC", "V"),
    ("PPV", "V"),
    ("PPVphAB", "V"),
    ("PPVphBC", "V"),
    ("PPVphCA", "V"),
    ("Hz", "Hz"),
    ("W", "W"),
    ("WphA", "W"),
    ("WphB", "W"),
    ("WphC", "W"),
    ("VA", "VA"),
    ("VAphA", "VA"),
    ("VAphB", "VA"),
    ("VAphC", "VA"),
    ("VAR", "var"),
    ("VARphA", "var"),
    ("VARphB", "var"),
    ("VARphC", "var"),
    ("PF", "PF"),
    ("PFphA", "PF"),
    ("PFphB", "PF"),
    ("PFphC", "PF"),
    ("TotWhExp", "Wh"),
    ("TotWhExpPhA", "Wh"),
    ("TotWhExpPhB", "Wh"),
    ("TotWhExpPhC", "Wh"),
    ("TotWhImp", "Wh"),
    ("TotWhImpPhA", "Wh"),
    ("TotWhImpPhB", "Wh"),
    ("TotWhImpPhC", "Wh"),
    ("TotVAhExp", "VAh"),
    ("TotVAhExpPhA", "VAh"),
    ("TotVAhExpPhB", "VAh"),
    ("TotVAhExpPhC", "VAh"),
    ("TotVAhImp", "VAh"),
    ("TotVAhImpPhA", "VAh"),
    ("TotVAhImpPhB", "VAh"),
    ("TotVAhImpPhC", "VAh"),
    ("TotVArhImpQ1", "varh"),
    ("TotVArhImpQ1PhA", "varh"),
    ("TotVArhImpQ1PhB", "varh"),
    ("TotVArhImpQ1PhC", "varh"),
    ("TotVArhImpQ2", "varh"),
    ("TotVArhImpQ2PhA", "varh"),
    ("TotVArhImpQ2PhB", "varh"),
    ("TotVArhImpQ2PhC", "varh"),
    ("TotVArhExpQ3", "varh"),
    ("TotVArhExpQ3PhA", "varh"),
    ("TotVArhExpQ3PhB", "varh"),
    ("TotVArhExpQ3PhC", "varh"),
    ("TotVArhExpQ4", "varh"),
    ("TotVArhExpQ4PhA", "varh"),
    ("TotVArhExpQ4PhB", "varh"),
    ("TotVArhExpQ4PhC", "varh"),
];

/// Wye-connect meter model (213) fields
pub fn meter_fields() -> Vec<Field> {
    LayoutBuilder::new()
        .float32_all(METER_MEASUREMENTS)
        .bitfield32("Evt", METER_EVENTS)
        .build()
}

/// Registry holding the Common, inverter and meter models, in map order.
pub fn sunspec_registry() -> SunspecResult<ModelRegistry> {
    let mut registry = ModelRegistry::new();
    registry.define_model(COMMON_MODEL_ID, 66, common_fields())?;
    registry.define_model(INVERTER_MODEL_ID, 60, inverter_fields())?;
    registry.define_model(METER_MODEL_ID, 124, meter_fields())?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_lengths() {
        let registry = sunspec_registry().unwrap();
        let lengths: Vec<(ModelId, u16)> = registry
            .models()
            .map(|m| (m.id(), m.length()))
            .collect();
        assert_eq!(lengths, vec![(1, 66), (113, 60), (213, 124)]);

        for model in registry.models() {
            let sum: u16 = model.fields().iter().map(|f| f.width).sum();
            assert_eq!(sum, model.length(), "model {}", model.id());
        }
    }

    #[test]
    fn test_layout_builder_packs_fields() {
        let fields = LayoutBuilder::new()
            .string("Mn", 16)
            .uint16("DA", "")
            .float32_all(&[("A", "A"), ("W", "W")])
            .build();
        let offsets: Vec<(u16, u16)> = fields.iter().map(|f| (f.offset, f.width)).collect();
        assert_eq!(offsets, vec![(0, 16), (16, 1), (17, 2), (19, 2)]);
    }

    #[test]
    fn test_inverter_offsets() {
        let registry = sunspec_registry().unwrap();
        let inverter = registry.resolve(INVERTER_MODEL_ID).unwrap();
        assert_eq!(inverter.field("W").unwrap().offset, 20);
        assert_eq!(inverter.field("Hz").unwrap().offset, 22);
        assert_eq!(inverter.field("St").unwrap().offset, 46);
        assert_eq!(inverter.field("Evt1").unwrap().offset, 48);
        assert_eq!(inverter.field("EvtVnd4").unwrap().offset, 58);
    }

    #[test]
    fn test_meter_offsets() {
        let registry = sunspec_registry().unwrap();
        let meter = registry.resolve(METER_MODEL_ID).unwrap();
        assert_eq!(meter.fields().len(), 62);
        assert_eq!(meter.field("Hz").unwrap().offset, 24);
        assert_eq!(meter.field("W").unwrap().offset, 26);
        assert_eq!(meter.field("TotWhImp").unwrap().offset, 66);
        assert_eq!(meter.field("Evt").unwrap().offset, 122);
    }

    #[test]
    fn test_common_offsets() {
        let fields = common_fields();
        let sn = fields.iter().find(|f| f.name == "SN").unwrap();
        assert_eq!(sn.offset, 48);
        assert_eq!(sn.ty, crate::model::FieldType::String(16));
        assert_eq!(fields.last().unwrap().offset, 65);
    }

    #[test]
    fn test_operating_state_symbols() {
        let inverter = sunspec_registry().unwrap().resolve(INVERTER_MODEL_ID).unwrap();
        let st = inverter.field("St").unwrap();
        assert_eq!(st.symbol("MPPT").unwrap().value, 4);
        assert_eq!(st.symbol("STANDBY").unwrap().value, 8);
    }
}
