//! # Model Registry
//!
//! Static, validated definitions of SunSpec information-model blocks.
//!
//! A model is an identifier, a declared length in registers and an ordered
//! list of fields. Every definition is validated once, at startup, by
//! [`ModelRegistry::define_model`]:
//!
//! - field offsets start at 0 and are contiguous (no gap, no overlap)
//! - each field's width matches its value type
//! - the widths sum to the declared length
//! - field names are unique within the model
//!
//! ## Value Types
//!
//! | Type | Registers | Sentinel |
//! |------|-----------|----------|
//! | uint16 | 1 | `0xFFFF` |
//! | enum16 | 1 | `0xFFFF` |
//! | float32 | 2 | `0x7FC00000` (NaN) |
//! | bitfield32 | 2 | `0xFFFFFFFF` |
//! | string(n) | n | all `0x00` |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::constants::END_MODEL_ID;
use crate::error::{SunspecError, SunspecResult};

/// SunSpec model identifier.
pub type ModelId = u16;

/// Value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Unsigned 16-bit integer
    Uint16,
    /// 16-bit enumeration
    Enum16,
    /// IEEE754 single precision float
    Float32,
    /// 32-bit bitfield
    Bitfield32,
    /// NUL-padded string occupying the given number of registers
    String(u16),
}

impl FieldType {
    /// Number of 16-bit registers a value of this type occupies.
    #[inline]
    pub const fn registers(&self) -> u16 {
        match self {
            FieldType::Uint16 | FieldType::Enum16 => 1,
            FieldType::Float32 | FieldType::Bitfield32 => 2,
            FieldType::String(regs) => *regs,
        }
    }

    /// Number of bytes a value of this type occupies.
    #[inline]
    pub const fn byte_len(&self) -> usize {
        self.registers() as usize * 2
    }

    /// Type name as used in SunSpec model definitions.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Uint16 => "uint16",
            FieldType::Enum16 => "enum16",
            FieldType::Float32 => "float32",
            FieldType::Bitfield32 => "bitfield32",
            FieldType::String(_) => "string",
        }
    }

    /// Whether fields of this type may carry a symbol table.
    #[inline]
    pub fn is_symbolic(&self) -> bool {
        matches!(self, FieldType::Enum16 | FieldType::Bitfield32)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String(regs) => write!(f, "string({})", regs),
            other => f.write_str(other.name()),
        }
    }
}

/// Named value in an enumeration or bitfield symbol table.
///
/// For enum16 fields `value` is the enumeration value, for bitfield32 fields
/// it is the bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub name: &'static str,
    pub value: u32,
}

impl Symbol {
    pub const fn new(name: &'static str, value: u32) -> Self {
        Self { name, value }
    }
}

/// Field descriptor within a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// SunSpec point name (e.g. `"W"`)
    pub name: &'static str,
    /// Offset in registers from the first data register of the model
    pub offset: u16,
    /// Width in registers
    pub width: u16,
    /// Value type
    pub ty: FieldType,
    /// Engineering unit, empty when unitless
    pub unit: &'static str,
    /// Descriptive symbol table for enum/bitfield types
    pub symbols: &'static [Symbol],
}

impl Field {
    /// Field with an explicit width; validation rejects a width that does not
    /// match the type.
    pub const fn new(
        name: &'static str,
        offset: u16,
        width: u16,
        ty: FieldType,
        unit: &'static str,
    ) -> Self {
        Self {
            name,
            offset,
            width,
            ty,
            unit,
            symbols: &[],
        }
    }

    pub const fn uint16(name: &'static str, offset: u16, unit: &'static str) -> Self {
        Self::new(name, offset, 1, FieldType::Uint16, unit)
    }

    pub const fn float32(name: &'static str, offset: u16, unit: &'static str) -> Self {
        Self::new(name, offset, 2, FieldType::Float32, unit)
    }

    pub const fn string(name: &'static str, offset: u16, registers: u16) -> Self {
        Self::new(name, offset, registers, FieldType::String(registers), "")
    }

    pub const fn enum16(name: &'static str, offset: u16, symbols: &'static [Symbol]) -> Self {
        Self {
            name,
            offset,
            width: 1,
            ty: FieldType::Enum16,
            unit: "",
            symbols,
        }
    }

    pub const fn bitfield32(name: &'static str, offset: u16, symbols: &'static [Symbol]) -> Self {
        Self {
            name,
            offset,
            width: 2,
            ty: FieldType::Bitfield32,
            unit: "",
            symbols,
        }
    }

    /// Look up a symbol by name (ASCII case-insensitive).
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// A validated information-model block.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    id: ModelId,
    length: u16,
    fields: Vec<Field>,
}

impl Model {
    /// Model identifier
    #[inline]
    pub fn id(&self) -> ModelId {
        self.id
    }

    /// Declared length in registers, excluding the 2-register header
    #[inline]
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Registers occupied in the map, including the header
    #[inline]
    pub fn span(&self) -> u16 {
        self.length + crate::constants::MODEL_HEADER_REGISTERS
    }

    /// Fields in declaration (and register) order
    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Registry of validated models, kept in declaration order.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: Vec<Arc<Model>>,
    index: HashMap<ModelId, usize>,
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a model definition.
    ///
    /// Any violation is a configuration error; callers treat it as fatal.
    pub fn define_model<I>(&mut self, id: ModelId, length: u16, fields: I) -> SunspecResult<Arc<Model>>
    where
        I: IntoIterator<Item = Field>,
    {
        if id == END_MODEL_ID {
            return Err(SunspecError::configuration(format!(
                "model id 0x{:04X} is reserved for the end marker",
                id
            )));
        }
        if self.index.contains_key(&id) {
            return Err(SunspecError::configuration(format!(
                "model {} defined twice",
                id
            )));
        }

        let fields: Vec<Field> = fields.into_iter().collect();
        validate_fields(id, length, &fields)?;

        let model = Arc::new(Model { id, length, fields });
        debug!(
            "Model {} defined: length={}, fields={}",
            id,
            length,
            model.fields.len()
        );
        self.index.insert(id, self.models.len());
        self.models.push(Arc::clone(&model));
        Ok(model)
    }

    /// Look up a previously defined model.
    pub fn resolve(&self, id: ModelId) -> SunspecResult<Arc<Model>> {
        self.index
            .get(&id)
            .map(|&i| Arc::clone(&self.models[i]))
            .ok_or_else(|| SunspecError::configuration(format!("unknown model {}", id)))
    }

    /// Models in declaration order
    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.iter()
    }

    /// Number of defined models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn validate_fields(id: ModelId, length: u16, fields: &[Field]) -> SunspecResult<()> {
    let mut next_offset: u32 = 0;

    for (i, field) in fields.iter().enumerate() {
        if field.width != field.ty.registers() || field.width == 0 {
            return Err(SunspecError::configuration(format!(
                "model {}: field {} has width {} but type {} needs {}",
                id,
                field.name,
                field.width,
                field.ty,
                field.ty.registers()
            )));
        }
        if !field.symbols.is_empty() && !field.ty.is_symbolic() {
            return Err(SunspecError::configuration(format!(
                "model {}: field {} of type {} cannot carry symbols",
                id, field.name, field.ty
            )));
        }
        if fields[..i].iter().any(|f| f.name == field.name) {
            return Err(SunspecError::configuration(format!(
                "model {}: duplicate field name {}",
                id, field.name
            )));
        }

        let offset = u32::from(field.offset);
        if offset < next_offset {
            return Err(SunspecError::configuration(format!(
                "model {}: field {} at offset {} overlaps the previous field (ends at {})",
                id, field.name, field.offset, next_offset
            )));
        }
        if offset > next_offset {
            return Err(SunspecError::configuration(format!(
                "model {}: gap before field {} (expected offset {}, found {})",
                id, field.name, next_offset, field.offset
            )));
        }
        next_offset += u32::from(field.width);
    }

    if next_offset != u32::from(length) {
        return Err(SunspecError::configuration(format!(
            "model {}: field widths sum to {} but declared length is {}",
            id, next_offset, length
        )));
    }

    Ok(())
}
