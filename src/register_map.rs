//! # Register Map
//!
//! The live register image of one served device.
//!
//! ## Layout
//!
//! ```text
//! base        "SunS" marker             2 registers
//! base+2      model 1 header + data     2 + 66
//! ...         model 113 header + data   2 + 60
//! ...         model 213 header + data   2 + 124
//! end-2       0xFFFF 0x0000             end block
//! ```
//!
//! ## Concurrency
//!
//! All bytes live behind one map-wide [`parking_lot::RwLock`]. Writers hold
//! the write lock only while copying a field's bytes in, readers hold the
//! read lock only while copying a span out. A reader therefore sees every
//! field either entirely before or entirely after any concurrent write.
//!
//! Fields are addressed through [`FieldSlot`]s resolved once with
//! [`RegisterMap::locate`]; the hot path never looks anything up by name.
//! A slot only addresses the map that resolved it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::codec::{decode_field, sentinel_bytes};
use crate::constants::{END_MODEL_ID, MODEL_HEADER_REGISTERS, SUNSPEC_ID};
use crate::error::{SunspecError, SunspecResult};
use crate::model::{Field, Model, ModelId, ModelRegistry};
use crate::value::FieldValue;

/// Position of one model block in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelBlock {
    /// Model identifier (`0xFFFF` for the end block)
    pub id: ModelId,
    /// Absolute address of the block header
    pub start: u16,
    /// Data length in registers, excluding the header
    pub length: u16,
}

impl ModelBlock {
    /// Absolute address of the first data register
    #[inline]
    pub fn data_start(&self) -> u16 {
        self.start + MODEL_HEADER_REGISTERS
    }
}

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(1);

/// A field resolved to its absolute position in a specific map.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    map_id: u64,
    model_id: ModelId,
    field: Field,
    address: u16,
    byte_offset: usize,
}

impl FieldSlot {
    #[inline]
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    #[inline]
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// Absolute wire address of the field's first register
    #[inline]
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Field width in bytes
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.field.width as usize * 2
    }
}

impl fmt::Display for FieldSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.model_id, self.field.name, self.address)
    }
}

/// Register image of one device.
pub struct RegisterMap {
    id: u64,
    base_address: u16,
    registers: usize,
    blocks: Vec<ModelBlock>,
    models: Vec<Arc<Model>>,
    data: RwLock<Vec<u8>>,
}

impl RegisterMap {
    /// Lay out every model of `registry` starting at `base_address`.
    ///
    /// All fields start at their "not implemented" sentinel. Fails when the
    /// layout does not fit in the 16-bit address space.
    pub fn new(registry: &ModelRegistry, base_address: u16) -> SunspecResult<Self> {
        let models: Vec<Arc<Model>> = registry.models().cloned().collect();

        let total: u32 = SUNSPEC_ID.len() as u32
            + models.iter().map(|m| u32::from(m.span())).sum::<u32>()
            + u32::from(MODEL_HEADER_REGISTERS);
        if u32::from(base_address) + total > 0x1_0000 {
            return Err(SunspecError::configuration(format!(
                "register map of {} registers does not fit at base address {}",
                total, base_address
            )));
        }

        let mut data = Vec::with_capacity(total as usize * 2);
        let mut blocks = Vec::with_capacity(models.len() + 1);
        let mut address = base_address + SUNSPEC_ID.len() as u16;

        for reg in SUNSPEC_ID {
            data.extend_from_slice(&reg.to_be_bytes());
        }
        for model in &models {
            blocks.push(ModelBlock {
                id: model.id(),
                start: address,
                length: model.length(),
            });
            data.extend_from_slice(&model.id().to_be_bytes());
            data.extend_from_slice(&model.length().to_be_bytes());
            for field in model.fields() {
                data.extend_from_slice(&sentinel_bytes(field.ty));
            }
            address += model.span();
        }
        blocks.push(ModelBlock {
            id: END_MODEL_ID,
            start: address,
            length: 0,
        });
        data.extend_from_slice(&END_MODEL_ID.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());

        debug!(
            "Register map laid out: base={}, registers={}, models={}",
            base_address,
            total,
            models.len()
        );

        Ok(Self {
            id: NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed),
            base_address,
            registers: total as usize,
            blocks,
            models,
            data: RwLock::new(data),
        })
    }

    /// Resolve a field to its absolute position.
    pub fn locate(&self, model_id: ModelId, name: &str) -> SunspecResult<FieldSlot> {
        let (model, block) = self
            .models
            .iter()
            .zip(&self.blocks)
            .find(|(m, _)| m.id() == model_id)
            .ok_or_else(|| {
                SunspecError::configuration(format!("model {} is not in the register map", model_id))
            })?;

        let field = model.field(name).ok_or_else(|| {
            SunspecError::configuration(format!("model {} has no field {}", model_id, name))
        })?;

        let address = block.data_start() + field.offset;
        Ok(FieldSlot {
            map_id: self.id,
            model_id,
            field: field.clone(),
            address,
            byte_offset: usize::from(address - self.base_address) * 2,
        })
    }

    /// Write a field's bytes.
    ///
    /// `bytes` must be exactly `width * 2` long. The write is atomic with
    /// respect to [`get_registers`](Self::get_registers).
    pub fn set_field(&self, slot: &FieldSlot, bytes: &[u8]) -> SunspecResult<()> {
        self.check_owner(slot)?;
        if bytes.len() != slot.byte_len() {
            return Err(SunspecError::SizeMismatch {
                field: slot.field.name.to_string(),
                expected: slot.byte_len(),
                actual: bytes.len(),
            });
        }

        let range = slot.byte_offset..slot.byte_offset + bytes.len();
        {
            let mut data = self.data.write();
            let target = data.get_mut(range).ok_or(SunspecError::OutOfRange {
                start: slot.address,
                count: slot.field.width,
            })?;
            target.copy_from_slice(bytes);
        }

        trace!("Field {} written: {:02X?}", slot, bytes);
        Ok(())
    }

    /// Copy `count` registers starting at absolute address `start`.
    pub fn get_registers(&self, start: u16, count: u16) -> SunspecResult<Bytes> {
        let range = self
            .byte_range(start, count)
            .ok_or(SunspecError::OutOfRange { start, count })?;

        let data = self.data.read();
        Ok(Bytes::copy_from_slice(&data[range]))
    }

    /// Whether `[start, start + count)` lies inside the map.
    #[inline]
    pub fn contains(&self, start: u16, count: u16) -> bool {
        self.byte_range(start, count).is_some()
    }

    /// Current bytes of a field.
    pub fn read_field(&self, slot: &FieldSlot) -> SunspecResult<Bytes> {
        self.check_owner(slot)?;
        self.get_registers(slot.address, slot.field.width)
    }

    /// Current decoded value of a field.
    pub fn field_value(&self, slot: &FieldSlot) -> SunspecResult<FieldValue> {
        let bytes = self.read_field(slot)?;
        decode_field(slot.field.ty, &bytes)
    }

    /// Total size in registers, marker and end block included.
    #[inline]
    pub fn size(&self) -> usize {
        self.registers
    }

    #[inline]
    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    /// Model blocks in map order, end block last.
    pub fn blocks(&self) -> &[ModelBlock] {
        &self.blocks
    }

    /// Consistent copy of the whole map.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data.read())
    }

    fn check_owner(&self, slot: &FieldSlot) -> SunspecResult<()> {
        if slot.map_id != self.id {
            return Err(SunspecError::configuration(format!(
                "field {} was resolved against another register map",
                slot
            )));
        }
        Ok(())
    }

    fn byte_range(&self, start: u16, count: u16) -> Option<std::ops::Range<usize>> {
        if count == 0 || start < self.base_address {
            return None;
        }
        let offset = usize::from(start - self.base_address);
        let end = offset + usize::from(count);
        (end <= self.registers).then(|| offset * 2..end * 2)
    }
}

impl fmt::Debug for RegisterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterMap")
            .field("base_address", &self.base_address)
            .field("blocks", &self.blocks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{sunspec_registry, INVERTER_MODEL_ID, METER_MODEL_ID};
    use crate::codec::{bytes_to_regs, regs_to_f32};
    use crate::constants::SUNSPEC_BASE_ADDRESS;
    use crate::model::Symbol;

    fn sunspec_map() -> RegisterMap {
        RegisterMap::new(&sunspec_registry().unwrap(), SUNSPEC_BASE_ADDRESS).unwrap()
    }

    #[test]
    fn test_layout_and_size() {
        let map = sunspec_map();
        // marker + (2+66) + (2+60) + (2+124) + end block
        assert_eq!(map.size(), 2 + 68 + 62 + 126 + 2);

        let blocks = map.blocks();
        assert_eq!(blocks[0], ModelBlock { id: 1, start: 40002, length: 66 });
        assert_eq!(blocks[1].start, 40070);
        assert_eq!(blocks[2].start, 40132);
        assert_eq!(blocks[3], ModelBlock { id: 0xFFFF, start: 40258, length: 0 });
    }

    #[test]
    fn test_marker_and_headers() {
        let map = sunspec_map();
        let regs = bytes_to_regs(&map.get_registers(40000, 4).unwrap());
        assert_eq!(regs, vec![0x5375, 0x6E53, 1, 66]);

        let regs = bytes_to_regs(&map.get_registers(40070, 2).unwrap());
        assert_eq!(regs, vec![113, 60]);

        let regs = bytes_to_regs(&map.get_registers(40258, 2).unwrap());
        assert_eq!(regs, vec![0xFFFF, 0]);
    }

    #[test]
    fn test_fields_start_at_sentinel() {
        let map = sunspec_map();
        let w = map.locate(INVERTER_MODEL_ID, "W").unwrap();
        assert_eq!(w.address(), 40072 + 20);
        assert_eq!(&map.read_field(&w).unwrap()[..], &[0x7F, 0xC0, 0x00, 0x00]);

        let st = map.locate(INVERTER_MODEL_ID, "St").unwrap();
        assert!(map.field_value(&st).unwrap().is_not_implemented());

        let evt = map.locate(METER_MODEL_ID, "Evt").unwrap();
        assert_eq!(&map.read_field(&evt).unwrap()[..], &[0xFF; 4]);
    }

    #[test]
    fn test_set_field_then_read() {
        let map = sunspec_map();
        let w = map.locate(INVERTER_MODEL_ID, "W").unwrap();
        map.set_field(&w, &1500.5f32.to_be_bytes()).unwrap();

        let regs = bytes_to_regs(&map.get_registers(w.address(), 2).unwrap());
        assert_eq!(regs_to_f32(&[regs[0], regs[1]]), 1500.5);
        assert_eq!(map.field_value(&w).unwrap(), FieldValue::F32(1500.5));
    }

    #[test]
    fn test_set_field_size_mismatch() {
        let map = sunspec_map();
        let w = map.locate(INVERTER_MODEL_ID, "W").unwrap();
        let before = map.snapshot();

        let err = map.set_field(&w, &[0x00, 0x01]).unwrap_err();
        assert!(matches!(
            err,
            SunspecError::SizeMismatch { expected: 4, actual: 2, .. }
        ));
        assert_eq!(map.snapshot(), before);
    }

    #[test]
    fn test_get_registers_bounds() {
        let map = sunspec_map();
        let size = map.size() as u16;

        assert!(map.get_registers(40000, size).is_ok());
        assert!(map.get_registers(40000 + size - 1, 1).is_ok());
        assert!(matches!(
            map.get_registers(40000 + size - 1, 2),
            Err(SunspecError::OutOfRange { .. })
        ));
        assert!(map.get_registers(39999, 1).is_err());
        assert!(map.get_registers(0, 10).is_err());
        assert!(map.get_registers(40000, 0).is_err());
        assert!(!map.contains(65535, 1));
    }

    #[test]
    fn test_locate_unknown() {
        let map = sunspec_map();
        assert!(map.locate(INVERTER_MODEL_ID, "Nope").is_err());
        assert!(map.locate(160, "W").is_err());
    }

    #[test]
    fn test_does_not_fit_address_space() {
        let err = RegisterMap::new(&sunspec_registry().unwrap(), 65400).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_independent_instances() {
        const STATES: &[Symbol] = &[Symbol::new("ON", 1)];
        let mut registry = ModelRegistry::new();
        registry
            .define_model(64000, 1, vec![Field::enum16("Mode", 0, STATES)])
            .unwrap();

        let a = RegisterMap::new(&registry, 0).unwrap();
        let b = RegisterMap::new(&registry, 0).unwrap();
        let slot = a.locate(64000, "Mode").unwrap();
        a.set_field(&slot, &[0x00, 0x01]).unwrap();

        assert_eq!(&a.read_field(&slot).unwrap()[..], &[0x00, 0x01]);
        let other = b.locate(64000, "Mode").unwrap();
        assert_eq!(&b.read_field(&other).unwrap()[..], &[0xFF, 0xFF]);
        assert_eq!(a.size(), 2 + 3 + 2);
    }

    #[test]
    fn test_slot_from_another_map_is_rejected() {
        let a = sunspec_map();
        let b = RegisterMap::new(&sunspec_registry().unwrap(), 0).unwrap();
        let w = a.locate(INVERTER_MODEL_ID, "W").unwrap();
        let before = b.snapshot();

        let err = b.set_field(&w, &1.0f32.to_be_bytes()).unwrap_err();
        assert!(matches!(err, SunspecError::Configuration { .. }), "{:?}", err);
        assert!(b.read_field(&w).is_err());
        assert!(b.field_value(&w).is_err());
        assert_eq!(b.snapshot(), before);
        assert!(a.set_field(&w, &1.0f32.to_be_bytes()).is_ok());
    }
}
