//! # Register Codec
//!
//! Encoding and decoding of field values to and from big-endian register
//! bytes. SunSpec fixes the byte order: most significant byte first and, for
//! 32-bit values, most significant register first (ABCD).
//!
//! ## Encoding Rules
//!
//! | Type | Accepts | Not representable |
//! |------|---------|-------------------|
//! | uint16 | number | non-finite, outside `0..=65534` |
//! | enum16 | number, symbol | non-finite, outside `0..=65534`, unknown symbol |
//! | float32 | number | NaN, outside the f32 range |
//! | bitfield32 | number, symbol (bit position) | outside `0..=0xFFFFFFFE`, unknown symbol |
//! | string(n) | symbol | longer than `2n` bytes |
//!
//! Values whose encoding would equal the type's "not implemented" sentinel are
//! rejected, so an updated field never reads back as unimplemented.

use crate::constants::{NOT_IMPLEMENTED_BITFIELD32, NOT_IMPLEMENTED_F32, NOT_IMPLEMENTED_U16};
use crate::error::{SunspecError, SunspecResult};
use crate::model::{Field, FieldType};
use crate::value::{FieldValue, SampleValue};

// ============================================================================
// Register Conversions
// ============================================================================

/// Convert f32 to 2 big-endian registers.
///
/// # Example
///
/// ```rust
/// use voltage_sunspec::codec::{f32_to_regs, regs_to_f32};
///
/// let regs = f32_to_regs(25.0);
/// assert_eq!(regs, [0x41C8, 0x0000]);
/// assert_eq!(regs_to_f32(&regs), 25.0);
/// ```
#[inline]
pub fn f32_to_regs(value: f32) -> [u16; 2] {
    u32_to_regs(value.to_bits())
}

/// Convert 2 big-endian registers to f32.
#[inline]
pub fn regs_to_f32(regs: &[u16; 2]) -> f32 {
    f32::from_bits(regs_to_u32(regs))
}

/// Convert u32 to 2 big-endian registers.
#[inline]
pub fn u32_to_regs(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

/// Convert 2 big-endian registers to u32.
#[inline]
pub fn regs_to_u32(regs: &[u16; 2]) -> u32 {
    (u32::from(regs[0]) << 16) | u32::from(regs[1])
}

/// Split a byte slice into big-endian registers. A trailing odd byte is ignored.
pub fn bytes_to_regs(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Flatten registers into big-endian bytes.
pub fn regs_to_bytes(regs: &[u16]) -> Vec<u8> {
    regs.iter().flat_map(|r| r.to_be_bytes()).collect()
}

// ============================================================================
// Sentinels
// ============================================================================

/// "Not implemented" bytes for a field type.
pub fn sentinel_bytes(ty: FieldType) -> Vec<u8> {
    match ty {
        FieldType::Uint16 | FieldType::Enum16 => NOT_IMPLEMENTED_U16.to_be_bytes().to_vec(),
        FieldType::Float32 => NOT_IMPLEMENTED_F32.to_be_bytes().to_vec(),
        FieldType::Bitfield32 => NOT_IMPLEMENTED_BITFIELD32.to_be_bytes().to_vec(),
        FieldType::String(_) => vec![0; ty.byte_len()],
    }
}

// ============================================================================
// Field Encoding
// ============================================================================

/// Encode a sample value into exactly `field.width * 2` bytes.
///
/// # Example
///
/// ```rust
/// use voltage_sunspec::codec::encode_field;
/// use voltage_sunspec::model::Field;
/// use voltage_sunspec::SampleValue;
///
/// let field = Field::float32("W", 20, "W");
/// let bytes = encode_field(&field, &SampleValue::Number(1500.5)).unwrap();
/// assert_eq!(bytes, 1500.5f32.to_be_bytes());
/// ```
pub fn encode_field(field: &Field, value: &SampleValue) -> SunspecResult<Vec<u8>> {
    match field.ty {
        FieldType::Uint16 => {
            let v = integer_in_range(field, number(field, value)?, u64::from(NOT_IMPLEMENTED_U16) - 1)?;
            Ok((v as u16).to_be_bytes().to_vec())
        }

        FieldType::Enum16 => {
            let v = match value {
                SampleValue::Number(n) => {
                    integer_in_range(field, *n, u64::from(NOT_IMPLEMENTED_U16) - 1)?
                }
                SampleValue::Symbol(name) => {
                    let symbol = lookup_symbol(field, name)?;
                    if symbol.value >= u32::from(NOT_IMPLEMENTED_U16) {
                        return Err(SunspecError::transform(
                            field.name,
                            format!("symbol {} has out-of-range value {}", name, symbol.value),
                        ));
                    }
                    u64::from(symbol.value)
                }
            };
            Ok((v as u16).to_be_bytes().to_vec())
        }

        FieldType::Float32 => {
            let n = number(field, value)?;
            if n.is_nan() {
                return Err(SunspecError::transform(
                    field.name,
                    "NaN is reserved for not-implemented",
                ));
            }
            let v = n as f32;
            if !v.is_finite() {
                return Err(SunspecError::transform(
                    field.name,
                    format!("{} is outside the float32 range", n),
                ));
            }
            Ok(v.to_be_bytes().to_vec())
        }

        FieldType::Bitfield32 => {
            let v = match value {
                SampleValue::Number(n) => {
                    integer_in_range(field, *n, u64::from(NOT_IMPLEMENTED_BITFIELD32) - 1)?
                }
                SampleValue::Symbol(name) => {
                    let symbol = lookup_symbol(field, name)?;
                    if symbol.value > 31 {
                        return Err(SunspecError::transform(
                            field.name,
                            format!("symbol {} has invalid bit position {}", name, symbol.value),
                        ));
                    }
                    1u64 << symbol.value
                }
            };
            Ok((v as u32).to_be_bytes().to_vec())
        }

        FieldType::String(_) => {
            let text = value.as_symbol().ok_or_else(|| {
                SunspecError::transform(field.name, "string fields need a symbolic value")
            })?;
            let capacity = field.ty.byte_len();
            if text.len() > capacity {
                return Err(SunspecError::transform(
                    field.name,
                    format!("{} bytes do not fit in {} bytes", text.len(), capacity),
                ));
            }
            let mut bytes = text.as_bytes().to_vec();
            bytes.resize(capacity, 0);
            Ok(bytes)
        }
    }
}

/// Decode field bytes back into a typed value.
pub fn decode_field(ty: FieldType, bytes: &[u8]) -> SunspecResult<FieldValue> {
    if bytes.len() != ty.byte_len() {
        return Err(SunspecError::protocol(format!(
            "{} needs {} bytes, got {}",
            ty,
            ty.byte_len(),
            bytes.len()
        )));
    }

    let value = match ty {
        FieldType::Uint16 => FieldValue::U16(u16::from_be_bytes([bytes[0], bytes[1]])),
        FieldType::Enum16 => FieldValue::Enum16(u16::from_be_bytes([bytes[0], bytes[1]])),
        FieldType::Float32 => {
            FieldValue::F32(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        FieldType::Bitfield32 => {
            FieldValue::Bitfield32(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        FieldType::String(_) => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            FieldValue::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
    };
    Ok(value)
}

fn number(field: &Field, value: &SampleValue) -> SunspecResult<f64> {
    value.as_f64().ok_or_else(|| {
        SunspecError::transform(
            field.name,
            format!("{} field cannot hold symbol {}", field.ty, value),
        )
    })
}

fn integer_in_range(field: &Field, n: f64, max: u64) -> SunspecResult<u64> {
    if !n.is_finite() {
        return Err(SunspecError::transform(field.name, format!("{} is not finite", n)));
    }
    let rounded = n.round();
    if rounded < 0.0 || rounded > max as f64 {
        return Err(SunspecError::transform(
            field.name,
            format!("{} is outside 0..={}", n, max),
        ));
    }
    Ok(rounded as u64)
}

fn lookup_symbol<'a>(field: &'a Field, name: &str) -> SunspecResult<&'a crate::model::Symbol> {
    field
        .symbol(name)
        .ok_or_else(|| SunspecError::transform(field.name, format!("unknown symbol {}", name)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Symbol;
    use proptest::prelude::*;

    const STATES: &[Symbol] = &[Symbol::new("OFF", 1), Symbol::new("MPPT", 4)];
    const EVENTS: &[Symbol] = &[Symbol::new("GROUND_FAULT", 0), Symbol::new("OVER_TEMP", 7)];

    #[test]
    fn test_register_conversions() {
        assert_eq!(u32_to_regs(0x1234_5678), [0x1234, 0x5678]);
        assert_eq!(regs_to_u32(&[0x1234, 0x5678]), 0x1234_5678);
        assert_eq!(f32_to_regs(123.456), [0x42F6, 0xE979]);
        assert_eq!(bytes_to_regs(&[0x12, 0x34, 0x56, 0x78, 0x9A]), vec![0x1234, 0x5678]);
        assert_eq!(regs_to_bytes(&[0x1234, 0x5678]), vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(sentinel_bytes(FieldType::Uint16), vec![0xFF, 0xFF]);
        assert_eq!(sentinel_bytes(FieldType::Enum16), vec![0xFF, 0xFF]);
        assert_eq!(sentinel_bytes(FieldType::Float32), vec![0x7F, 0xC0, 0x00, 0x00]);
        assert_eq!(sentinel_bytes(FieldType::Bitfield32), vec![0xFF; 4]);
        assert_eq!(sentinel_bytes(FieldType::String(8)), vec![0; 16]);
    }

    #[test]
    fn test_encode_uint16() {
        let field = Field::uint16("DA", 64, "");
        assert_eq!(encode_field(&field, &12345u16.into()).unwrap(), vec![0x30, 0x39]);
        assert_eq!(encode_field(&field, &2.6.into()).unwrap(), vec![0x00, 0x03]);
        assert!(encode_field(&field, &(-1i32).into()).is_err());
        assert!(encode_field(&field, &65535u32.into()).is_err());
        assert!(encode_field(&field, &"x".into()).is_err());
    }

    #[test]
    fn test_encode_enum16() {
        let field = Field::enum16("St", 46, STATES);
        assert_eq!(encode_field(&field, &"MPPT".into()).unwrap(), vec![0x00, 0x04]);
        // Values outside the table are still representable
        assert_eq!(encode_field(&field, &9u16.into()).unwrap(), vec![0x00, 0x09]);
        assert!(encode_field(&field, &"FAULT".into()).is_err());
        assert!(encode_field(&field, &0xFFFFu32.into()).is_err());
    }

    #[test]
    fn test_encode_float32() {
        let field = Field::float32("W", 20, "W");
        assert_eq!(encode_field(&field, &123.456.into()).unwrap(), vec![0x42, 0xF6, 0xE9, 0x79]);
        assert!(encode_field(&field, &f64::NAN.into()).is_err());
        assert!(encode_field(&field, &f64::INFINITY.into()).is_err());
        assert!(encode_field(&field, &1e300.into()).is_err());
    }

    #[test]
    fn test_encode_bitfield32() {
        let field = Field::bitfield32("Evt1", 48, EVENTS);
        assert_eq!(
            encode_field(&field, &0xAAAA_AAAAu32.into()).unwrap(),
            vec![0xAA, 0xAA, 0xAA, 0xAA]
        );
        assert_eq!(encode_field(&field, &"OVER_TEMP".into()).unwrap(), vec![0, 0, 0, 0x80]);
        assert!(encode_field(&field, &0xFFFF_FFFFu32.into()).is_err());
    }

    #[test]
    fn test_encode_string() {
        let field = Field::string("Mn", 0, 4);
        assert_eq!(
            encode_field(&field, &"Ferro".into()).unwrap(),
            vec![b'F', b'e', b'r', b'r', b'o', 0, 0, 0]
        );
        assert!(encode_field(&field, &"Ferroamp AB".into()).is_err());
        assert!(encode_field(&field, &1.0.into()).is_err());
    }

    #[test]
    fn test_decode_field() {
        assert_eq!(
            decode_field(FieldType::Enum16, &[0x00, 0x04]).unwrap(),
            FieldValue::Enum16(4)
        );
        assert_eq!(
            decode_field(FieldType::String(4), b"SunS\0\0\0\0").unwrap(),
            FieldValue::Str("SunS".to_string())
        );
        assert!(decode_field(FieldType::Float32, &[0, 0]).is_err());
    }

    #[test]
    fn test_float_roundtrip_edge_values() {
        for value in [0.0f32, -0.0, -1500.5, f32::MAX, f32::MIN, f32::MIN_POSITIVE, 1e-45] {
            let decoded = regs_to_f32(&f32_to_regs(value));
            assert_eq!(decoded.to_bits(), value.to_bits(), "roundtrip failed for {}", value);
        }
    }

    proptest! {
        #[test]
        fn prop_float_encode_decode_is_bit_identical(value in any::<f32>().prop_filter("finite", |v| v.is_finite())) {
            let field = Field::float32("W", 0, "W");
            let bytes = encode_field(&field, &SampleValue::Number(f64::from(value))).unwrap();
            let decoded = decode_field(FieldType::Float32, &bytes).unwrap();
            match decoded {
                FieldValue::F32(v) => prop_assert_eq!(v.to_bits(), value.to_bits()),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }

        #[test]
        fn prop_float_register_roundtrip(bits in any::<u32>()) {
            let value = f32::from_bits(bits);
            prop_assert_eq!(regs_to_f32(&f32_to_regs(value)).to_bits(), bits);
        }
    }
}
