//! # Value Types
//!
//! [`SampleValue`] is what telemetry delivers: a number or a symbol.
//! [`FieldValue`] is what a register field holds once decoded, used for
//! diagnostics and tests.

use std::fmt;

/// Value carried by a telemetry sample.
///
/// # Example
///
/// ```rust
/// use voltage_sunspec::SampleValue;
///
/// let power: SampleValue = 1500.5.into();
/// assert_eq!(power.as_f64(), Some(1500.5));
///
/// let state: SampleValue = "MPPT".into();
/// assert_eq!(state.as_symbol(), Some("MPPT"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    /// Numeric reading
    Number(f64),
    /// Symbolic reading (enumeration name, text)
    Symbol(String),
}

impl SampleValue {
    /// Numeric value, if this is a number
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SampleValue::Number(v) => Some(*v),
            SampleValue::Symbol(_) => None,
        }
    }

    /// Symbol text, if this is a symbol
    #[inline]
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            SampleValue::Number(_) => None,
            SampleValue::Symbol(s) => Some(s),
        }
    }

    /// Returns the type name as a string for logging/debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            SampleValue::Number(_) => "number",
            SampleValue::Symbol(_) => "symbol",
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Number(v) => write!(f, "{}", v),
            SampleValue::Symbol(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        SampleValue::Number(v)
    }
}

impl From<f32> for SampleValue {
    fn from(v: f32) -> Self {
        SampleValue::Number(f64::from(v))
    }
}

impl From<u16> for SampleValue {
    fn from(v: u16) -> Self {
        SampleValue::Number(f64::from(v))
    }
}

impl From<u32> for SampleValue {
    fn from(v: u32) -> Self {
        SampleValue::Number(f64::from(v))
    }
}

impl From<i32> for SampleValue {
    fn from(v: i32) -> Self {
        SampleValue::Number(f64::from(v))
    }
}

impl From<&str> for SampleValue {
    fn from(v: &str) -> Self {
        SampleValue::Symbol(v.to_string())
    }
}

impl From<String> for SampleValue {
    fn from(v: String) -> Self {
        SampleValue::Symbol(v)
    }
}

/// Decoded content of a register field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    U16(u16),
    Enum16(u16),
    F32(f32),
    Bitfield32(u32),
    Str(String),
}

impl FieldValue {
    /// Whether the value is its type's "not implemented" sentinel.
    pub fn is_not_implemented(&self) -> bool {
        use crate::constants::{NOT_IMPLEMENTED_BITFIELD32, NOT_IMPLEMENTED_U16};

        match self {
            FieldValue::U16(v) | FieldValue::Enum16(v) => *v == NOT_IMPLEMENTED_U16,
            FieldValue::F32(v) => v.is_nan(),
            FieldValue::Bitfield32(v) => *v == NOT_IMPLEMENTED_BITFIELD32,
            FieldValue::Str(s) => s.is_empty(),
        }
    }

    /// Numeric view of the value; `None` for strings and sentinels.
    pub fn as_f64(&self) -> Option<f64> {
        if self.is_not_implemented() {
            return None;
        }
        match self {
            FieldValue::U16(v) | FieldValue::Enum16(v) => Some(f64::from(*v)),
            FieldValue::F32(v) => Some(f64::from(*v)),
            FieldValue::Bitfield32(v) => Some(f64::from(*v)),
            FieldValue::Str(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_not_implemented() {
            return f.write_str("n/a");
        }
        match self {
            FieldValue::U16(v) | FieldValue::Enum16(v) => write!(f, "{}", v),
            FieldValue::F32(v) => write!(f, "{}", v),
            FieldValue::Bitfield32(v) => write!(f, "0x{:08X}", v),
            FieldValue::Str(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_value_views() {
        assert_eq!(SampleValue::from(230u16).as_f64(), Some(230.0));
        assert_eq!(SampleValue::from(-12i32).as_f64(), Some(-12.0));
        assert_eq!(SampleValue::from("MPPT").as_f64(), None);
        assert_eq!(SampleValue::from(1.5f64).as_symbol(), None);
        assert_eq!(SampleValue::from(1.5f64).type_name(), "number");
    }

    #[test]
    fn test_field_value_sentinels() {
        assert!(FieldValue::U16(0xFFFF).is_not_implemented());
        assert!(FieldValue::F32(f32::NAN).is_not_implemented());
        assert!(FieldValue::Bitfield32(0xFFFF_FFFF).is_not_implemented());
        assert!(!FieldValue::Bitfield32(0).is_not_implemented());
        assert!(!FieldValue::Enum16(4).is_not_implemented());
        assert_eq!(FieldValue::F32(f32::NAN).as_f64(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(FieldValue::Enum16(4).to_string(), "4");
        assert_eq!(FieldValue::Bitfield32(0).to_string(), "0x00000000");
        assert_eq!(FieldValue::U16(0xFFFF).to_string(), "n/a");
        assert_eq!(SampleValue::from("OFF").to_string(), "OFF");
    }
}
