//! Modbus PDU buffer and builders
//!
//! A PDU is at most [`MAX_PDU_SIZE`] bytes, so it is kept in a fixed stack
//! array. Only the shapes the bridge exchanges are built here:
//!
//! | PDU | Layout |
//! |-----|--------|
//! | FC03 request | `03 start(2) count(2)` |
//! | FC03 response | `03 byte_count(1) registers(2n)` |
//! | exception | `fc|0x80 code(1)` |

use tracing::trace;

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, MAX_PDU_SIZE, MAX_READ_REGISTERS,
};
use crate::error::{SunspecError, SunspecResult};

/// PDU stored in a stack-allocated buffer
#[derive(Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Copy a received PDU
    pub fn from_slice(bytes: &[u8]) -> SunspecResult<Self> {
        if bytes.len() > MAX_PDU_SIZE {
            return Err(SunspecError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                bytes.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..bytes.len()].copy_from_slice(bytes);
        pdu.len = bytes.len();
        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> SunspecResult<()> {
        self.extend(&[byte])
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> SunspecResult<()> {
        self.extend(&value.to_be_bytes())
    }

    /// Extend with a byte slice
    pub fn extend(&mut self, bytes: &[u8]) -> SunspecResult<()> {
        let end = self.len + bytes.len();
        if end > MAX_PDU_SIZE {
            return Err(SunspecError::protocol(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                bytes.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Bytes following the function code
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.as_slice().get(1..).unwrap_or(&[])
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Exception code of an exception response
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.payload().first().copied()
        } else {
            None
        }
    }

    /// Big-endian u16 at `offset` within the PDU
    #[inline]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        self.as_slice()
            .get(offset..offset + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    /// Human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & !EXCEPTION_FLAG {
            0x01 => "Read Coils",
            0x02 => "Read Discrete Inputs",
            0x03 => "Read Holding Registers",
            0x04 => "Read Input Registers",
            0x05 => "Write Single Coil",
            0x06 => "Write Single Register",
            0x0F => "Write Multiple Coils",
            0x10 => "Write Multiple Registers",
            _ => "Unknown Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModbusPdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModbusPdu({:02X?})", self.as_slice())
    }
}

impl PartialEq for ModbusPdu {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

/// PDU builder - fluent API
#[derive(Default)]
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> SunspecResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> SunspecResult<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> SunspecResult<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> SunspecResult<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    #[inline]
    pub fn data(mut self, data: &[u8]) -> SunspecResult<Self> {
        self.pdu.extend(data)?;
        Ok(self)
    }

    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            trace!(
                "PDU built: FC={:02X} ({}), len={}",
                fc,
                ModbusPdu::function_code_description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }

    /// FC03 request for `quantity` registers at `start_address`
    pub fn build_read_request(start_address: u16, quantity: u16) -> SunspecResult<ModbusPdu> {
        if quantity == 0 || quantity > MAX_READ_REGISTERS {
            return Err(SunspecError::protocol(format!(
                "register count {} outside 1..={}",
                quantity, MAX_READ_REGISTERS
            )));
        }
        Ok(PduBuilder::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .address(start_address)?
            .quantity(quantity)?
            .build())
    }

    /// FC03 response carrying raw big-endian register bytes
    pub fn build_read_response(registers: &[u8]) -> SunspecResult<ModbusPdu> {
        if registers.len() % 2 != 0 || registers.len() > MAX_READ_REGISTERS as usize * 2 {
            return Err(SunspecError::protocol(format!(
                "invalid register payload length {}",
                registers.len()
            )));
        }
        Ok(PduBuilder::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .byte(registers.len() as u8)?
            .data(registers)?
            .build())
    }

    /// Exception response for request function `fc`
    pub fn build_exception(fc: u8, code: u8) -> ModbusPdu {
        let mut pdu = ModbusPdu::new();
        pdu.data[0] = fc | EXCEPTION_FLAG;
        pdu.data[1] = code;
        pdu.len = 2;
        pdu
    }
}
