//! # Modbus TCP Framing and Dispatch
//!
//! ## MBAP Header
//!
//! ```text
//! ┌────────────────┬─────────────┬────────────┬─────────┬──────────────┐
//! │ Transaction ID │ Protocol ID │ Length     │ Unit ID │ PDU          │
//! │ 2 bytes        │ 2 bytes (0) │ 2 bytes    │ 1 byte  │ Length-1     │
//! └────────────────┴─────────────┴────────────┴─────────┴──────────────┘
//! ```
//!
//! A non-zero protocol id or a length outside `2..=254` is a framing error:
//! the stream can no longer be trusted and the connection is closed.
//!
//! ## Request Validation
//!
//! [`dispatch`] checks a request PDU in this order and stops at the first
//! failure. Every exception response carries function code `0x83`:
//!
//! | Check | Exception |
//! |-------|-----------|
//! | function code is 03 | 01 Illegal Function |
//! | payload is 4 bytes, count in `1..=125` | 03 Illegal Data Value |
//! | `[start, start+count)` inside the map | 02 Illegal Data Address |

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, error};

use crate::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
    EXCEPTION_SERVER_DEVICE_FAILURE, FC_READ_HOLDING_REGISTERS, MAX_MBAP_LENGTH,
    MAX_READ_REGISTERS, MBAP_HEADER_LEN, MIN_MBAP_LENGTH, MODBUS_PROTOCOL_ID,
};
use crate::error::{SunspecError, SunspecResult};
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::register_map::RegisterMap;

/// MBAP header of a Modbus TCP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of unit id plus PDU
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse and validate a received header.
    pub fn decode(buf: &[u8; MBAP_HEADER_LEN]) -> SunspecResult<Self> {
        let header = Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            unit_id: buf[6],
        };

        if header.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(SunspecError::framing(format!(
                "protocol id {} is not Modbus",
                header.protocol_id
            )));
        }
        let length = header.length as usize;
        if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(SunspecError::framing(format!(
                "length {} outside {}..={}",
                length, MIN_MBAP_LENGTH, MAX_MBAP_LENGTH
            )));
        }

        Ok(header)
    }

    /// Header of the reply to this request carrying `pdu_len` bytes of PDU.
    pub fn for_response(&self, pdu_len: usize) -> Self {
        Self {
            transaction_id: self.transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: (pdu_len + 1) as u16,
            unit_id: self.unit_id,
        }
    }

    /// PDU bytes following the header
    #[inline]
    pub fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.transaction_id);
        dst.put_u16(self.protocol_id);
        dst.put_u16(self.length);
        dst.put_u8(self.unit_id);
    }
}

/// Serialize a complete frame answering `request` with `pdu`.
pub fn encode_frame(request: &MbapHeader, pdu: &ModbusPdu) -> Bytes {
    let header = request.for_response(pdu.len());
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
    header.encode(&mut frame);
    frame.put_slice(pdu.as_slice());
    frame.freeze()
}

/// A validated FC03 request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub start: u16,
    pub count: u16,
}

impl ReadRequest {
    /// Parse an FC03 request, returning the exception code on failure.
    pub fn parse(pdu: &ModbusPdu) -> Result<Self, u8> {
        match pdu.function_code() {
            Some(FC_READ_HOLDING_REGISTERS) => {}
            _ => return Err(EXCEPTION_ILLEGAL_FUNCTION),
        }
        if pdu.payload().len() != 4 {
            return Err(EXCEPTION_ILLEGAL_DATA_VALUE);
        }

        let start = pdu.read_u16(1).ok_or(EXCEPTION_ILLEGAL_DATA_VALUE)?;
        let count = pdu.read_u16(3).ok_or(EXCEPTION_ILLEGAL_DATA_VALUE)?;
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(EXCEPTION_ILLEGAL_DATA_VALUE);
        }
        Ok(Self { start, count })
    }
}

/// Answer one request PDU from the register map.
///
/// Always produces a response: the registers, or an exception PDU. Every
/// exception carries function code `0x83`, the only function served, even
/// when the request named another one.
pub fn dispatch(map: &RegisterMap, request: &ModbusPdu) -> ModbusPdu {
    let fc = request.function_code().unwrap_or(0);

    let read = match ReadRequest::parse(request) {
        Ok(read) => read,
        Err(code) => {
            debug!(
                "Rejecting FC={:02X} ({}) with exception {:02X}",
                fc,
                ModbusPdu::function_code_description(fc),
                code
            );
            return PduBuilder::build_exception(FC_READ_HOLDING_REGISTERS, code);
        }
    };

    if !map.contains(read.start, read.count) {
        debug!(
            "Rejecting read of {} registers at {}: outside the map",
            read.count, read.start
        );
        return PduBuilder::build_exception(
            FC_READ_HOLDING_REGISTERS,
            EXCEPTION_ILLEGAL_DATA_ADDRESS,
        );
    }

    match map
        .get_registers(read.start, read.count)
        .and_then(|registers| PduBuilder::build_read_response(&registers))
    {
        Ok(pdu) => pdu,
        Err(e) => {
            error!("Failed to serve read at {}: {}", read.start, e);
            PduBuilder::build_exception(FC_READ_HOLDING_REGISTERS, EXCEPTION_SERVER_DEVICE_FAILURE)
        }
    }
}
