//! Modbus and SunSpec constants
//!
//! Frame limits follow the Modbus application protocol specification:
//! - Maximum PDU size: 253 bytes (inherited from RS485 ADU limit of 256 bytes)
//! - The FC03 register limit is calculated to fit within the PDU size constraint
//!
//! SunSpec values follow the SunSpec information model conventions.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length on the wire
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
/// = 1 (Unit ID) + 253 (Max PDU) = 254 bytes
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Minimum MBAP length field value: Unit ID + function code
pub const MIN_MBAP_LENGTH: usize = 2;

/// The only protocol identifier defined for Modbus TCP
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Maximum number of registers for FC03 (Read Holding Registers)
///
/// Calculation for response PDU:
/// - Function Code: 1 byte
/// - Byte Count: 1 byte
/// - Register Data: N × 2 bytes
/// - Total: 1 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ (253 - 2) / 2 = 125.5 → 125 registers
pub const MAX_READ_REGISTERS: u16 = 125;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

// ============================================================================
// Function and Exception Codes
// ============================================================================

/// Read Holding Registers (FC03), the only function served
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

// ============================================================================
// SunSpec Layout
// ============================================================================

/// Conventional SunSpec base register address
pub const SUNSPEC_BASE_ADDRESS: u16 = 40000;

/// "SunS" marker occupying the first two registers of the map
pub const SUNSPEC_ID: [u16; 2] = [0x5375, 0x6E53];

/// Registers occupied by a model header (ID + length)
pub const MODEL_HEADER_REGISTERS: u16 = 2;

/// Model ID of the terminating end block
pub const END_MODEL_ID: u16 = 0xFFFF;

// ============================================================================
// Not-Implemented Sentinels
// ============================================================================

/// uint16 / enum16 "not implemented"
pub const NOT_IMPLEMENTED_U16: u16 = 0xFFFF;

/// bitfield32 "not implemented"
pub const NOT_IMPLEMENTED_BITFIELD32: u32 = 0xFFFF_FFFF;

/// float32 "not implemented" (quiet NaN)
pub const NOT_IMPLEMENTED_F32: u32 = 0x7FC0_0000;
