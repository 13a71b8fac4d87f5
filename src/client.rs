//! Modbus TCP read client
//!
//! A small FC03 client used for probing a running bridge and by the
//! integration tests. Requests are sent one at a time; every reply must echo
//! the request's transaction id.
//!
//! | Function Code | Primary Name | Semantic Alias |
//! |---------------|--------------|----------------|
//! | 0x03 | `read_03()` | `read_holding_registers()` |
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use voltage_sunspec::{ModbusTcpClient, SunspecResult};
//!
//! #[tokio::main]
//! async fn main() -> SunspecResult<()> {
//!     let mut client = ModbusTcpClient::from_address("127.0.0.1:502", Duration::from_secs(5)).await?;
//!
//!     // "SunS" marker
//!     let marker = client.read_03(1, 40000, 2).await?;
//!     assert_eq!(marker, vec![0x5375, 0x6E53]);
//!
//!     client.close().await
//! }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::codec::{bytes_to_regs, regs_to_f32};
use crate::constants::{FC_READ_HOLDING_REGISTERS, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID};
use crate::error::{SunspecError, SunspecResult};
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::protocol::MbapHeader;

/// Modbus TCP client over one connection.
#[derive(Debug)]
pub struct ModbusTcpClient {
    stream: TcpStream,
    address: SocketAddr,
    timeout: Duration,
    transaction_id: u16,
}

impl ModbusTcpClient {
    /// Connect to `addr`; `timeout` bounds the connect and every request.
    pub async fn new(addr: SocketAddr, timeout_duration: Duration) -> SunspecResult<Self> {
        let stream = timeout(timeout_duration, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                SunspecError::timeout(
                    format!("connect to {}", addr),
                    timeout_duration.as_millis() as u64,
                )
            })??;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);

        Ok(Self {
            stream,
            address: addr,
            timeout: timeout_duration,
            transaction_id: 0,
        })
    }

    /// Connect to a `host:port` string.
    pub async fn from_address(addr: &str, timeout_duration: Duration) -> SunspecResult<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| SunspecError::configuration(format!("invalid address {}: {}", addr, e)))?;
        Self::new(addr, timeout_duration).await
    }

    pub fn server_address(&self) -> SocketAddr {
        self.address
    }

    /// Read holding registers (function code 0x03).
    ///
    /// Exception replies are returned as [`SunspecError::Exception`].
    pub async fn read_03(&mut self, unit_id: u8, address: u16, quantity: u16) -> SunspecResult<Vec<u16>> {
        let request = PduBuilder::build_read_request(address, quantity)?;
        let response = self.request(unit_id, &request).await?;

        if let Some(code) = response.exception_code() {
            return Err(SunspecError::Exception {
                function: response.function_code().unwrap_or(0),
                code,
            });
        }
        if response.function_code() != Some(FC_READ_HOLDING_REGISTERS) {
            return Err(SunspecError::protocol(format!(
                "unexpected function code in reply: {:?}",
                response.function_code()
            )));
        }

        let payload = response.payload();
        let byte_count = payload.first().copied().unwrap_or(0) as usize;
        if byte_count != quantity as usize * 2 || payload.len() != byte_count + 1 {
            return Err(SunspecError::protocol(format!(
                "expected {} register bytes, got byte count {} and {} payload bytes",
                quantity as usize * 2,
                byte_count,
                payload.len()
            )));
        }
        Ok(bytes_to_regs(&payload[1..]))
    }

    /// Alias for [`read_03`](Self::read_03).
    pub async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> SunspecResult<Vec<u16>> {
        self.read_03(unit_id, address, quantity).await
    }

    /// Read a big-endian float32 occupying two registers.
    pub async fn read_f32(&mut self, unit_id: u8, address: u16) -> SunspecResult<f32> {
        let regs = self.read_03(unit_id, address, 2).await?;
        Ok(regs_to_f32(&[regs[0], regs[1]]))
    }

    /// Send any PDU and return the reply PDU unchanged.
    pub async fn request(&mut self, unit_id: u8, pdu: &ModbusPdu) -> SunspecResult<ModbusPdu> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let header = MbapHeader {
            transaction_id: self.transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: (pdu.len() + 1) as u16,
            unit_id,
        };

        let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
        header.encode(&mut frame);
        frame.extend_from_slice(pdu.as_slice());

        let millis = self.timeout.as_millis() as u64;
        timeout(self.timeout, self.exchange(&frame, header))
            .await
            .map_err(|_| SunspecError::timeout(format!("request to {}", self.address), millis))?
    }

    async fn exchange(&mut self, frame: &[u8], request: MbapHeader) -> SunspecResult<ModbusPdu> {
        self.stream.write_all(frame).await?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let reply = MbapHeader::decode(&header)?;
        if reply.transaction_id != request.transaction_id || reply.unit_id != request.unit_id {
            return Err(SunspecError::protocol(format!(
                "reply tid={} unit={} does not match request tid={} unit={}",
                reply.transaction_id, reply.unit_id, request.transaction_id, request.unit_id
            )));
        }

        let mut pdu = vec![0u8; reply.pdu_len()];
        self.stream.read_exact(&mut pdu).await?;
        ModbusPdu::from_slice(&pdu)
    }

    /// Shut the connection down.
    pub async fn close(mut self) -> SunspecResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
