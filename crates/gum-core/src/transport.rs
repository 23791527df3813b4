//! Transport contract for the control-unit serial line
//!
//! The control unit exposes its address space through a tiny framed
//! request/response protocol. A transport owns the physical line and turns
//! memory accesses into frames; the driver never sees the framing itself.
//!
//! Besides plain accesses the transport also surfaces unsolicited
//! notifications (the device reports completion of a remote call by echoing
//! a write frame) and raw bytes for the bootloader handshake.

use std::time::Duration;

use crate::error::TransportError;

/// Result type for transport operations
pub type Result<T> = core::result::Result<T, TransportError>;

/// Direction of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read bytes from device memory
    Read,
    /// Write bytes into device memory
    Write,
}

/// A frame received from the device outside of a request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Status byte (1 for a completed write)
    pub status: u8,
    /// Address the notification refers to
    pub address: u32,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Notification {
    /// Create a notification
    pub fn new(status: u8, address: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            address,
            payload: payload.into(),
        }
    }
}

/// Byte-level transport to the control unit
///
/// Every method is a blocking exchange. Implementations are not expected to
/// be internally synchronized; the driver serializes access.
pub trait Transport: Send {
    /// Open the line on `port` at `baud`, closing any previous line first
    fn open(&mut self, port: &str, baud: u32) -> Result<()>;

    /// Close the line
    fn close(&mut self) -> Result<()>;

    /// Perform one memory access
    ///
    /// For [`Direction::Read`] `buffer.len()` bytes are read starting at
    /// `address` and returned. For [`Direction::Write`] `buffer` is written
    /// and the device acknowledgement payload is returned.
    fn access(&mut self, direction: Direction, address: u32, buffer: &[u8]) -> Result<Vec<u8>>;

    /// Wait up to `timeout` for an unsolicited notification
    fn receive(&mut self, timeout: Duration) -> Result<Notification>;

    /// Wait up to `timeout` for a single raw byte
    fn get(&mut self, timeout: Duration) -> Result<u8>;

    /// Reset the device
    fn reset(&mut self) -> Result<()>;

    /// Send raw bytes to the bootloader
    fn send_flash_page(&mut self, data: &[u8]) -> Result<()>;

    /// Limit the payload length of a single write frame
    fn set_max_write_len(&mut self, len: usize);

    /// Baud rates the line can be opened at
    fn supported_baud_rates(&self) -> Vec<u32>;

    /// Read `len` bytes at `address`
    fn read(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.access(Direction::Read, address, &vec![0u8; len])
    }

    /// Write `data` at `address`
    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.access(Direction::Write, address, data).map(|_| ())
    }
}
