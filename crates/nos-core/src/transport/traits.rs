//! Datagram device abstraction.
//!
//! Defines the raw channel the transport driver runs on, allowing different
//! backends (character device, mock, a proxied client).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    /// The chip is asleep; the bus driver asked us to come back later.
    #[error("device not ready")]
    Again,

    #[error("failed to open device {path}: {source}")]
    OpenFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("datagram I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("short datagram: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("device did not wake up after {retries} attempts")]
    WakeTimeout { retries: u32 },
}

/// Raw datagram channel to the device.
///
/// One `read` or `write` maps to exactly one bus datagram accompanied by a
/// 32-bit command word. No framing, CRC or retry is applied at this level.
pub trait DatagramDevice: Send {
    /// Read a single datagram into `buf`.
    fn read(&self, command: u32, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Write a single datagram.
    fn write(&self, command: u32, buf: &[u8]) -> Result<(), DeviceError>;
}
