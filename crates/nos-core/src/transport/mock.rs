//! Mock datagram device for testing.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::traits::{DatagramDevice, DeviceError};
use crate::protocol::status::TransportStatus;

/// Mock device for unit testing the transport state machine.
///
/// Reads are served from a scripted queue in order; writes succeed unless a
/// write error has been queued, and are captured for inspection together
/// with their command words.
#[derive(Default)]
pub struct MockDevice {
    read_queue: Mutex<VecDeque<Result<Vec<u8>, DeviceError>>>,
    write_errors: Mutex<VecDeque<DeviceError>>,
    write_log: Mutex<Vec<(u32, Vec<u8>)>>,
    read_log: Mutex<Vec<u32>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes to be returned by the next read.
    pub fn push_read(&self, bytes: impl Into<Vec<u8>>) {
        self.read_queue.lock().unwrap().push_back(Ok(bytes.into()));
    }

    /// Queue an error to be returned by the next read.
    pub fn push_read_error(&self, err: DeviceError) {
        self.read_queue.lock().unwrap().push_back(Err(err));
    }

    /// Queue a status struct, encoded as the device would send it.
    pub fn push_status(&self, status: TransportStatus) {
        self.push_read(status.to_wire());
    }

    /// Queue an error to be returned by the next write.
    pub fn push_write_error(&self, err: DeviceError) {
        self.write_errors.lock().unwrap().push_back(err);
    }

    /// All captured writes, as (command, payload) pairs.
    pub fn writes(&self) -> Vec<(u32, Vec<u8>)> {
        self.write_log.lock().unwrap().clone()
    }

    /// Command words of all observed reads.
    pub fn reads(&self) -> Vec<u32> {
        self.read_log.lock().unwrap().clone()
    }

    /// Scripted reads not yet consumed.
    pub fn remaining_reads(&self) -> usize {
        self.read_queue.lock().unwrap().len()
    }
}

impl DatagramDevice for MockDevice {
    fn read(&self, command: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.read_log.lock().unwrap().push(command);
        let step = self
            .read_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(DeviceError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "mock read queue exhausted",
                )))
            });
        let bytes = step?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        buf[n..].fill(0);
        Ok(())
    }

    fn write(&self, command: u32, buf: &[u8]) -> Result<(), DeviceError> {
        if let Some(err) = self.write_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.write_log.lock().unwrap().push((command, buf.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_served_in_order() {
        let mock = MockDevice::new();
        mock.push_read(vec![1, 2, 3]);
        mock.push_read(vec![4]);

        let mut buf = [0u8; 3];
        mock.read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);

        mock.read(0, &mut buf).unwrap();
        assert_eq!(buf, [4, 0, 0]); // short datagrams pad with zeros

        assert!(mock.read(0, &mut buf).is_err()); // queue exhausted
    }

    #[test]
    fn test_writes_are_captured() {
        let mock = MockDevice::new();
        mock.write(0xabcd_0000, b"hello").unwrap();
        let writes = mock.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, 0xabcd_0000);
        assert_eq!(writes[0].1, b"hello");
    }

    #[test]
    fn test_error_injection() {
        let mock = MockDevice::new();
        mock.push_read_error(DeviceError::Again);
        mock.push_write_error(DeviceError::Again);

        let mut buf = [0u8; 1];
        assert!(matches!(mock.read(0, &mut buf), Err(DeviceError::Again)));
        assert!(matches!(mock.write(0, &[]), Err(DeviceError::Again)));
        // After the scripted errors, writes succeed again.
        assert!(mock.write(0, &[]).is_ok());
    }
}
