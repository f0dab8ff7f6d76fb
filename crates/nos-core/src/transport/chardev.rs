//! Character-device datagram backend.
//!
//! The kernel driver exposes the chip as a character device carrying one
//! datagram per system call: a write is the 32-bit command word followed by
//! the payload, a read is the command word written first and the payload
//! read back. The driver reports `EAGAIN` while the chip is asleep; waking
//! it is the transport driver's problem, not ours.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

use super::traits::{DatagramDevice, DeviceError};

pub struct CharDevice {
    file: File,
}

impl CharDevice {
    pub fn open(path: &str) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DeviceError::OpenFailed {
                path: path.to_string(),
                source,
            })?;
        Ok(Self { file })
    }

    fn write_raw(&self, buf: &[u8]) -> Result<usize, DeviceError> {
        let n = unsafe {
            libc::write(
                self.file.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            return Err(last_errno());
        }
        Ok(n as usize)
    }

    fn read_raw(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let n = unsafe {
            libc::read(
                self.file.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            return Err(last_errno());
        }
        Ok(n as usize)
    }
}

fn last_errno() -> DeviceError {
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EAGAIN) {
        DeviceError::Again
    } else {
        DeviceError::Io(err)
    }
}

impl DatagramDevice for CharDevice {
    fn read(&self, command: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        let header = command.to_le_bytes();
        let n = self.write_raw(&header)?;
        if n != header.len() {
            return Err(DeviceError::ShortTransfer {
                expected: header.len(),
                actual: n,
            });
        }
        // The device pads short datagrams on the bus; mirror that here so a
        // legacy status read fills the full struct.
        let n = self.read_raw(buf)?;
        buf[n..].fill(0);
        Ok(())
    }

    fn write(&self, command: u32, buf: &[u8]) -> Result<(), DeviceError> {
        let mut datagram = Vec::with_capacity(4 + buf.len());
        datagram.extend_from_slice(&command.to_le_bytes());
        datagram.extend_from_slice(buf);
        let n = self.write_raw(&datagram)?;
        if n != datagram.len() {
            return Err(DeviceError::ShortTransfer {
                expected: datagram.len(),
                actual: n,
            });
        }
        Ok(())
    }
}
