//! CRC-16 codec matching the device firmware.
//!
//! The device computes the CCITT CRC-16 (polynomial 0x1021, initial value 0,
//! no bit reflection, no output xor) over status, request and reply bytes.
//! Callers CRC non-contiguous fields by continuing from a previous value.

use crc::{Crc, CRC_16_XMODEM};

const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-16 over a byte range, as the device firmware computes it.
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(0, data)
}

/// Continue an existing CRC-16 over a further byte range.
pub fn crc16_update(crc: u16, data: &[u8]) -> u16 {
    let mut digest = CRC_CCITT.digest_with_initial(crc);
    digest.update(data);
    digest.finalize()
}
