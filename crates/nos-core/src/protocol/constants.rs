//! Protocol constants shared with the device firmware.
//!
//! The command-word encoding, status flags and application numbering must
//! stay bit-compatible with Nugget OS; every bit here is observable on the
//! bus.

use std::time::Duration;

// ============================================================================
// Command word
// ============================================================================
//
// A 32-bit command word accompanies every datagram:
//
//   bits 31..24   application id
//   bit  23       read (device -> host)
//   bit  22       transport-level command
//   bit  21       datagram carries data
//   bit  20       more datagrams follow
//   bits 15..0    params (datagram length for data writes,
//                 app-visible params for a "go" write)

pub const CMD_IS_READ: u32 = 0x0080_0000;
pub const CMD_TRANSPORT: u32 = 0x0040_0000;
pub const CMD_IS_DATA: u32 = 0x0020_0000;
pub const CMD_MORE_TO_COME: u32 = 0x0010_0000;

/// Place an application id in the command word.
#[inline]
pub const fn cmd_id(app_id: u8) -> u32 {
    (app_id as u32) << 24
}

/// Place a params value in the command word.
#[inline]
pub const fn cmd_param(param: u16) -> u32 {
    param as u32
}

/// Replace the params field of an existing command word.
#[inline]
pub const fn cmd_set_param(command: u32, param: u16) -> u32 {
    (command & 0xffff_0000) | param as u32
}

// ============================================================================
// Transfer limits and retry budgets
// ============================================================================

/// Max payload per datagram. A constant of the TPM-Wait transport on SPS.
pub const MAX_DEVICE_TRANSFER: usize = 2044;

/// The chip might take up to 100ms to wake up.
pub const RETRY_COUNT: u32 = 25;
pub const RETRY_WAIT: Duration = Duration::from_millis(5);

/// In case of CRC error, try to retransmit.
pub const CRC_RETRY_COUNT: u32 = 3;

// ============================================================================
// Transport status
// ============================================================================

/// First four bytes of a current-protocol status read (`b"STAT"`, read
/// little-endian). A status without it is a legacy device.
pub const TRANSPORT_STATUS_MAGIC: u32 = 0x5441_5453;

pub const TRANSPORT_V1: u8 = 1;

/// The application status lives in the MSB of the status register.
pub const APP_STATUS_IDLE: u32 = 0x0000_0000;
pub const APP_STATUS_DONE: u32 = 0x8000_0000;

/// Strip the status flags, leaving the status code.
#[inline]
pub const fn app_status_code(status: u32) -> u32 {
    status & 0x7fff_ffff
}

// ============================================================================
// Application status codes
// ============================================================================

pub const APP_SUCCESS: u32 = 0;
/// Caller being stupid.
pub const APP_ERROR_BOGUS_ARGS: u32 = 1;
/// Application being stupid.
pub const APP_ERROR_INTERNAL: u32 = 2;
/// Caller sent too much data.
pub const APP_ERROR_TOO_MUCH: u32 = 3;
/// Problem sending or receiving data.
pub const APP_ERROR_IO: u32 = 4;
/// Problem during RPC communication.
pub const APP_ERROR_RPC: u32 = 5;
/// Checksum failed, only used within the protocol.
pub const APP_ERROR_CHECKSUM: u32 = 6;
/// The app is already working on a command.
pub const APP_ERROR_BUSY: u32 = 7;
/// The app took too long to respond.
pub const APP_ERROR_TIMEOUT: u32 = 8;
/// Some required condition is not satisfied.
pub const APP_ERROR_NOT_READY: u32 = 9;

/// Applications define their own error codes from here.
pub const APP_SPECIFIC_ERROR: u32 = 0x20;
/// Firmware line markers for debugging.
pub const APP_LINE_NUMBER_BASE: u32 = 0x7000_0000;
pub const MAX_APP_STATUS: u32 = 0x7fff_ffff;

// ============================================================================
// The Nugget application
// ============================================================================

pub const APP_ID_NUGGET: u8 = 0x00;

/// Return the current build string.
pub const NUGGET_PARAM_VERSION: u16 = 0x0000;
/// Erase and write a single flash block.
pub const NUGGET_PARAM_FLASH_BLOCK: u16 = 0x0001;
/// Reboot the chip (arg byte: 0 = soft, 1 = hard).
pub const NUGGET_PARAM_REBOOT: u16 = 0x0002;
/// Unlock the inactive headers named by the request's bitmask.
pub const NUGGET_PARAM_ENABLE_UPDATE: u16 = 0x0003;
/// Replace the update password.
pub const NUGGET_PARAM_CHANGE_UPDATE_PASSWORD: u16 = 0x0004;
/// Full flash erase, guarded by a 32-bit confirmation code.
pub const NUGGET_PARAM_NUKE_FROM_ORBIT: u16 = 0x0005;

/// The targeted slot is the active one and not writable.
pub const NUGGET_ERROR_LOCKED: u32 = APP_SPECIFIC_ERROR;
/// Transient flash-write condition; try the block again.
pub const NUGGET_ERROR_RETRY: u32 = APP_SPECIFIC_ERROR + 1;

pub const NUGGET_UPDATE_PASSWORD_LEN: usize = 32;

pub const NUGGET_ENABLE_HEADER_RO: u8 = 0x01;
pub const NUGGET_ENABLE_HEADER_RW: u8 = 0x02;
