//! Transport status and command-info codecs.
//!
//! The status struct exists in two wire generations. Legacy devices report
//! `{status, reply_len}` with no integrity protection; current (V1) devices
//! prefix a magic and version and CRC the whole struct. A status read always
//! transfers the V1 size and the magic decides how to interpret the bytes.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use super::constants::{TRANSPORT_STATUS_MAGIC, TRANSPORT_V1};
use super::crc16::{crc16, crc16_update};

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("status buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("status CRC mismatch: theirs={theirs:#06x} ours={ours:#06x}")]
    CrcMismatch { theirs: u16, ours: u16 },
    #[error("unrecognised transport version: {0}")]
    UnknownVersion(u8),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Device status, normalized across protocol generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// Pre-V1 wire format: no magic, no CRCs.
    Legacy { status: u32, reply_len: u16 },
    /// Current wire format. `reply_crc` covers the reply bytes the app
    /// produced; the struct's own CRC is checked during decode.
    V1 {
        status: u32,
        reply_len: u16,
        reply_crc: u16,
    },
}

impl TransportStatus {
    /// Bytes transferred by one status read (the packed V1 struct).
    pub const WIRE_SIZE: usize = 15;

    /// Offset of the struct CRC within the V1 layout.
    const CRC_OFFSET: usize = 13;

    pub fn status(&self) -> u32 {
        match *self {
            TransportStatus::Legacy { status, .. } => status,
            TransportStatus::V1 { status, .. } => status,
        }
    }

    pub fn reply_len(&self) -> u16 {
        match *self {
            TransportStatus::Legacy { reply_len, .. } => reply_len,
            TransportStatus::V1 { reply_len, .. } => reply_len,
        }
    }

    /// Reply CRC, absent on the legacy protocol.
    pub fn reply_crc(&self) -> Option<u16> {
        match *self {
            TransportStatus::Legacy { .. } => None,
            TransportStatus::V1 { reply_crc, .. } => Some(reply_crc),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, TransportStatus::Legacy { .. })
    }

    /// Decode a raw status read.
    ///
    /// A missing magic selects the legacy layout. For V1 the version must be
    /// recognised and the CRC (computed with its own field zeroed) must
    /// match; a `CrcMismatch` is worth a re-read, the rest are terminal.
    pub fn from_wire(raw: &[u8]) -> Result<Self, StatusError> {
        if raw.len() < Self::WIRE_SIZE {
            return Err(StatusError::BufferTooSmall {
                expected: Self::WIRE_SIZE,
                actual: raw.len(),
            });
        }

        let mut cursor = Cursor::new(raw);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != TRANSPORT_STATUS_MAGIC {
            let mut cursor = Cursor::new(raw);
            return Ok(TransportStatus::Legacy {
                status: cursor.read_u32::<LittleEndian>()?,
                reply_len: cursor.read_u16::<LittleEndian>()?,
            });
        }

        let version = cursor.read_u8()?;
        if version != TRANSPORT_V1 {
            return Err(StatusError::UnknownVersion(version));
        }

        let status = cursor.read_u32::<LittleEndian>()?;
        let reply_len = cursor.read_u16::<LittleEndian>()?;
        let reply_crc = cursor.read_u16::<LittleEndian>()?;
        let their_crc = cursor.read_u16::<LittleEndian>()?;

        let mut zeroed = [0u8; Self::WIRE_SIZE];
        zeroed.copy_from_slice(&raw[..Self::WIRE_SIZE]);
        zeroed[Self::CRC_OFFSET..].fill(0);
        let our_crc = crc16(&zeroed);
        if their_crc != our_crc {
            return Err(StatusError::CrcMismatch {
                theirs: their_crc,
                ours: our_crc,
            });
        }

        Ok(TransportStatus::V1 {
            status,
            reply_len,
            reply_crc,
        })
    }

    /// Encode as the device would put it on the wire. Legacy statuses pad
    /// their 6 significant bytes to the full read size.
    pub fn to_wire(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        match *self {
            TransportStatus::Legacy { status, reply_len } => {
                buf[0..4].copy_from_slice(&status.to_le_bytes());
                buf[4..6].copy_from_slice(&reply_len.to_le_bytes());
            }
            TransportStatus::V1 {
                status,
                reply_len,
                reply_crc,
            } => {
                buf[0..4].copy_from_slice(&TRANSPORT_STATUS_MAGIC.to_le_bytes());
                buf[4] = TRANSPORT_V1;
                buf[5..9].copy_from_slice(&status.to_le_bytes());
                buf[9..11].copy_from_slice(&reply_len.to_le_bytes());
                buf[11..13].copy_from_slice(&reply_crc.to_le_bytes());
                let crc = crc16(&buf);
                buf[Self::CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
            }
        }
        buf
    }
}

/// Trailer sent with the "go" datagram. Legacy devices ignore the body; V1
/// devices validate the CRC before running the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCommandInfo {
    pub reply_len_hint: u16,
    pub crc: u16,
}

impl TransportCommandInfo {
    pub const WIRE_SIZE: usize = 5;

    /// Build the trailer for a request. The CRC covers, in order: the 16-bit
    /// arg length, the args, the 16-bit reply-length hint and the 32-bit go
    /// command.
    pub fn for_request(args: &[u8], reply_len_hint: u16, go_command: u32) -> Self {
        let arg_len = args.len() as u16;
        let mut crc = crc16(&arg_len.to_le_bytes());
        crc = crc16_update(crc, args);
        crc = crc16_update(crc, &reply_len_hint.to_le_bytes());
        crc = crc16_update(crc, &go_command.to_le_bytes());
        Self {
            reply_len_hint,
            crc,
        }
    }

    pub fn to_wire(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0] = TRANSPORT_V1;
        buf[1..3].copy_from_slice(&self.reply_len_hint.to_le_bytes());
        buf[3..5].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }
}
