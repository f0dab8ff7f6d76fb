//! Firmware image model and chip flash layout.
//!
//! The image file is a byte-exact dump of device flash holding all four
//! firmware components at their final offsets. The flash is implemented in
//! two halves; the boot ROM picks the newer valid first-stage bootloader
//! ("RO") from the front of either half, which in turn picks an application
//! image ("RW"). Only the inactive copy of each stage is writable.

use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

pub const CHIP_FLASH_BASE: u32 = 0x0004_0000;
pub const CHIP_FLASH_SIZE: usize = 512 * 1024;
/// Flash erase/write unit; one block message per bank.
pub const CHIP_FLASH_BANK_SIZE: usize = 2048;

// RO sits at the front of each flash half and reserves 16K; RW follows.
pub const CHIP_RO_A_MEM_OFF: u32 = 0x0000_0000;
pub const CHIP_RW_A_MEM_OFF: u32 = 0x0000_4000;
pub const CHIP_RO_B_MEM_OFF: u32 = 0x0004_0000;
pub const CHIP_RW_B_MEM_OFF: u32 = 0x0004_4000;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("can't open image file {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("the firmware image must be exactly {expected} bytes, got {actual}")]
    WrongSize { expected: usize, actual: usize },
    #[error("slot offset {offset:#x} has no room for a header")]
    HeaderOutOfRange { offset: u32 },
    #[error("slot at {offset:#x}: image size {size:#x} is not bank-aligned")]
    UnalignedImage { offset: u32, size: u32 },
    #[error("slot at {offset:#x}: image size {size:#x} overruns the flash")]
    ImageOverrun { offset: u32, size: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Signed slot header. Only `image_size` matters to the updater; the
/// version triple identifies the build for operators.
#[derive(Debug, Clone, Copy)]
pub struct SignedHeader {
    pub magic: u32,
    pub image_size: u32,
    pub epoch: u32,
    pub major: u32,
    pub minor: u32,
}

impl SignedHeader {
    pub const WIRE_SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        let mut cursor = Cursor::new(data);
        Ok(Self {
            magic: cursor.read_u32::<LittleEndian>()?,
            image_size: cursor.read_u32::<LittleEndian>()?,
            epoch: cursor.read_u32::<LittleEndian>()?,
            major: cursor.read_u32::<LittleEndian>()?,
            minor: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// In-memory firmware image, validated to be a full flash dump.
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Read the image file, rejecting anything that is not byte-exact.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ImageError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        if data.len() != CHIP_FLASH_SIZE {
            return Err(ImageError::WrongSize {
                expected: CHIP_FLASH_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self { data })
    }

    /// The signed header at the front of a slot region.
    pub fn signed_header(&self, offset: u32) -> Result<SignedHeader, ImageError> {
        let start = offset as usize;
        if start + SignedHeader::WIRE_SIZE > self.data.len() {
            return Err(ImageError::HeaderOutOfRange { offset });
        }
        SignedHeader::from_bytes(&self.data[start..])
    }

    /// The number of bytes to transfer for the slot at `offset`, validated
    /// against the bank granularity and the flash bounds.
    pub fn slot_image_size(&self, offset: u32) -> Result<u32, ImageError> {
        let size = self.signed_header(offset)?.image_size;
        if size as usize % CHIP_FLASH_BANK_SIZE != 0 {
            return Err(ImageError::UnalignedImage { offset, size });
        }
        if offset as usize + size as usize > self.data.len() {
            return Err(ImageError::ImageOverrun { offset, size });
        }
        Ok(size)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
