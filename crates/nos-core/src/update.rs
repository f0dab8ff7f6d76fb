//! Firmware-update application driver.
//!
//! Streams fixed-size flash banks to the device's update app, each carrying
//! a digest the device recomputes before committing the write. The device
//! enforces the A/B invariant itself: writing the active slot earns a
//! `LOCKED` and the host falls back to the other copy. The first SHA-1 word
//! is not cryptographic strength; it only catches accidental corruption and
//! must stay as-is for device compatibility.

use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::client::AppClient;
use crate::image::{FirmwareImage, ImageError, CHIP_FLASH_BANK_SIZE, CHIP_FLASH_BASE};
use crate::protocol::constants::*;

/// Reply capacity handed to the version query.
pub const VERSION_REPLY_CAPACITY: usize = 512;

/// Extra attempts for a flash block the device reported as transient.
const FLASH_BLOCK_RETRIES: u32 = 3;

/// First word of SHA-1 over (offset, payload), as the device recomputes it.
fn block_digest(offset: u32, payload: &[u8]) -> u32 {
    let mut hasher = Sha1::new();
    hasher.update(offset.to_le_bytes());
    hasher.update(payload);
    let digest = hasher.finalize();
    let mut word = [0u8; 4];
    word.copy_from_slice(&digest[..4]);
    u32::from_le_bytes(word)
}

/// Serialize one flash-block request: digest, offset, payload, packed.
fn flash_block(offset: u32, payload: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(8 + payload.len());
    block.extend_from_slice(&block_digest(offset, payload).to_le_bytes());
    block.extend_from_slice(&offset.to_le_bytes());
    block.extend_from_slice(payload);
    block
}

/// Stream one slot's banks to the update app.
///
/// `RETRY` is transient and worth a handful of fresh calls for the same
/// block; anything else (`LOCKED` included) ends the slot.
pub fn try_update(
    app: &mut AppClient<'_>,
    image: &FirmwareImage,
    offset: u32,
    image_size: u32,
) -> u32 {
    let stop = offset + image_size;
    info!(
        from = %format!("{:#07x}", CHIP_FLASH_BASE + offset),
        to = %format!("{:#07x}", CHIP_FLASH_BASE + stop),
        size = %format!("{image_size:#07x}"),
        "updating image"
    );

    let mut rv = APP_SUCCESS;
    let mut cur = offset;
    while cur < stop {
        let start = cur as usize;
        let block = flash_block(cur, &image.as_bytes()[start..start + CHIP_FLASH_BANK_SIZE]);

        info!(
            block = %format!("{:#07x}", CHIP_FLASH_BASE + cur),
            end = %format!("{:#07x}", CHIP_FLASH_BASE + stop),
            "writing"
        );
        let mut retries = FLASH_BLOCK_RETRIES;
        rv = loop {
            let code = app.call(NUGGET_PARAM_FLASH_BLOCK, &block, &mut Vec::new());
            if code != NUGGET_ERROR_RETRY || retries == 0 {
                break code;
            }
            retries -= 1;
            info!("retrying");
        };

        if rv != APP_SUCCESS {
            warn!(
                block = %format!("{:#07x}", CHIP_FLASH_BASE + cur),
                code = %format!("{rv:#x}"),
                "flash block failed"
            );
            break;
        }
        cur += CHIP_FLASH_BANK_SIZE as u32;
    }

    rv
}

/// Update one stage. Slot A is attempted first; if the device refuses it
/// (typically `LOCKED`, because A is the active copy) the same stage is
/// written to slot B and that outcome is final.
pub fn do_update(
    app: &mut AppClient<'_>,
    image: &FirmwareImage,
    offset_a: u32,
    offset_b: u32,
) -> Result<u32, ImageError> {
    let header = image.signed_header(offset_a)?;
    let size_a = image.slot_image_size(offset_a)?;
    info!(
        epoch = header.epoch,
        major = header.major,
        minor = header.minor,
        "slot A header"
    );
    let rv_a = try_update(app, image, offset_a, size_a);
    if rv_a == APP_SUCCESS {
        return Ok(rv_a);
    }

    let size_b = image.slot_image_size(offset_b)?;
    Ok(try_update(app, image, offset_b, size_b))
}

/// Password with its hash-prefix digest, as the update app expects it.
///
/// Unused bytes stay `0xff` and the digest covers the whole padded field,
/// so the empty password is itself a well-defined value.
pub struct PasswordDigest {
    password: [u8; NUGGET_UPDATE_PASSWORD_LEN],
    digest: u32,
}

impl PasswordDigest {
    pub const WIRE_SIZE: usize = NUGGET_UPDATE_PASSWORD_LEN + 4;

    pub fn new(password: &str) -> Self {
        let mut field = [0xffu8; NUGGET_UPDATE_PASSWORD_LEN];
        let bytes = password.as_bytes();
        let n = bytes.len().min(NUGGET_UPDATE_PASSWORD_LEN);
        field[..n].copy_from_slice(&bytes[..n]);

        let mut hasher = Sha1::new();
        hasher.update(field);
        let digest = hasher.finalize();
        let mut word = [0u8; 4];
        word.copy_from_slice(&digest[..4]);

        Self {
            password: field,
            digest: u32::from_le_bytes(word),
        }
    }

    pub fn to_wire(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[..NUGGET_UPDATE_PASSWORD_LEN].copy_from_slice(&self.password);
        buf[NUGGET_UPDATE_PASSWORD_LEN..].copy_from_slice(&self.digest.to_le_bytes());
        buf
    }
}

/// Replace the update password. Empty strings are allowed on either side;
/// an empty new password clears it.
pub fn do_change_pw(app: &mut AppClient<'_>, old_pw: &str, new_pw: &str) -> u32 {
    let mut request = Vec::with_capacity(2 * PasswordDigest::WIRE_SIZE);
    request.extend_from_slice(&PasswordDigest::new(old_pw).to_wire());
    request.extend_from_slice(&PasswordDigest::new(new_pw).to_wire());
    app.call(NUGGET_PARAM_CHANGE_UPDATE_PASSWORD, &request, &mut Vec::new())
}

/// Point the chip at the freshly written headers named by the bitmask.
pub fn do_enable(app: &mut AppClient<'_>, password: &str, which_headers: u8) -> u32 {
    let mut request = Vec::with_capacity(PasswordDigest::WIRE_SIZE + 1);
    request.extend_from_slice(&PasswordDigest::new(password).to_wire());
    request.push(which_headers);
    app.call(NUGGET_PARAM_ENABLE_UPDATE, &request, &mut Vec::new())
}

/// Query the running build string.
pub fn do_version(app: &mut AppClient<'_>) -> (u32, String) {
    let mut buffer = Vec::with_capacity(VERSION_REPLY_CAPACITY);
    let code = app.call(NUGGET_PARAM_VERSION, &[], &mut buffer);
    let text = String::from_utf8_lossy(&buffer)
        .trim_end_matches('\0')
        .to_string();
    (code, text)
}

/// Ask the chip to reboot.
pub fn do_reboot(app: &mut AppClient<'_>, hard: bool) -> u32 {
    app.call(NUGGET_PARAM_REBOOT, &[hard as u8], &mut Vec::new())
}

/// Full flash erase, guarded by the caller-supplied confirmation code.
pub fn do_erase(app: &mut AppClient<'_>, code: u32) -> u32 {
    app.call(
        NUGGET_PARAM_NUKE_FROM_ORBIT,
        &code.to_le_bytes(),
        &mut Vec::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClient;
    use crate::image::{CHIP_FLASH_SIZE, CHIP_RW_A_MEM_OFF, CHIP_RW_B_MEM_OFF};

    const BANK: usize = CHIP_FLASH_BANK_SIZE;

    /// A full-size image with patterned slot contents and valid headers at
    /// the RW offsets, each announcing `banks` banks to transfer.
    fn patterned_image(banks: u32) -> FirmwareImage {
        let mut data: Vec<u8> = (0..CHIP_FLASH_SIZE).map(|i| (i % 251) as u8).collect();
        for off in [CHIP_RW_A_MEM_OFF, CHIP_RW_B_MEM_OFF] {
            let start = off as usize;
            data[start + 4..start + 8]
                .copy_from_slice(&(banks * BANK as u32).to_le_bytes());
        }
        FirmwareImage::from_bytes(data).unwrap()
    }

    fn parse_block(request: &[u8]) -> (u32, u32, &[u8]) {
        let digest = u32::from_le_bytes(request[0..4].try_into().unwrap());
        let offset = u32::from_le_bytes(request[4..8].try_into().unwrap());
        (digest, offset, &request[8..])
    }

    #[test]
    fn test_blocks_carry_their_digest() {
        let image = patterned_image(2);
        let mut mock = MockClient::new();
        let rv = try_update(
            &mut AppClient::new(&mut mock, APP_ID_NUGGET),
            &image,
            CHIP_RW_A_MEM_OFF,
            2 * BANK as u32,
        );
        assert_eq!(rv, APP_SUCCESS);

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        for (i, (_, params, request)) in calls.iter().enumerate() {
            assert_eq!(*params, NUGGET_PARAM_FLASH_BLOCK);
            assert_eq!(request.len(), 8 + BANK);

            let (digest, offset, payload) = parse_block(request);
            let expected_offset = CHIP_RW_A_MEM_OFF + (i * BANK) as u32;
            assert_eq!(offset, expected_offset);
            assert_eq!(
                payload,
                &image.as_bytes()[offset as usize..offset as usize + BANK]
            );
            assert_eq!(digest, block_digest(offset, payload));
        }
    }

    #[test]
    fn test_digest_depends_on_offset_and_payload() {
        let payload = vec![0xa5u8; BANK];
        let base = block_digest(0, &payload);
        assert_ne!(base, block_digest(BANK as u32, &payload));

        let mut flipped = payload.clone();
        flipped[17] ^= 0x01;
        assert_ne!(base, block_digest(0, &flipped));
    }

    #[test]
    fn test_transient_retry_issues_a_fresh_call() {
        let image = patterned_image(2);
        let mut mock = MockClient::new();
        mock.push_response(NUGGET_ERROR_RETRY, &[]);

        let rv = try_update(
            &mut AppClient::new(&mut mock, APP_ID_NUGGET),
            &image,
            CHIP_RW_A_MEM_OFF,
            2 * BANK as u32,
        );
        assert_eq!(rv, APP_SUCCESS);

        // Exactly two calls for the first block, identical bytes, then the
        // second block proceeds.
        let calls = mock.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].2, calls[1].2);
        assert_ne!(calls[1].2, calls[2].2);
    }

    #[test]
    fn test_retry_budget_is_exhausted_after_four_calls() {
        let image = patterned_image(2);
        let mut mock = MockClient::new();
        for _ in 0..4 {
            mock.push_response(NUGGET_ERROR_RETRY, &[]);
        }

        let rv = try_update(
            &mut AppClient::new(&mut mock, APP_ID_NUGGET),
            &image,
            CHIP_RW_A_MEM_OFF,
            2 * BANK as u32,
        );
        assert_eq!(rv, NUGGET_ERROR_RETRY);
        assert_eq!(mock.calls().len(), 4);
    }

    #[test]
    fn test_locked_slot_stops_immediately() {
        let image = patterned_image(4);
        let mut mock = MockClient::new();
        mock.push_response(NUGGET_ERROR_LOCKED, &[]);

        let rv = try_update(
            &mut AppClient::new(&mut mock, APP_ID_NUGGET),
            &image,
            CHIP_RW_A_MEM_OFF,
            4 * BANK as u32,
        );
        assert_eq!(rv, NUGGET_ERROR_LOCKED);
        assert_eq!(mock.calls().len(), 1);
    }

    #[test]
    fn test_locked_a_falls_back_to_b() {
        let image = patterned_image(2);
        let mut mock = MockClient::new();
        mock.push_response(NUGGET_ERROR_LOCKED, &[]);

        let rv = do_update(
            &mut AppClient::new(&mut mock, APP_ID_NUGGET),
            &image,
            CHIP_RW_A_MEM_OFF,
            CHIP_RW_B_MEM_OFF,
        )
        .unwrap();
        assert_eq!(rv, APP_SUCCESS);

        // One refused call against A, then both banks of B.
        let calls = mock.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(parse_block(&calls[0].2).1, CHIP_RW_A_MEM_OFF);
        assert_eq!(parse_block(&calls[1].2).1, CHIP_RW_B_MEM_OFF);
        assert_eq!(parse_block(&calls[2].2).1, CHIP_RW_B_MEM_OFF + BANK as u32);
    }

    #[test]
    fn test_successful_a_never_touches_b() {
        let image = patterned_image(2);
        let mut mock = MockClient::new();

        let rv = do_update(
            &mut AppClient::new(&mut mock, APP_ID_NUGGET),
            &image,
            CHIP_RW_A_MEM_OFF,
            CHIP_RW_B_MEM_OFF,
        )
        .unwrap();
        assert_eq!(rv, APP_SUCCESS);

        for (_, _, request) in mock.calls() {
            let (_, offset, _) = parse_block(request);
            assert!(offset < CHIP_RW_B_MEM_OFF);
        }
    }

    #[test]
    fn test_password_field_is_padded_and_digested() {
        let pw = PasswordDigest::new("hunter2");
        let wire = pw.to_wire();
        assert_eq!(wire.len(), PasswordDigest::WIRE_SIZE);
        assert_eq!(&wire[..7], &b"hunter2"[..]);
        assert!(wire[7..NUGGET_UPDATE_PASSWORD_LEN].iter().all(|&b| b == 0xff));

        // The digest covers the padded field, not just the string.
        let mut hasher = Sha1::new();
        hasher.update(&wire[..NUGGET_UPDATE_PASSWORD_LEN]);
        let digest = hasher.finalize();
        assert_eq!(&wire[NUGGET_UPDATE_PASSWORD_LEN..], &digest[..4]);
    }

    #[test]
    fn test_empty_password_is_well_defined() {
        let empty = PasswordDigest::new("");
        let wire = empty.to_wire();
        assert!(wire[..NUGGET_UPDATE_PASSWORD_LEN].iter().all(|&b| b == 0xff));
        assert_ne!(wire, PasswordDigest::new("x").to_wire());
    }

    #[test]
    fn test_change_pw_request_layout() {
        let mut mock = MockClient::new();
        let code = do_change_pw(
            &mut AppClient::new(&mut mock, APP_ID_NUGGET),
            "old",
            "new",
        );
        assert_eq!(code, APP_SUCCESS);

        let calls = mock.calls();
        assert_eq!(calls[0].1, NUGGET_PARAM_CHANGE_UPDATE_PASSWORD);
        let request = &calls[0].2;
        assert_eq!(request.len(), 2 * PasswordDigest::WIRE_SIZE);
        assert_eq!(
            &request[..PasswordDigest::WIRE_SIZE],
            &PasswordDigest::new("old").to_wire()[..]
        );
        assert_eq!(
            &request[PasswordDigest::WIRE_SIZE..],
            &PasswordDigest::new("new").to_wire()[..]
        );
    }

    #[test]
    fn test_enable_request_carries_header_mask() {
        let mut mock = MockClient::new();
        do_enable(
            &mut AppClient::new(&mut mock, APP_ID_NUGGET),
            "",
            NUGGET_ENABLE_HEADER_RO | NUGGET_ENABLE_HEADER_RW,
        );

        let calls = mock.calls();
        assert_eq!(calls[0].1, NUGGET_PARAM_ENABLE_UPDATE);
        let request = &calls[0].2;
        assert_eq!(request.len(), PasswordDigest::WIRE_SIZE + 1);
        assert_eq!(request[PasswordDigest::WIRE_SIZE], 0x03);
    }

    #[test]
    fn test_version_trims_trailing_nul() {
        let mut mock = MockClient::new();
        mock.push_response(APP_SUCCESS, b"citadel_v1.2.3\0");

        let (code, text) = do_version(&mut AppClient::new(&mut mock, APP_ID_NUGGET));
        assert_eq!(code, APP_SUCCESS);
        assert_eq!(text, "citadel_v1.2.3");
        assert_eq!(mock.calls()[0].1, NUGGET_PARAM_VERSION);
        assert!(mock.calls()[0].2.is_empty());
    }

    #[test]
    fn test_reboot_and_erase_payloads() {
        let mut mock = MockClient::new();
        do_reboot(&mut AppClient::new(&mut mock, APP_ID_NUGGET), false);
        do_reboot(&mut AppClient::new(&mut mock, APP_ID_NUGGET), true);
        do_erase(&mut AppClient::new(&mut mock, APP_ID_NUGGET), 0xdead_beef);

        let calls = mock.calls();
        assert_eq!(calls[0].1, NUGGET_PARAM_REBOOT);
        assert_eq!(calls[0].2, vec![0]);
        assert_eq!(calls[1].2, vec![1]);
        assert_eq!(calls[2].1, NUGGET_PARAM_NUKE_FROM_ORBIT);
        assert_eq!(calls[2].2, vec![0xef, 0xbe, 0xad, 0xde]);
    }
}
