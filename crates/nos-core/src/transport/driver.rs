//! Transport protocol driver.
//!
//! Drives one application call over the datagram channel:
//!
//! ```text
//! [idle?] -> send-args* -> send-go -> poll-done* -> receive-reply* -> clear
//! ```
//!
//! Three retry scopes are deliberately kept distinct: bus `EAGAIN` while the
//! chip wakes (25 reads, 5ms apart), status-struct CRC re-reads (3) and
//! request/reply CRC retransmits (3). The done-poll itself has no host-side
//! bound; the device watchdog is authoritative there.

use std::thread;

use tracing::{debug, error, warn};

use super::traits::{DatagramDevice, DeviceError};
use crate::protocol::constants::*;
use crate::protocol::crc16::crc16_update;
use crate::protocol::status::{StatusError, TransportCommandInfo, TransportStatus};

/// Read a datagram, waiting out `EAGAIN` while the chip wakes up.
pub(crate) fn device_read(
    dev: &dyn DatagramDevice,
    command: u32,
    buf: &mut [u8],
) -> Result<(), DeviceError> {
    for _ in 0..RETRY_COUNT {
        match dev.read(command, buf) {
            Err(DeviceError::Again) => thread::sleep(RETRY_WAIT),
            Err(err) => {
                error!(%err, "failed to read");
                return Err(err);
            }
            Ok(()) => return Ok(()),
        }
    }
    Err(DeviceError::WakeTimeout {
        retries: RETRY_COUNT,
    })
}

/// Write a datagram, waiting out `EAGAIN` while the chip wakes up.
pub(crate) fn device_write(
    dev: &dyn DatagramDevice,
    command: u32,
    buf: &[u8],
) -> Result<(), DeviceError> {
    for _ in 0..RETRY_COUNT {
        match dev.write(command, buf) {
            Err(DeviceError::Again) => thread::sleep(RETRY_WAIT),
            Err(err) => {
                error!(%err, "failed to write");
                return Err(err);
            }
            Ok(()) => return Ok(()),
        }
    }
    Err(DeviceError::WakeTimeout {
        retries: RETRY_COUNT,
    })
}

enum GetStatusError {
    Io,
    Protocol,
}

/// Read and decode the status, re-reading on CRC mismatch.
fn get_status(dev: &dyn DatagramDevice, app_id: u8) -> Result<TransportStatus, GetStatusError> {
    let command = cmd_id(app_id) | CMD_IS_READ | CMD_TRANSPORT;
    for _ in 0..CRC_RETRY_COUNT {
        let mut raw = [0u8; TransportStatus::WIRE_SIZE];
        if device_read(dev, command, &mut raw).is_err() {
            error!("failed to read device status");
            return Err(GetStatusError::Io);
        }

        match TransportStatus::from_wire(&raw) {
            Ok(status) => return Ok(status),
            Err(StatusError::CrcMismatch { theirs, ours }) => {
                warn!(
                    theirs = %format!("{theirs:#06x}"),
                    ours = %format!("{ours:#06x}"),
                    "status CRC mismatch"
                );
            }
            Err(err) => {
                error!(%err, "bad status from device");
                return Err(GetStatusError::Protocol);
            }
        }
    }

    error!("unable to get valid checksum on status");
    Err(GetStatusError::Protocol)
}

/// Tell the app to drop whatever state it holds and go idle.
fn clear_status(dev: &dyn DatagramDevice, app_id: u8) -> Result<(), DeviceError> {
    let command = cmd_id(app_id) | CMD_TRANSPORT;
    device_write(dev, command, &[])
}

/// Ensure the app is idle and ready to handle a transaction.
fn make_ready(dev: &dyn DatagramDevice, app_id: u8) -> u32 {
    match get_status(dev, app_id) {
        Ok(status) => {
            debug!(
                status = %format!("{:#010x}", status.status()),
                reply_len = status.reply_len(),
                legacy = status.is_legacy(),
                "inspection"
            );
            if status.status() == APP_STATUS_IDLE {
                return APP_SUCCESS;
            }
            // Not idle; fall through and clear whatever is left over.
        }
        Err(GetStatusError::Protocol) => {
            // A clear may still bring the device back to its senses.
        }
        Err(GetStatusError::Io) => {
            error!("failed to inspect device");
            return APP_ERROR_IO;
        }
    }

    debug!("clearing previous status");
    if clear_status(dev, app_id).is_err() {
        error!("failed to force idle status");
        return APP_ERROR_IO;
    }

    match get_status(dev, app_id) {
        Ok(status) if status.status() == APP_STATUS_IDLE => APP_SUCCESS,
        Ok(_) => {
            // It's ignoring us and is still not ready, so it's broken.
            error!("device is not responding");
            APP_ERROR_IO
        }
        Err(_) => {
            error!("failed to get cleared status");
            APP_ERROR_IO
        }
    }
}

/// Split the args into datagrams and send the go command.
fn send_command(
    dev: &dyn DatagramDevice,
    app_id: u8,
    params: u16,
    args: &[u8],
    reply_len_hint: u16,
) -> u32 {
    debug!(len = args.len(), "send command data");

    let mut command = cmd_id(app_id) | CMD_IS_DATA | CMD_TRANSPORT;
    let mut rest = args;
    loop {
        // The device can't accept more than MAX_DEVICE_TRANSFER per datagram
        // and requires the length of each write in the params field. An
        // empty request still gets one zero-length datagram.
        let ulen = rest.len().min(MAX_DEVICE_TRANSFER);
        command = cmd_set_param(command, ulen as u16);

        debug!(command = %format!("{command:#010x}"), bytes = ulen, "write datagram");
        if device_write(dev, command, &rest[..ulen]).is_err() {
            error!("failed to send datagram to device");
            return APP_ERROR_IO;
        }

        // Any further writes needed to send all the args set the MORE bit.
        command |= CMD_MORE_TO_COME;
        rest = &rest[ulen..];
        if rest.is_empty() {
            break;
        }
    }

    let command = cmd_id(app_id) | cmd_param(params);
    let info = TransportCommandInfo::for_request(args, reply_len_hint, command);

    debug!(
        command = %format!("{command:#010x}"),
        crc = %format!("{:#06x}", info.crc),
        "write go command"
    );
    if device_write(dev, command, &info.to_wire()).is_err() {
        error!("failed to send command datagram to device");
        return APP_ERROR_IO;
    }

    APP_SUCCESS
}

/// Poll the status until the app reports done.
///
/// There is intentionally no host-side bound here; the device watchdog
/// limits how long an app can run.
fn poll_until_done(dev: &dyn DatagramDevice, app_id: u8) -> Result<TransportStatus, u32> {
    debug!("poll the app status until it's done");
    let mut poll_count = 0u32;
    loop {
        let status = get_status(dev, app_id).map_err(|_| APP_ERROR_IO)?;
        poll_count += 1;
        debug!(
            poll_count,
            status = %format!("{:#010x}", status.status()),
            reply_len = status.reply_len(),
            "polled"
        );
        if status.status() & APP_STATUS_DONE != 0 {
            return Ok(status);
        }
    }
}

/// Reconstruct the reply from the datagram stream.
fn receive_reply(
    dev: &dyn DatagramDevice,
    app_id: u8,
    status: &TransportStatus,
    reply: &mut [u8],
    requested: u32,
) -> Result<u32, u32> {
    for _ in 0..CRC_RETRY_COUNT {
        debug!(reply_len = status.reply_len(), "read the reply data");

        let mut command = cmd_id(app_id) | CMD_IS_READ | CMD_TRANSPORT | CMD_IS_DATA;
        let mut left = (requested as usize).min(status.reply_len() as usize);
        let mut got = 0usize;
        let mut crc: u16 = 0;
        while left > 0 {
            // We can't read more per datagram than the device can send.
            let gimme = left.min(MAX_DEVICE_TRANSFER);
            debug!(command = %format!("{command:#010x}"), bytes = gimme, "read datagram");
            let chunk = &mut reply[got..got + gimme];
            if device_read(dev, command, chunk).is_err() {
                error!("failed to receive datagram from device");
                return Err(APP_ERROR_IO);
            }

            // Any further reads set the MORE bit. That only works when the
            // device sends CRCs back, but that's the only time we'd retry.
            command |= CMD_MORE_TO_COME;
            crc = crc16_update(crc, chunk);
            got += gimme;
            left -= gimme;
        }

        match status.reply_crc() {
            // Legacy protocol doesn't support CRC so hopefully it's ok.
            None => return Ok(got as u32),
            Some(theirs) if theirs == crc => return Ok(got as u32),
            Some(theirs) => {
                warn!(
                    theirs = %format!("{theirs:#06x}"),
                    ours = %format!("{crc:#06x}"),
                    "reply CRC mismatch"
                );
            }
        }
    }

    error!("unable to get valid checksum on reply data");
    Err(APP_ERROR_IO)
}

/// Drive one full application call.
///
/// `reply_len` carries the requested reply size in and the received size
/// out. The return value is the device-produced status code; host-induced
/// failures surface as `APP_ERROR_IO`.
pub fn call_application(
    dev: &dyn DatagramDevice,
    app_id: u8,
    params: u16,
    args: &[u8],
    reply: &mut [u8],
    reply_len: &mut u32,
) -> u32 {
    if *reply_len as usize > reply.len() {
        error!("reply buffer smaller than requested reply length");
        *reply_len = 0;
        return APP_ERROR_IO;
    }
    if args.len() > u16::MAX as usize {
        // The wire carries the arg length as 16 bits; anything bigger could
        // only be mangled in transit.
        *reply_len = 0;
        return APP_ERROR_TOO_MUCH;
    }

    debug!(app_id, params = %format!("{params:#06x}"), "calling app");
    let reply_len_hint = *reply_len as u16;

    let mut retries = CRC_RETRY_COUNT;
    let status = loop {
        // Wake up and wait for the chip to be ready.
        let res = make_ready(dev, app_id);
        if res != APP_SUCCESS {
            *reply_len = 0;
            return res;
        }

        // Tell the app what to do.
        let res = send_command(dev, app_id, params, args, reply_len_hint);
        if res != APP_SUCCESS {
            *reply_len = 0;
            return res;
        }

        // Wait until the app has finished.
        match poll_until_done(dev, app_id) {
            Ok(status) => {
                let code = app_status_code(status.status());
                if code == APP_SUCCESS {
                    break status;
                }
                if code != APP_ERROR_CHECKSUM {
                    *reply_len = 0;
                    return code;
                }
                // The device saw a mangled request; run the whole
                // transaction again.
                retries -= 1;
                debug!(retries, "request checksum error");
                if retries == 0 {
                    *reply_len = 0;
                    return APP_ERROR_IO;
                }
            }
            Err(code) => {
                *reply_len = 0;
                return code;
            }
        }
    };

    // Get the reply, but only if the app produced data and the caller wants
    // it.
    let mut got = 0u32;
    if *reply_len > 0 && status.reply_len() > 0 {
        match receive_reply(dev, app_id, &status, reply, *reply_len) {
            Ok(n) => got = n,
            Err(code) => {
                *reply_len = 0;
                return code;
            }
        }
    }
    *reply_len = got;

    // Clear the reply for the next caller. Not completely fatal if it
    // fails; the next call's make-ready will try again.
    debug!("clear the reply manually for the next caller");
    if let Err(err) = clear_status(dev, app_id) {
        warn!(%err, "failed to clear status after call");
    }

    app_status_code(status.status())
}
