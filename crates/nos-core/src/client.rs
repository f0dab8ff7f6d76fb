//! Device sessions and application routing.
//!
//! `NosClient` is the seam between the transport and everything above it:
//! the direct character-device client lives here, a proxied-over-IPC client
//! would implement the same trait. `AppClient` narrows a session to one
//! application id.

use std::collections::VecDeque;

use tracing::debug;

use crate::protocol::constants::*;
use crate::transport::chardev::CharDevice;
use crate::transport::driver::call_application;
use crate::transport::traits::{DatagramDevice, DeviceError};

/// A connected session to one device.
///
/// Non-reentrant: one in-flight call at a time. `call_app`'s response `Vec`
/// signals the reply-length hint through its capacity and is resized to the
/// bytes actually received.
pub trait NosClient {
    fn open(&mut self) -> Result<(), DeviceError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn call_app(&mut self, app_id: u8, params: u16, request: &[u8], response: &mut Vec<u8>)
        -> u32;
}

/// Direct client over the platform datagram device.
pub struct NuggetClient {
    path: String,
    device: Option<Box<dyn DatagramDevice>>,
}

impl NuggetClient {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            device: None,
        }
    }

    /// Wrap an already-open device (tests, alternative backends).
    pub fn from_device(device: Box<dyn DatagramDevice>) -> Self {
        Self {
            path: String::new(),
            device: Some(device),
        }
    }
}

impl NosClient for NuggetClient {
    fn open(&mut self) -> Result<(), DeviceError> {
        if self.device.is_none() {
            debug!(path = %self.path, "opening device");
            self.device = Some(Box::new(CharDevice::open(&self.path)?));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.device = None;
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn call_app(
        &mut self,
        app_id: u8,
        params: u16,
        request: &[u8],
        response: &mut Vec<u8>,
    ) -> u32 {
        let Some(device) = self.device.as_deref() else {
            return APP_ERROR_IO;
        };
        if request.len() as u64 > u32::MAX as u64 {
            return APP_ERROR_TOO_MUCH;
        }

        let wanted = response.capacity().min(u32::MAX as usize);
        response.resize(wanted, 0);
        let mut reply_len = wanted as u32;
        let code = call_application(device, app_id, params, request, response, &mut reply_len);
        response.truncate(reply_len as usize);
        code
    }
}

/// Routes calls to one application on an open session.
pub struct AppClient<'a> {
    client: &'a mut dyn NosClient,
    app_id: u8,
}

impl<'a> AppClient<'a> {
    pub fn new(client: &'a mut dyn NosClient, app_id: u8) -> Self {
        Self { client, app_id }
    }

    pub fn call(&mut self, params: u16, request: &[u8], response: &mut Vec<u8>) -> u32 {
        self.client.call_app(self.app_id, params, request, response)
    }
}

/// Human classification of a status code, for one-line error reports.
pub fn describe_status(code: u32) -> String {
    let name = match code {
        APP_SUCCESS => "success",
        APP_ERROR_BOGUS_ARGS => "bogus args",
        APP_ERROR_INTERNAL => "app is being stupid",
        APP_ERROR_TOO_MUCH => "caller sent too much data",
        APP_ERROR_IO => "I/O error",
        APP_ERROR_RPC => "RPC failure",
        APP_ERROR_CHECKSUM => "request checksum failed",
        APP_ERROR_BUSY => "app is busy",
        APP_ERROR_TIMEOUT => "app timed out",
        APP_ERROR_NOT_READY => "app not ready",
        _ if (APP_SPECIFIC_ERROR..APP_LINE_NUMBER_BASE).contains(&code) => {
            return format!("app-specific error #{}", code - APP_SPECIFIC_ERROR);
        }
        _ if code >= APP_LINE_NUMBER_BASE => {
            return format!("error at line {}", code - APP_LINE_NUMBER_BASE);
        }
        _ => "unknown",
    };
    name.to_string()
}

/// Scripted client for exercising the layers above the transport.
///
/// Calls are recorded; responses come from a queue and default to
/// `APP_SUCCESS` with an empty reply once the queue runs dry, so tests only
/// script the interesting outcomes.
#[derive(Default)]
pub struct MockClient {
    open: bool,
    fail_open: bool,
    responses: VecDeque<(u32, Vec<u8>)>,
    calls: Vec<(u8, u16, Vec<u8>)>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail, for connection-error paths.
    pub fn failing_to_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn push_response(&mut self, code: u32, reply: &[u8]) {
        self.responses.push_back((code, reply.to_vec()));
    }

    /// Recorded calls as (app_id, params, request) triples.
    pub fn calls(&self) -> &[(u8, u16, Vec<u8>)] {
        &self.calls
    }
}

impl NosClient for MockClient {
    fn open(&mut self) -> Result<(), DeviceError> {
        if self.fail_open {
            return Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn call_app(
        &mut self,
        app_id: u8,
        params: u16,
        request: &[u8],
        response: &mut Vec<u8>,
    ) -> u32 {
        self.calls.push((app_id, params, request.to_vec()));
        let (code, reply) = self
            .responses
            .pop_front()
            .unwrap_or((APP_SUCCESS, Vec::new()));
        let cap = response.capacity();
        response.clear();
        response.extend_from_slice(&reply[..reply.len().min(cap)]);
        code
    }
}
