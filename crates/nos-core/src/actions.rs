//! Action orchestration.
//!
//! Runs the user-selected actions against one open session, in a fixed
//! order, bailing out on the first failure. The orchestrator owns the error
//! accumulator and borrows the client; there is no process-wide state.

use std::fmt::Display;

use tracing::debug;

use crate::client::{describe_status, AppClient, NosClient};
use crate::image::{
    FirmwareImage, CHIP_RO_A_MEM_OFF, CHIP_RO_B_MEM_OFF, CHIP_RW_A_MEM_OFF, CHIP_RW_B_MEM_OFF,
};
use crate::protocol::constants::*;
use crate::update::{
    do_change_pw, do_enable, do_erase, do_reboot, do_update, do_version,
};

/// The set of actions the user asked for.
#[derive(Debug, Default, Clone)]
pub struct Actions {
    pub version: bool,
    pub rw: bool,
    pub ro: bool,
    pub reboot: bool,
    pub enable_ro: bool,
    pub enable_rw: bool,
    pub change_pw: bool,
    pub erase: Option<u32>,
}

impl Actions {
    pub fn any(&self) -> bool {
        self.version
            || self.rw
            || self.ro
            || self.reboot
            || self.enable_ro
            || self.enable_rw
            || self.change_pw
            || self.erase.is_some()
    }

    pub fn needs_image(&self) -> bool {
        self.rw || self.ro
    }

    pub fn needs_password(&self) -> bool {
        self.change_pw || self.enable_ro || self.enable_rw
    }
}

/// Everything one orchestrator run consumes.
#[derive(Default)]
pub struct ActionRequest {
    pub actions: Actions,
    pub image: Option<FirmwareImage>,
    /// Current password for `change_pw`; absent means none is set.
    pub old_password: Option<String>,
    /// New password for `change_pw` and the password for enable actions.
    /// The empty string is a legal value.
    pub new_password: Option<String>,
}

// Internal codes naming the action that failed.
const CODE_VERSION: u8 = 2;
const CODE_RW: u8 = 3;
const CODE_RO: u8 = 4;
const CODE_CHANGE_PW: u8 = 5;
const CODE_ENABLE: u8 = 6;
const CODE_REBOOT: u8 = 7;

/// Executes actions in a fixed order with fail-fast semantics.
pub struct Orchestrator<'a> {
    client: &'a mut dyn NosClient,
    errors: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(client: &'a mut dyn NosClient) -> Self {
        Self { client, errors: 0 }
    }

    /// Errors accumulated so far.
    pub fn errors(&self) -> usize {
        self.errors
    }

    fn error(&mut self, message: impl Display) {
        self.errors += 1;
        eprintln!("ERROR: {message}");
    }

    /// True on `APP_SUCCESS`; reports and counts anything else.
    fn app_success(&mut self, code: u32) -> bool {
        if code == APP_SUCCESS {
            return true;
        }
        self.errors += 1;
        eprintln!("ERROR: code {code:#x}: {}", describe_status(code));
        false
    }

    fn update_stage(&mut self, request: &ActionRequest, offset_a: u32, offset_b: u32) -> bool {
        let Some(image) = request.image.as_ref() else {
            self.error("an image file is required with --ro and --rw");
            return false;
        };
        let result = do_update(
            &mut AppClient::new(&mut *self.client, APP_ID_NUGGET),
            image,
            offset_a,
            offset_b,
        );
        match result {
            Ok(code) => self.app_success(code),
            Err(err) => {
                self.error(err);
                false
            }
        }
    }

    /// Run all requested actions. Returns 0 on success or an internal code
    /// naming the first action that failed.
    pub fn run(&mut self, request: &ActionRequest) -> u8 {
        if let Err(err) = self.client.open() {
            self.error(format_args!("unable to connect: {err}"));
            return 1;
        }
        if !self.client.is_open() {
            self.error("unable to connect");
            return 1;
        }

        // A requested erase preempts everything else.
        if let Some(code) = request.actions.erase {
            debug!(code = %format!("{code:#010x}"), "erasing device");
            let rv = do_erase(&mut AppClient::new(&mut *self.client, APP_ID_NUGGET), code);
            if !self.app_success(rv) {
                return 1;
            }
            println!("Citadel erase requested");
            return 0;
        }

        if request.actions.version {
            let (rv, text) =
                do_version(&mut AppClient::new(&mut *self.client, APP_ID_NUGGET));
            if !self.app_success(rv) {
                return CODE_VERSION;
            }
            println!("{text}");
        }

        if request.actions.rw
            && !self.update_stage(request, CHIP_RW_A_MEM_OFF, CHIP_RW_B_MEM_OFF)
        {
            return CODE_RW;
        }

        if request.actions.ro
            && !self.update_stage(request, CHIP_RO_A_MEM_OFF, CHIP_RO_B_MEM_OFF)
        {
            return CODE_RO;
        }

        if request.actions.change_pw {
            let Some(new_pw) = request.new_password.as_deref() else {
                self.error("--change_pw requires a new password");
                return CODE_CHANGE_PW;
            };
            let old_pw = request.old_password.as_deref().unwrap_or("");
            let rv = do_change_pw(
                &mut AppClient::new(&mut *self.client, APP_ID_NUGGET),
                old_pw,
                new_pw,
            );
            if !self.app_success(rv) {
                return CODE_CHANGE_PW;
            }
            println!("Update password changed");
        }

        if request.actions.enable_ro || request.actions.enable_rw {
            let Some(password) = request.new_password.as_deref() else {
                self.error("enable actions require a password");
                return CODE_ENABLE;
            };
            let mut which_headers = 0u8;
            if request.actions.enable_ro {
                which_headers |= NUGGET_ENABLE_HEADER_RO;
            }
            if request.actions.enable_rw {
                which_headers |= NUGGET_ENABLE_HEADER_RW;
            }
            let rv = do_enable(
                &mut AppClient::new(&mut *self.client, APP_ID_NUGGET),
                password,
                which_headers,
            );
            if !self.app_success(rv) {
                return CODE_ENABLE;
            }
            println!("Update enabled");
        }

        if request.actions.reboot {
            let rv = do_reboot(&mut AppClient::new(&mut *self.client, APP_ID_NUGGET), false);
            if !self.app_success(rv) {
                return CODE_REBOOT;
            }
            println!("Citadel reboot requested");
        }

        0
    }
}
