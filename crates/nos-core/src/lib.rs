//! NOS-Core: host-side driver for the Citadel secure coprocessor.
//!
//! The chip exposes a single bidirectional datagram channel carrying
//! multiplexed application-level RPCs. This crate implements the host half
//! of that transport and the firmware-update application on top of it.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, CRC-16 codec, status/command-info structs
//! - **Transport**: Datagram channel abstraction (character device, mock)
//!   and the RPC state machine
//! - **Client**: Device sessions and per-application routing
//! - **Image**: Flash layout and the byte-exact firmware image file
//! - **Update**: Flash-block streaming with A/B slot fallback, passwords,
//!   version/reboot/erase commands
//! - **Actions**: High-level orchestrator with fail-fast ordering
//!
//! # Example
//!
//! ```no_run
//! use nos_core::actions::{ActionRequest, Actions, Orchestrator};
//! use nos_core::client::NuggetClient;
//!
//! let mut client = NuggetClient::new("/dev/citadel0");
//! let request = ActionRequest {
//!     actions: Actions {
//!         version: true,
//!         ..Actions::default()
//!     },
//!     ..ActionRequest::default()
//! };
//!
//! let mut orchestrator = Orchestrator::new(&mut client);
//! let code = orchestrator.run(&request);
//! assert_eq!(code, 0);
//! ```

pub mod actions;
pub mod client;
pub mod image;
pub mod protocol;
pub mod transport;
pub mod update;

// Re-exports for convenience
pub use actions::{ActionRequest, Actions, Orchestrator};
pub use client::{describe_status, AppClient, MockClient, NosClient, NuggetClient};
pub use image::{FirmwareImage, ImageError, SignedHeader};
pub use protocol::status::{TransportCommandInfo, TransportStatus};
pub use transport::{call_application, CharDevice, DatagramDevice, DeviceError, MockDevice};
pub use update::PasswordDigest;
