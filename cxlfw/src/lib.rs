//! # cxlfw
//!
//! A library for updating and activating firmware on CXL memory devices.
//!
//! This crate provides the firmware control plane that sits on top of a
//! device's mailbox interface, including:
//!
//! - Mailbox status classification (retryable vs. terminal)
//! - A bounded fixed-delay retry controller
//! - Background operation polling (CXL-defined and vendor HBO layouts)
//! - The chunked INITIATE / CONTINUE / END / ABORT transfer state machine
//! - Firmware activation and Get FW Info
//! - An emulated device for testing without hardware
//!
//! The mailbox transport itself is a collaborator behind the
//! [`Transport`](mailbox::Transport) trait.
//!
//! ## Features
//!
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use cxlfw::firmware::{
//!     ActivationAction, ActivationConfig, ActivationRequest, FirmwareUpdater, TransferConfig,
//!     TransferKind,
//! };
//! use cxlfw::{Device, EmulatedDevice, FirmwareImage};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let emulator = EmulatedDevice::new("mem0");
//!     let gate = emulator.activity_gate();
//!     let mut device = Device::new(0, "mem0", emulator).with_gate(gate);
//!
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!     let mut updater = FirmwareUpdater::new(&mut device)?;
//!
//!     // Stage the image in slot 2
//!     let config = TransferConfig::new(TransferKind::SpecDefined, 2);
//!     updater.transfer(&image, &config, |p| {
//!         println!("Transferring: {}%", p.percent());
//!     })?;
//!
//!     // Run it after the next reset
//!     let request = ActivationRequest::new(ActivationAction::OnNextReset, 2);
//!     updater.activate(&request, &ActivationConfig::default())?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod emulator;
pub mod error;
pub mod firmware;
pub mod image;
pub mod mailbox;
pub mod poll;
pub mod retry;

// Re-exports for convenience
pub use {
    device::{ActivityGate, Device, DeviceGuard, FlagGate, IdleGate},
    emulator::{EmulatedDevice, EmulatorConfig, EmulatorState},
    error::{Error, Result},
    firmware::{FirmwareUpdater, TransferKind},
    image::FirmwareImage,
    mailbox::{MailboxClient, MailboxStatus, Opcode, Transport},
    poll::StatusQuery,
    retry::RetryPolicy,
};
