//! Firmware update workflows.
//!
//! [`FirmwareUpdater`] owns the [`DeviceGuard`] for the whole workflow and
//! drives the mailbox through the retry controller and the background
//! poller:
//!
//! - [`FirmwareUpdater::transfer`] sends an image block by block
//!   (INITIATE, CONTINUE*, END) and aborts on failure.
//! - [`FirmwareUpdater::activate`] switches the running or next-boot slot.
//! - [`FirmwareUpdater::firmware_info`] and
//!   [`FirmwareUpdater::background_status`] are single queries.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cxlfw::firmware::{FirmwareUpdater, TransferConfig, TransferKind};
//! use cxlfw::{Device, EmulatedDevice, FirmwareImage};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut device = Device::new(0, "mem0", EmulatedDevice::new("mem0"));
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!
//!     let mut updater = FirmwareUpdater::new(&mut device)?;
//!     let config = TransferConfig::new(TransferKind::SpecDefined, 2);
//!     updater.transfer(&image, &config, |p| {
//!         println!("{}/{} bytes", p.bytes_sent, p.total_bytes);
//!     })?;
//!     Ok(())
//! }
//! ```

mod activate;
mod transfer;

use std::fmt;

use log::debug;

use crate::device::{Device, DeviceGuard};
use crate::error::{Error, Result};
use crate::mailbox::payload::{BackgroundStatus, FwInfo};
use crate::mailbox::{Opcode, Transport};
use crate::poll::{self, StatusQuery};
use crate::retry::{Sleeper, ThreadSleeper};

pub use activate::{
    ActivationAction, ActivationConfig, ActivationRequest, DEFAULT_ACTIVATE_ATTEMPTS,
    DEFAULT_ACTIVATE_INTERVAL,
};
pub use transfer::{
    DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL, DEFAULT_STEP_ATTEMPTS, DEFAULT_STEP_DELAY,
    TransferConfig, TransferOutcome, TransferPlan, TransferProgress, TransferState, TransferStep,
};

/// Transfer block size in bytes.
pub const FW_BLOCK_SIZE: usize = 128;

/// Unit of the Transfer FW offset field, in bytes.
pub const FW_BYTE_ALIGN: usize = 128;

/// Transfer FW action field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum TransferAction {
    /// First block; resets the device staging buffer.
    Initiate = 1,
    /// Intermediate block.
    Continue = 2,
    /// Last block; the device validates and commits the image.
    End = 3,
    /// Discard the partial transfer.
    Abort = 4,
}

impl TransferAction {
    /// Raw action byte.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a raw action byte.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Initiate),
            2 => Some(Self::Continue),
            3 => Some(Self::End),
            4 => Some(Self::Abort),
            _ => None,
        }
    }
}

impl fmt::Display for TransferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initiate => "initiate",
            Self::Continue => "continue",
            Self::End => "end",
            Self::Abort => "abort",
        };
        f.write_str(name)
    }
}

/// Which transfer command family to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferKind {
    /// Transfer FW (0x0201), confirmed through Get Background Operation Status.
    #[default]
    SpecDefined,
    /// Vendor background transfer (0xCD01), confirmed through HBO status.
    VendorBackground,
    /// Vendor OS image transfer (0xCD04), confirmed through HBO status.
    OsImage,
}

impl TransferKind {
    /// Resolve the `--hbo` / `--os` flag pair.
    pub fn from_flags(hbo: bool, os_image: bool) -> Result<Self> {
        match (hbo, os_image) {
            (false, false) => Ok(Self::SpecDefined),
            (true, false) => Ok(Self::VendorBackground),
            (false, true) => Ok(Self::OsImage),
            (true, true) => Err(Error::Config(
                "HBO and OS image transfers are mutually exclusive".into(),
            )),
        }
    }

    /// Transfer opcode.
    pub fn opcode(self) -> Opcode {
        match self {
            Self::SpecDefined => Opcode::TransferFw,
            Self::VendorBackground => Opcode::HboTransferFw,
            Self::OsImage => Opcode::HboTransferOsImage,
        }
    }

    /// Status query confirming each block.
    pub fn status_query(self) -> StatusQuery {
        match self {
            Self::SpecDefined => StatusQuery::Spec,
            Self::VendorBackground | Self::OsImage => StatusQuery::Hbo,
        }
    }
}

/// Which activation command family to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActivateKind {
    /// Activate FW (0x0202).
    #[default]
    SpecDefined,
    /// Vendor background activation (0xCD02).
    VendorBackground,
}

impl ActivateKind {
    /// Activation opcode.
    pub fn opcode(self) -> Opcode {
        match self {
            Self::SpecDefined => Opcode::ActivateFw,
            Self::VendorBackground => Opcode::HboActivateFw,
        }
    }

    /// Status query confirming the activation.
    pub fn status_query(self) -> StatusQuery {
        match self {
            Self::SpecDefined => StatusQuery::Spec,
            Self::VendorBackground => StatusQuery::Hbo,
        }
    }
}

/// Firmware workflows over one claimed device.
pub struct FirmwareUpdater<'a, T: Transport> {
    guard: DeviceGuard<'a, T>,
    sleeper: Box<dyn Sleeper + 'a>,
}

impl<'a, T: Transport> FirmwareUpdater<'a, T> {
    /// Claim `device` for firmware work.
    ///
    /// Fails with `Error::DeviceBusy` if the device reports itself mid-command.
    /// The check is made once here; activity starting later is not detected.
    pub fn new(device: &'a mut Device<T>) -> Result<Self> {
        Ok(Self {
            guard: device.claim()?,
            sleeper: Box::new(ThreadSleeper),
        })
    }

    /// Replace the sleeper used between retries and polls.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'a) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Name of the claimed device.
    pub fn device_name(&self) -> &str {
        self.guard.name()
    }

    /// Read slot layout and revisions.
    pub fn firmware_info(&mut self) -> Result<FwInfo> {
        let payload = self.guard.client().submit(Opcode::GetFwInfo, &[])?;
        let info = FwInfo::decode(&payload)?;
        debug!(
            "{}: {} slot(s), active {}, staged {}",
            self.guard.name(),
            info.slots_supported,
            info.active_slot,
            info.staged_slot
        );
        Ok(info)
    }

    /// Issue one background status query.
    pub fn background_status(&mut self, query: StatusQuery) -> Result<BackgroundStatus> {
        poll::query_status(&mut self.guard.client(), query)
    }
}
