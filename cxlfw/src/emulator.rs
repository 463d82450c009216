//! In-process emulated CXL memory device.
//!
//! [`EmulatedDevice`] answers the firmware-related mailbox commands the way a
//! device would: it stages transfer blocks in order, validates slots,
//! commits on END, runs transfers and activations as background operations
//! that stay in progress for a configurable number of status polls, and can
//! inject Busy replies or a failure at a given step.
//!
//! Its persistent part, [`EmulatorState`], is plain data so callers can
//! save it between runs (with the `serde` feature).

use std::io;

use log::{debug, trace};

use crate::device::FlagGate;
use crate::firmware::{FW_BYTE_ALIGN, TransferAction};
use crate::mailbox::payload::{BackgroundStatus, FwInfo, MAX_FW_SLOTS, TransferRequest};
use crate::mailbox::{MailboxStatus, Opcode, RawResponse, Transport};

/// Image stored in an emulated slot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotImage {
    /// Revision string reported by Get FW Info.
    pub revision: String,
    /// Image size in bytes.
    pub size: usize,
    /// CRC-32 of the image.
    pub crc32: u32,
}

impl SlotImage {
    /// Describe a committed image.
    pub fn from_data(data: &[u8]) -> Self {
        let crc32 = crc32fast::hash(data);
        Self {
            revision: format!("emu-{crc32:08x}"),
            size: data.len(),
            crc32,
        }
    }
}

/// Persistent state of an emulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EmulatorState {
    /// Slot contents, index 0 is slot 1.
    pub slots: Vec<Option<SlotImage>>,
    /// Running slot (1-based).
    pub active_slot: u8,
    /// Slot to run after the next reset (0 if none).
    pub staged_slot: u8,
    /// Last OS image received.
    pub os_image: Option<SlotImage>,
    /// Device reports itself mid-command.
    pub busy: bool,
}

impl Default for EmulatorState {
    fn default() -> Self {
        let mut slots = vec![None; MAX_FW_SLOTS];
        slots[0] = Some(SlotImage {
            revision: "emu-1.0.0".into(),
            size: 0,
            crc32: 0,
        });
        Self {
            slots,
            active_slot: 1,
            staged_slot: 0,
            os_image: None,
            busy: false,
        }
    }
}

impl EmulatorState {
    fn slot_count(&self) -> u8 {
        u8::try_from(self.slots.len().min(MAX_FW_SLOTS)).unwrap_or(0)
    }

    fn slot(&self, slot: u8) -> Option<&SlotImage> {
        let index = usize::from(slot).checked_sub(1)?;
        self.slots.get(index)?.as_ref()
    }
}

/// Behaviour knobs of an emulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    /// Busy replies before each transfer or activation request is accepted.
    pub busy_replies: u32,
    /// Status polls a transfer block stays in progress.
    pub processing_polls: u32,
    /// Status polls an activation stays in progress.
    pub activation_polls: u32,
    /// Refuse the n-th transfer step (0-based, aborts excluded).
    pub fail_at_step: Option<usize>,
    /// Status returned by the refused step.
    pub fail_status: MailboxStatus,
    /// Device supports activation without a reset.
    pub online_activation: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            busy_replies: 0,
            processing_polls: 1,
            activation_polls: 2,
            fail_at_step: None,
            fail_status: MailboxStatus::InternalError,
            online_activation: true,
        }
    }
}

#[derive(Debug)]
struct Staging {
    opcode: u16,
    slot: u8,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Background {
    opcode: u16,
    total_polls: u32,
    remaining: u32,
    return_code: MailboxStatus,
}

/// Emulated device implementing [`Transport`].
#[derive(Debug)]
pub struct EmulatedDevice {
    name: String,
    config: EmulatorConfig,
    state: EmulatorState,
    gate: FlagGate,
    staging: Option<Staging>,
    background: Option<Background>,
    last_background: BackgroundStatus,
    busy_left: u32,
    steps_seen: usize,
    history: Vec<u16>,
}

impl EmulatedDevice {
    /// Create a device in the default state.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_state(name, EmulatorState::default())
    }

    /// Create a device from saved state.
    pub fn with_state(name: impl Into<String>, state: EmulatorState) -> Self {
        let gate = FlagGate::new();
        gate.set_active(state.busy);
        let config = EmulatorConfig::default();
        Self {
            name: name.into(),
            busy_left: config.busy_replies,
            config,
            state,
            gate,
            staging: None,
            background: None,
            last_background: BackgroundStatus::idle(),
            steps_seen: 0,
            history: Vec::new(),
        }
    }

    /// Replace the behaviour knobs.
    #[must_use]
    pub fn with_config(mut self, config: EmulatorConfig) -> Self {
        self.busy_left = config.busy_replies;
        self.config = config;
        self
    }

    /// Activity gate reflecting the device's busy flag.
    pub fn activity_gate(&self) -> FlagGate {
        self.gate.clone()
    }

    /// Current persistent state.
    pub fn state(&self) -> &EmulatorState {
        &self.state
    }

    /// Consume the device and return its persistent state.
    pub fn into_state(self) -> EmulatorState {
        self.state
    }

    /// Opcodes received so far.
    pub fn history(&self) -> &[u16] {
        &self.history
    }

    /// Whether a partial transfer is staged.
    pub fn transfer_pending(&self) -> bool {
        self.staging.is_some()
    }

    fn handle(&mut self, opcode: u16, payload: &[u8]) -> RawResponse {
        match Opcode::from_code(opcode) {
            Some(Opcode::GetBackgroundStatus) => self.background_status(false),
            Some(Opcode::HboStatus) => self.background_status(true),
            Some(Opcode::GetFwInfo) => RawResponse::success(self.fw_info().encode()),
            Some(Opcode::TransferFw | Opcode::HboTransferFw | Opcode::HboTransferOsImage) => {
                self.gated(|dev| dev.transfer(opcode, payload))
            },
            Some(Opcode::ActivateFw | Opcode::HboActivateFw) => {
                self.gated(|dev| dev.activate(opcode, payload))
            },
            None => RawResponse::status(MailboxStatus::Unsupported),
        }
    }

    /// Apply busy injection and the background-operation interlock.
    fn gated(&mut self, f: impl FnOnce(&mut Self) -> MailboxStatus) -> RawResponse {
        if self.background.is_some() {
            return RawResponse::status(MailboxStatus::Busy);
        }
        if self.busy_left > 0 {
            self.busy_left -= 1;
            return RawResponse::status(MailboxStatus::Busy);
        }
        self.busy_left = self.config.busy_replies;
        RawResponse::status(f(self))
    }

    fn start_background(&mut self, opcode: u16, polls: u32) {
        self.background = Some(Background {
            opcode,
            total_polls: polls,
            remaining: polls,
            return_code: MailboxStatus::Success,
        });
    }

    fn background_status(&mut self, hbo: bool) -> RawResponse {
        let status = match self.background.as_mut() {
            Some(op) if op.remaining > 0 => {
                let done = op.total_polls - op.remaining;
                op.remaining -= 1;
                BackgroundStatus {
                    in_progress: true,
                    percent: u8::try_from(done * 100 / op.total_polls).unwrap_or(99),
                    opcode: op.opcode,
                    return_code: 0,
                    vendor_status: 0,
                }
            },
            Some(op) => {
                let finished = BackgroundStatus {
                    in_progress: false,
                    percent: 100,
                    opcode: op.opcode,
                    return_code: op.return_code.code(),
                    vendor_status: 0,
                };
                self.background = None;
                self.last_background = finished;
                finished
            },
            None => self.last_background,
        };
        let payload = if hbo {
            status.encode_hbo()
        } else {
            status.encode_spec()
        };
        RawResponse::success(payload)
    }

    fn fw_info(&self) -> FwInfo {
        FwInfo {
            slots_supported: self.state.slot_count(),
            active_slot: self.state.active_slot,
            staged_slot: self.state.staged_slot,
            online_activation: self.config.online_activation,
            revisions: self
                .state
                .slots
                .iter()
                .take(MAX_FW_SLOTS)
                .map(|s| s.as_ref().map(|s| s.revision.clone()))
                .collect(),
        }
    }

    fn transfer(&mut self, opcode: u16, payload: &[u8]) -> MailboxStatus {
        let Some(req) = TransferRequest::parse(payload) else {
            return MailboxStatus::InvalidPayloadLength;
        };
        let Some(action) = TransferAction::from_code(req.action) else {
            return MailboxStatus::InvalidParameter;
        };

        if action == TransferAction::Abort {
            debug!("{}: transfer aborted", self.name);
            self.staging = None;
            return MailboxStatus::Success;
        }

        let step = self.steps_seen;
        self.steps_seen += 1;
        if self.config.fail_at_step == Some(step) {
            debug!("{}: injected failure at step {step}", self.name);
            return self.config.fail_status;
        }

        let os_image = opcode == Opcode::HboTransferOsImage.code();
        if !os_image && !self.valid_target_slot(req.slot) {
            return MailboxStatus::FwInvalidSlot;
        }

        let expected_offset = match (&self.staging, action) {
            (_, TransferAction::Initiate) | (None, TransferAction::End) => 0,
            (Some(staged), _) if staged.opcode == opcode && staged.slot == req.slot => {
                staged.data.len() / FW_BYTE_ALIGN
            },
            _ => return MailboxStatus::FwTransferOutOfOrder,
        };
        if usize::try_from(req.offset).ok() != Some(expected_offset) {
            return MailboxStatus::FwTransferOutOfOrder;
        }

        let mut staged = match (self.staging.take(), action) {
            (_, TransferAction::Initiate) | (None, _) => Staging {
                opcode,
                slot: req.slot,
                data: Vec::new(),
            },
            (Some(staged), _) => staged,
        };
        staged.data.extend_from_slice(req.data);
        trace!(
            "{}: {action} slot {} offset {}, {} bytes staged",
            self.name,
            req.slot,
            req.offset,
            staged.data.len()
        );

        if action == TransferAction::End {
            self.commit(&staged, os_image);
        } else {
            self.staging = Some(staged);
        }

        self.start_background(opcode, self.config.processing_polls);
        MailboxStatus::Success
    }

    fn valid_target_slot(&self, slot: u8) -> bool {
        (1..=self.state.slot_count()).contains(&slot) && slot != self.state.active_slot
    }

    fn commit(&mut self, staged: &Staging, os_image: bool) {
        let image = SlotImage::from_data(&staged.data);
        debug!(
            "{}: committed {} bytes ({}) to {}",
            self.name,
            image.size,
            image.revision,
            if os_image {
                "OS image".to_string()
            } else {
                format!("slot {}", staged.slot)
            }
        );
        if os_image {
            self.state.os_image = Some(image);
        } else if let Some(entry) = self.state.slots.get_mut(usize::from(staged.slot) - 1) {
            *entry = Some(image);
        }
    }

    fn activate(&mut self, opcode: u16, payload: &[u8]) -> MailboxStatus {
        let [action, slot, ..] = *payload else {
            return MailboxStatus::InvalidPayloadLength;
        };
        if self.staging.is_some() {
            return MailboxStatus::FwTransferInProgress;
        }
        if self.state.slot(slot).is_none() {
            return MailboxStatus::FwInvalidSlot;
        }

        match action {
            0 if !self.config.online_activation => return MailboxStatus::Unsupported,
            0 => {
                self.state.active_slot = slot;
                self.state.staged_slot = 0;
            },
            1 => self.state.staged_slot = slot,
            _ => return MailboxStatus::InvalidParameter,
        }
        debug!("{}: slot {slot} activated (action {action})", self.name);

        self.start_background(opcode, self.config.activation_polls);
        MailboxStatus::Success
    }
}

impl Transport for EmulatedDevice {
    fn submit(&mut self, opcode: u16, payload: &[u8]) -> io::Result<RawResponse> {
        self.history.push(opcode);
        Ok(self.handle(opcode, payload))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
