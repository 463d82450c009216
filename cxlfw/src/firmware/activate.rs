//! Firmware activation.
//!
//! Activation has no undo, so there is no abort path: the command is retried
//! while the device is busy, then the background operation is polled to
//! completion. Both phases share one budget, which is large because devices
//! may take minutes to switch images.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::info;

use super::{ActivateKind, FirmwareUpdater};
use crate::error::{Error, Result};
use crate::mailbox::Transport;
use crate::mailbox::payload::{BackgroundStatus, encode_activate};
use crate::poll::poll_until_done;
use crate::retry::{RetryPolicy, with_retry};

/// Default activation attempts (and polls).
pub const DEFAULT_ACTIVATE_ATTEMPTS: u32 = 300;

/// Default delay between activation attempts (and polls).
pub const DEFAULT_ACTIVATE_INTERVAL: Duration = Duration::from_secs(1);

/// When the activated slot takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ActivationAction {
    /// Switch the running firmware now.
    #[default]
    Online = 0,
    /// Run the slot after the next cold reset.
    OnNextReset = 1,
}

impl ActivationAction {
    /// Raw action byte.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a raw action byte.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Online),
            1 => Some(Self::OnNextReset),
            _ => None,
        }
    }
}

impl fmt::Display for ActivationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::OnNextReset => f.write_str("on-reset"),
        }
    }
}

impl FromStr for ActivationAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "online" | "0" => Ok(Self::Online),
            "on-reset" | "reset" | "1" => Ok(Self::OnNextReset),
            other => Err(Error::Config(format!(
                "unknown activation action '{other}' (expected online or on-reset)"
            ))),
        }
    }
}

/// What to activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActivationRequest {
    /// Command family.
    pub kind: ActivateKind,
    /// When the slot takes effect.
    pub action: ActivationAction,
    /// Slot to activate.
    pub slot: u8,
}

impl ActivationRequest {
    /// CXL-defined activation of `slot`.
    pub fn new(action: ActivationAction, slot: u8) -> Self {
        Self {
            kind: ActivateKind::SpecDefined,
            action,
            slot,
        }
    }

    /// Use another command family.
    #[must_use]
    pub fn with_kind(mut self, kind: ActivateKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Activation budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationConfig {
    /// Budget for the command retries and, separately, for the polls.
    pub policy: RetryPolicy,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::new(DEFAULT_ACTIVATE_ATTEMPTS, DEFAULT_ACTIVATE_INTERVAL),
        }
    }
}

impl<T: Transport> FirmwareUpdater<'_, T> {
    /// Activate a firmware slot and wait for the device to finish.
    ///
    /// Returns the final background status.
    pub fn activate(
        &mut self,
        request: &ActivationRequest,
        config: &ActivationConfig,
    ) -> Result<BackgroundStatus> {
        config.policy.validate()?;
        let opcode = request.kind.opcode();
        info!(
            "{}: activating slot {} ({}) via {opcode}",
            self.guard.name(),
            request.slot,
            request.action
        );

        let payload = encode_activate(request.action.code(), request.slot);
        let mut client = self.guard.client();
        with_retry(&config.policy, self.sleeper.as_mut(), || {
            client.submit(opcode, &payload)
        })?;
        let status = poll_until_done(
            &mut client,
            request.kind.status_query(),
            &config.policy,
            self.sleeper.as_mut(),
        )?;

        info!(
            "{}: slot {} activated ({})",
            self.guard.name(),
            request.slot,
            request.action
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::mailbox::testing::ScriptedTransport;
    use crate::mailbox::{MailboxStatus, RawResponse};
    use crate::retry::testing::RecordingSleeper;

    fn config(max: u32) -> ActivationConfig {
        ActivationConfig {
            policy: RetryPolicy::new(max, Duration::from_millis(1)),
        }
    }

    fn status(in_progress: bool, code: MailboxStatus) -> BackgroundStatus {
        BackgroundStatus {
            in_progress,
            percent: if in_progress { 50 } else { 100 },
            opcode: 0x0202,
            return_code: code.code(),
            vendor_status: 0,
        }
    }

    #[test]
    fn test_busy_three_times_then_success() {
        let done = RawResponse::success(status(false, MailboxStatus::Success).encode_spec());
        let mut transport = ScriptedTransport::new(done);
        for _ in 0..3 {
            transport.push(RawResponse::status(MailboxStatus::Busy));
        }
        transport.push(RawResponse::success(Vec::new()));
        let mut device = Device::new(0, "mem0", transport);
        let mut sleeper = RecordingSleeper::default();

        let request = ActivationRequest::new(ActivationAction::OnNextReset, 2);
        let result = FirmwareUpdater::new(&mut device)
            .unwrap()
            .with_sleeper(&mut sleeper)
            .activate(&request, &config(300));

        assert!(!result.unwrap().in_progress);
        assert_eq!(sleeper.sleeps.len(), 3);
        let submitted = &device.transport().submitted;
        assert_eq!(
            device.transport().opcodes(),
            vec![0x0202, 0x0202, 0x0202, 0x0202, 0x0002]
        );
        assert_eq!(submitted[0].payload, vec![1, 2]);
    }

    #[test]
    fn test_waits_for_background_completion() {
        let done = RawResponse::success(status(false, MailboxStatus::Success).encode_hbo());
        let running = RawResponse::success(status(true, MailboxStatus::Success).encode_hbo());
        let mut transport = ScriptedTransport::new(done);
        transport
            .push(RawResponse::success(Vec::new()))
            .push(running.clone())
            .push(running);
        let mut device = Device::new(0, "mem0", transport);
        let mut sleeper = RecordingSleeper::default();

        let request = ActivationRequest::new(ActivationAction::Online, 1)
            .with_kind(ActivateKind::VendorBackground);
        FirmwareUpdater::new(&mut device)
            .unwrap()
            .with_sleeper(&mut sleeper)
            .activate(&request, &config(10))
            .unwrap();

        assert_eq!(
            device.transport().opcodes(),
            vec![0xCD02, 0xCD00, 0xCD00, 0xCD00]
        );
        assert_eq!(sleeper.sleeps.len(), 2);
    }

    #[test]
    fn test_terminal_status_fails_fast_without_abort() {
        let mut transport = ScriptedTransport::new(RawResponse::status(MailboxStatus::FwInvalidSlot));
        transport.push(RawResponse::status(MailboxStatus::FwInvalidSlot));
        let mut device = Device::new(0, "mem0", transport);
        let mut sleeper = RecordingSleeper::default();

        let err = FirmwareUpdater::new(&mut device)
            .unwrap()
            .with_sleeper(&mut sleeper)
            .activate(&ActivationRequest::new(ActivationAction::Online, 9), &config(10))
            .unwrap_err();

        assert_eq!(err.device_status(), Some(MailboxStatus::FwInvalidSlot));
        assert!(!err.is_exhausted());
        assert_eq!(device.transport().opcodes(), vec![0x0202]);
    }

    #[test]
    fn test_activation_failure_reported_by_poll() {
        let failed = RawResponse::success(
            status(false, MailboxStatus::FwAuthenticationFailed).encode_spec(),
        );
        let mut transport = ScriptedTransport::new(failed);
        transport.push(RawResponse::success(Vec::new()));
        let mut device = Device::new(0, "mem0", transport);
        let mut sleeper = RecordingSleeper::default();

        let err = FirmwareUpdater::new(&mut device)
            .unwrap()
            .with_sleeper(&mut sleeper)
            .activate(&ActivationRequest::new(ActivationAction::Online, 1), &config(5))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::BackgroundFailed {
                opcode: 0x0202,
                status: MailboxStatus::FwAuthenticationFailed
            }
        ));
    }

    #[test]
    fn test_activation_exhaustion() {
        let mut device = Device::new(
            0,
            "mem0",
            ScriptedTransport::new(RawResponse::status(MailboxStatus::Busy)),
        );
        let mut sleeper = RecordingSleeper::default();

        let err = FirmwareUpdater::new(&mut device)
            .unwrap()
            .with_sleeper(&mut sleeper)
            .activate(&ActivationRequest::new(ActivationAction::Online, 1), &config(4))
            .unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(device.transport().submitted.len(), 4);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            "online".parse::<ActivationAction>().unwrap(),
            ActivationAction::Online
        );
        assert_eq!(
            "on-reset".parse::<ActivationAction>().unwrap(),
            ActivationAction::OnNextReset
        );
        assert_eq!(
            "1".parse::<ActivationAction>().unwrap(),
            ActivationAction::OnNextReset
        );
        assert!("later".parse::<ActivationAction>().is_err());
        assert_eq!(ActivationAction::from_code(1), Some(ActivationAction::OnNextReset));
        assert_eq!(ActivationAction::OnNextReset.to_string(), "on-reset");
    }
}
