//! Error types for cxlfw.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::firmware::TransferAction;
use crate::mailbox::{MailboxStatus, Opcode};

/// Result type for cxlfw operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cxlfw operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (image file, state file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The mailbox exchange itself failed.
    #[error("Transport error during {opcode}: {source}")]
    Transport {
        /// Command being submitted.
        opcode: Opcode,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Device completed the command with a non-success return code.
    #[error("{opcode} failed: {status}")]
    Device {
        /// Command that failed.
        opcode: Opcode,
        /// Device return code.
        status: MailboxStatus,
    },

    /// Device kept answering with a retryable status until the budget ran out.
    #[error("{opcode} still {last} after {attempts} attempts")]
    RetriesExhausted {
        /// Command being retried.
        opcode: Opcode,
        /// Attempts made.
        attempts: u32,
        /// Last status reported.
        last: MailboxStatus,
    },

    /// Background operation did not finish within the poll budget.
    #[error("Background 0x{opcode:04X} still running after {attempts} polls ({percent}% complete)")]
    PollExhausted {
        /// Opcode of the background operation.
        opcode: u16,
        /// Polls made.
        attempts: u32,
        /// Last reported completion percentage.
        percent: u8,
    },

    /// Wall-clock ceiling hit before the attempt budget.
    #[error("{what} exceeded its {limit:?} deadline after {attempts} attempts")]
    DeadlineExceeded {
        /// Operation description.
        what: String,
        /// Configured ceiling.
        limit: Duration,
        /// Attempts made.
        attempts: u32,
    },

    /// Background operation finished with a failure code.
    #[error("Background operation 0x{opcode:04X} failed: {status}")]
    BackgroundFailed {
        /// Opcode of the background operation.
        opcode: u16,
        /// Return code embedded in the status report.
        status: MailboxStatus,
    },

    /// Device reported itself mid-command when a workflow tried to start.
    #[error("Device {device} is busy with another operation")]
    DeviceBusy {
        /// Device name.
        device: String,
    },

    /// Firmware image has no content.
    #[error("Firmware image {} is empty", path.display())]
    EmptyImage {
        /// Image path.
        path: PathBuf,
    },

    /// A transfer step failed and the transfer was aborted.
    #[error(
        "Firmware transfer failed at step {step} ({action}): {source}{}",
        abort_note(.abort_error.as_deref())
    )]
    TransferFailed {
        /// Index of the failing step.
        step: usize,
        /// Action of the failing step.
        action: TransferAction,
        /// Cause of the failure.
        #[source]
        source: Box<Error>,
        /// Failure of the best-effort abort, if any.
        abort_error: Option<String>,
    },

    /// Malformed response payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn abort_note(abort_error: Option<&str>) -> String {
    abort_error
        .map(|e| format!(" (abort also failed: {e})"))
        .unwrap_or_default()
}

impl Error {
    /// Whether the error is a retryable device status.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Device { status, .. } if status.is_retryable())
    }

    /// Whether the error means an attempt budget ran out, as opposed to the
    /// device refusing the command.
    pub fn is_exhausted(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. }
            | Self::PollExhausted { .. }
            | Self::DeadlineExceeded { .. } => true,
            Self::TransferFailed { source, .. } => source.is_exhausted(),
            _ => false,
        }
    }

    /// Device return code carried by this error, if any.
    pub fn device_status(&self) -> Option<MailboxStatus> {
        match self {
            Self::Device { status, .. }
            | Self::BackgroundFailed { status, .. }
            | Self::RetriesExhausted { last: status, .. } => Some(*status),
            Self::TransferFailed { source, .. } => source.device_status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_only_for_retryable_device_status() {
        let busy = Error::Device {
            opcode: Opcode::TransferFw,
            status: MailboxStatus::Busy,
        };
        let slot = Error::Device {
            opcode: Opcode::TransferFw,
            status: MailboxStatus::FwInvalidSlot,
        };
        assert!(busy.is_retryable());
        assert!(!slot.is_retryable());
        assert!(!Error::Protocol("short".into()).is_retryable());
    }

    #[test]
    fn test_exhaustion_is_distinguishable() {
        let exhausted = Error::RetriesExhausted {
            opcode: Opcode::TransferFw,
            attempts: 5,
            last: MailboxStatus::Busy,
        };
        let refused = Error::Device {
            opcode: Opcode::TransferFw,
            status: MailboxStatus::FwAuthenticationFailed,
        };
        assert!(exhausted.is_exhausted());
        assert!(!refused.is_exhausted());

        let wrapped = Error::TransferFailed {
            step: 2,
            action: TransferAction::Continue,
            source: Box::new(exhausted),
            abort_error: None,
        };
        assert!(wrapped.is_exhausted());
        assert_eq!(wrapped.device_status(), Some(MailboxStatus::Busy));
    }

    #[test]
    fn test_transfer_failed_message_mentions_abort_failure() {
        let err = Error::TransferFailed {
            step: 1,
            action: TransferAction::Continue,
            source: Box::new(Error::Device {
                opcode: Opcode::TransferFw,
                status: MailboxStatus::FwTransferOutOfOrder,
            }),
            abort_error: Some("transfer-fw (0x0201) failed: Busy".into()),
        };
        let text = err.to_string();
        assert!(text.contains("step 1 (continue)"));
        assert!(text.contains("FW Transfer Out of Order"));
        assert!(text.contains("abort also failed"));
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = Error::RetriesExhausted {
            opcode: Opcode::ActivateFw,
            attempts: 3,
            last: MailboxStatus::Busy,
        };
        assert_eq!(
            err.to_string(),
            "activate-fw (0x0202) still Busy after 3 attempts"
        );
    }

    #[test]
    fn test_poll_exhausted_message_uses_hex_opcode() {
        let err = Error::PollExhausted {
            opcode: 0x0201,
            attempts: 5,
            percent: 60,
        };
        assert_eq!(
            err.to_string(),
            "Background 0x0201 still running after 5 polls (60% complete)"
        );
    }
}
