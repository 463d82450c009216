//! Mailbox return codes.
//!
//! The device reports a 16-bit return code with every completed command.
//! Codes 0 through 14 have fixed operator-facing messages that downstream
//! tooling parses, so the text table below must stay verbatim.

use std::fmt;

/// Operator-facing message for each known return code, indexed by code.
pub const STATUS_MESSAGES: [&str; 15] = [
    "Success",
    "Background Command Started",
    "Invalid Parameter",
    "Unsupported",
    "Internal Error",
    "Retry Required",
    "Busy",
    "Media Disabled",
    "FW Transfer in Progress",
    "FW Transfer Out of Order",
    "FW Authentication Failed",
    "FW Invalid Slot",
    "FW Aborted",
    "Invalid Security State",
    "Invalid Payload Length",
];

/// Return code reported by the device for a mailbox command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MailboxStatus {
    /// Command completed.
    Success,
    /// Command accepted and running as a background operation.
    BackgroundCommandStarted,
    /// A payload field was rejected.
    InvalidParameter,
    /// Opcode not supported by this device.
    Unsupported,
    /// Device-internal failure.
    InternalError,
    /// Device asks for the command to be reissued.
    RetryRequired,
    /// Device is processing another command.
    Busy,
    /// Media access is disabled.
    MediaDisabled,
    /// Another firmware transfer is in progress.
    FwTransferInProgress,
    /// Transfer offset or action does not follow the previous step.
    FwTransferOutOfOrder,
    /// Firmware image failed authentication.
    FwAuthenticationFailed,
    /// Slot number is invalid for this operation.
    FwInvalidSlot,
    /// Transfer was aborted.
    FwAborted,
    /// Device security state forbids the command.
    InvalidSecurityState,
    /// Payload length does not match the command.
    InvalidPayloadLength,
    /// Code outside the known table.
    Unknown(u16),
}

impl MailboxStatus {
    /// Decode a raw return code.
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::BackgroundCommandStarted,
            2 => Self::InvalidParameter,
            3 => Self::Unsupported,
            4 => Self::InternalError,
            5 => Self::RetryRequired,
            6 => Self::Busy,
            7 => Self::MediaDisabled,
            8 => Self::FwTransferInProgress,
            9 => Self::FwTransferOutOfOrder,
            10 => Self::FwAuthenticationFailed,
            11 => Self::FwInvalidSlot,
            12 => Self::FwAborted,
            13 => Self::InvalidSecurityState,
            14 => Self::InvalidPayloadLength,
            other => Self::Unknown(other),
        }
    }

    /// Raw return code.
    pub fn code(self) -> u16 {
        match self {
            Self::Success => 0,
            Self::BackgroundCommandStarted => 1,
            Self::InvalidParameter => 2,
            Self::Unsupported => 3,
            Self::InternalError => 4,
            Self::RetryRequired => 5,
            Self::Busy => 6,
            Self::MediaDisabled => 7,
            Self::FwTransferInProgress => 8,
            Self::FwTransferOutOfOrder => 9,
            Self::FwAuthenticationFailed => 10,
            Self::FwInvalidSlot => 11,
            Self::FwAborted => 12,
            Self::InvalidSecurityState => 13,
            Self::InvalidPayloadLength => 14,
            Self::Unknown(code) => code,
        }
    }

    /// Whether the same command may be reissued after a delay.
    ///
    /// Only `Busy` and `BackgroundCommandStarted` qualify; every other
    /// status ends the current step.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Busy | Self::BackgroundCommandStarted)
    }

    /// Whether this is the success code.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Message from the status table, `None` for unknown codes.
    pub fn message(self) -> Option<&'static str> {
        STATUS_MESSAGES.get(usize::from(self.code())).copied()
    }
}

impl fmt::Display for MailboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => f.write_str(msg),
            None => write!(f, "Unknown error (0x{:04X})", self.code()),
        }
    }
}

impl From<u16> for MailboxStatus {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_round_trip_through_table() {
        for code in 0..15u16 {
            let status = MailboxStatus::from_code(code);
            assert_ne!(status, MailboxStatus::Unknown(code));
            assert_eq!(status.code(), code);
            assert_eq!(status.to_string(), STATUS_MESSAGES[usize::from(code)]);
        }
    }

    #[test]
    fn test_table_text_is_stable() {
        assert_eq!(MailboxStatus::Success.to_string(), "Success");
        assert_eq!(MailboxStatus::InvalidParameter.to_string(), "Invalid Parameter");
        assert_eq!(
            MailboxStatus::FwTransferOutOfOrder.to_string(),
            "FW Transfer Out of Order"
        );
        assert_eq!(
            MailboxStatus::InvalidPayloadLength.to_string(),
            "Invalid Payload Length"
        );
    }

    #[test]
    fn test_out_of_range_code_is_unknown() {
        let status = MailboxStatus::from_code(0x15);
        assert_eq!(status, MailboxStatus::Unknown(0x15));
        assert_eq!(status.message(), None);
        assert_eq!(status.to_string(), "Unknown error (0x0015)");
        assert!(!status.is_retryable());
    }

    #[test]
    fn test_retry_classification() {
        assert!(MailboxStatus::Busy.is_retryable());
        assert!(MailboxStatus::BackgroundCommandStarted.is_retryable());
        assert!(!MailboxStatus::Success.is_retryable());
        assert!(!MailboxStatus::RetryRequired.is_retryable());
        assert!(!MailboxStatus::FwAborted.is_retryable());
        assert!(!MailboxStatus::MediaDisabled.is_retryable());
    }
}
