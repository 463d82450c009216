//! Mailbox command interface.
//!
//! The mailbox is the command/response interface a CXL memory device exposes
//! for administrative commands. The actual transport (kernel ioctl, test
//! double, emulator) sits behind the [`Transport`] trait; [`MailboxClient`]
//! turns raw return codes into typed errors.
//!
//! ```text
//! +------------------+
//! |  Workflows       |  transfer, activate, fw info
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |  Retry / Poller  |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |  MailboxClient   |  status code -> Error
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |  Transport       |  opcode + payload -> status + payload
//! +------------------+
//! ```

pub mod payload;
pub mod status;

use std::fmt;
use std::io;

use log::trace;

use crate::error::{Error, Result};

pub use status::{MailboxStatus, STATUS_MESSAGES};

/// Mailbox command opcodes used by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Get Background Operation Status (0x0002).
    GetBackgroundStatus = 0x0002,
    /// Get FW Info (0x0200).
    GetFwInfo = 0x0200,
    /// Transfer FW (0x0201).
    TransferFw = 0x0201,
    /// Activate FW (0x0202).
    ActivateFw = 0x0202,
    /// Vendor hidden-background-operation status (0xCD00).
    HboStatus = 0xCD00,
    /// Vendor background firmware transfer (0xCD01).
    HboTransferFw = 0xCD01,
    /// Vendor background firmware activation (0xCD02).
    HboActivateFw = 0xCD02,
    /// Vendor OS image transfer (0xCD04).
    HboTransferOsImage = 0xCD04,
}

impl Opcode {
    /// Raw 16-bit opcode.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Decode a raw opcode known to this crate.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0002 => Some(Self::GetBackgroundStatus),
            0x0200 => Some(Self::GetFwInfo),
            0x0201 => Some(Self::TransferFw),
            0x0202 => Some(Self::ActivateFw),
            0xCD00 => Some(Self::HboStatus),
            0xCD01 => Some(Self::HboTransferFw),
            0xCD02 => Some(Self::HboActivateFw),
            0xCD04 => Some(Self::HboTransferOsImage),
            _ => None,
        }
    }

    /// Short human-readable command name.
    pub fn name(self) -> &'static str {
        match self {
            Self::GetBackgroundStatus => "get-bg-status",
            Self::GetFwInfo => "get-fw-info",
            Self::TransferFw => "transfer-fw",
            Self::ActivateFw => "activate-fw",
            Self::HboStatus => "hbo-status",
            Self::HboTransferFw => "hbo-transfer-fw",
            Self::HboActivateFw => "hbo-activate-fw",
            Self::HboTransferOsImage => "hbo-transfer-os",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X})", self.name(), self.code())
    }
}

/// Raw reply from a transport: return code plus output payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Device return code.
    pub status: u16,
    /// Output payload (empty when the command returns none).
    pub payload: Vec<u8>,
}

impl RawResponse {
    /// Reply with a return code and no payload.
    pub fn status(status: MailboxStatus) -> Self {
        Self {
            status: status.code(),
            payload: Vec::new(),
        }
    }

    /// Successful reply carrying a payload.
    pub fn success(payload: Vec<u8>) -> Self {
        Self {
            status: MailboxStatus::Success.code(),
            payload,
        }
    }
}

/// Blocking mailbox transport.
///
/// Implementations submit exactly one command per call and return the
/// device's return code. I/O failures (device node gone, ioctl failure,
/// transport timeout) are reported through `io::Error`.
pub trait Transport {
    /// Submit a command and wait for its completion.
    fn submit(&mut self, opcode: u16, payload: &[u8]) -> io::Result<RawResponse>;

    /// Transport name used in diagnostics (e.g. "mem0").
    fn name(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn submit(&mut self, opcode: u16, payload: &[u8]) -> io::Result<RawResponse> {
        (**self).submit(opcode, payload)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&mut self, opcode: u16, payload: &[u8]) -> io::Result<RawResponse> {
        (**self).submit(opcode, payload)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Single-shot mailbox client.
///
/// Submits one request and classifies the result. Never retries, sleeps or
/// validates payload sizes.
pub struct MailboxClient<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: Transport + ?Sized> MailboxClient<'a, T> {
    /// Wrap a transport.
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Transport name.
    pub fn name(&self) -> &str {
        self.transport.name()
    }

    /// Submit a command.
    ///
    /// Returns the output payload on `Success`, `Error::Device` for any other
    /// return code and `Error::Transport` when the exchange itself failed.
    pub fn submit(&mut self, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>> {
        trace!(
            "{}: submit {} with {} payload bytes",
            self.transport.name(),
            opcode,
            payload.len()
        );

        let response = self
            .transport
            .submit(opcode.code(), payload)
            .map_err(|source| Error::Transport { opcode, source })?;

        let status = MailboxStatus::from_code(response.status);
        trace!("{}: {} -> {}", self.transport.name(), opcode, status);

        if status.is_success() {
            Ok(response.payload)
        } else {
            Err(Error::Device { opcode, status })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for op in [
            Opcode::GetBackgroundStatus,
            Opcode::GetFwInfo,
            Opcode::TransferFw,
            Opcode::ActivateFw,
            Opcode::HboStatus,
            Opcode::HboTransferFw,
            Opcode::HboActivateFw,
            Opcode::HboTransferOsImage,
        ] {
            assert_eq!(Opcode::from_code(op.code()), Some(op));
        }
        assert_eq!(Opcode::from_code(0x4000), None);
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(Opcode::TransferFw.to_string(), "transfer-fw (0x0201)");
        assert_eq!(Opcode::HboStatus.to_string(), "hbo-status (0xCD00)");
    }

    #[test]
    fn test_submit_success_returns_payload() {
        let mut transport = ScriptedTransport::new(RawResponse::success(vec![1, 2, 3]));
        let mut client = MailboxClient::new(&mut transport);
        let out = client.submit(Opcode::GetFwInfo, &[]).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(transport.opcodes(), vec![0x0200]);
    }

    #[test]
    fn test_submit_maps_device_status() {
        let mut transport = ScriptedTransport::new(RawResponse::status(MailboxStatus::FwInvalidSlot));
        let mut client = MailboxClient::new(&mut transport);
        let err = client.submit(Opcode::ActivateFw, &[0, 1]).unwrap_err();
        assert!(matches!(
            err,
            Error::Device {
                opcode: Opcode::ActivateFw,
                status: MailboxStatus::FwInvalidSlot
            }
        ));
    }

    #[test]
    fn test_submit_maps_unknown_status() {
        let mut transport = ScriptedTransport::new(RawResponse {
            status: 0x99,
            payload: Vec::new(),
        });
        let mut client = MailboxClient::new(&mut transport);
        let err = client.submit(Opcode::TransferFw, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::Device {
                status: MailboxStatus::Unknown(0x99),
                ..
            }
        ));
    }

    #[test]
    fn test_submit_maps_transport_failure() {
        let mut transport = ScriptedTransport::new(RawResponse::success(Vec::new()));
        transport.push_error(io::ErrorKind::TimedOut);
        let mut client = MailboxClient::new(&mut transport);
        let err = client.submit(Opcode::TransferFw, &[]).unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(!err.is_retryable());
    }
}
