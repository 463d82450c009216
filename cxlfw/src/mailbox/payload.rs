//! Mailbox payload layouts.
//!
//! ## Transfer FW input payload
//!
//! ```text
//! +--------+------+----------+----------+------------+----------------+
//! | Action | Slot | Reserved |  Offset  |  Reserved  |      Data      |
//! +--------+------+----------+----------+------------+----------------+
//! | 1      | 1    | 2        | 4 (LE)   |  120       |  block bytes   |
//! +--------+------+----------+----------+------------+----------------+
//! ```
//!
//! The offset field counts `FW_BYTE_ALIGN` units, not bytes.
//!
//! ## Background status (CXL-defined layout, 8 bytes)
//!
//! ```text
//! byte 0     bit 0 in progress, bits 7:1 percent complete
//! byte 1     reserved
//! bytes 2-3  opcode of the background command
//! bytes 4-5  return code
//! bytes 6-7  vendor extended status
//! ```
//!
//! ## Background status (HBO layout, one LE u64)
//!
//! ```text
//! bits 15:0   opcode
//! bits 22:16  percent complete
//! bit  23     running
//! bits 47:32  return code
//! bits 63:48  vendor extended status
//! ```

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};
use crate::firmware::TransferAction;
use crate::mailbox::MailboxStatus;

/// Bytes preceding the block data in a Transfer FW payload.
pub const TRANSFER_HEADER_LEN: usize = 128;

/// Length of a CXL-defined background status reply.
pub const BG_STATUS_LEN: usize = 8;

/// Length of an HBO background status reply.
pub const HBO_STATUS_LEN: usize = 8;

/// Length of a Get FW Info reply.
pub const FW_INFO_LEN: usize = 0x50;

/// Length of a slot revision string.
pub const FW_REVISION_LEN: usize = 16;

/// Maximum number of slots described by Get FW Info.
pub const MAX_FW_SLOTS: usize = 4;

const FW_INFO_REVISION_OFFSET: usize = 0x10;

/// Build a Transfer FW input payload.
///
/// `offset` is already expressed in alignment units.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode_transfer(action: TransferAction, slot: u8, offset: u32, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TRANSFER_HEADER_LEN + data.len());
    buf.push(action.code());
    buf.push(slot);
    buf.write_u16::<LittleEndian>(0).unwrap();
    buf.write_u32::<LittleEndian>(offset).unwrap();
    buf.resize(TRANSFER_HEADER_LEN, 0);
    buf.extend_from_slice(data);
    buf
}

/// Decoded Transfer FW request header plus data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest<'a> {
    /// Raw action byte.
    pub action: u8,
    /// Target slot.
    pub slot: u8,
    /// Offset in alignment units.
    pub offset: u32,
    /// Block data.
    pub data: &'a [u8],
}

impl<'a> TransferRequest<'a> {
    /// Parse a Transfer FW input payload.
    pub fn parse(payload: &'a [u8]) -> Option<Self> {
        if payload.len() < TRANSFER_HEADER_LEN {
            return None;
        }
        Some(Self {
            action: payload[0],
            slot: payload[1],
            offset: LittleEndian::read_u32(&payload[4..8]),
            data: &payload[TRANSFER_HEADER_LEN..],
        })
    }
}

/// Build an Activate FW input payload.
pub fn encode_activate(action: u8, slot: u8) -> Vec<u8> {
    vec![action, slot]
}

/// Background operation status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackgroundStatus {
    /// Operation still running.
    pub in_progress: bool,
    /// Completion percentage (0-100).
    pub percent: u8,
    /// Opcode of the background command.
    pub opcode: u16,
    /// Return code of the background command.
    pub return_code: u16,
    /// Vendor extended status.
    pub vendor_status: u16,
}

impl BackgroundStatus {
    /// Status of a finished, successful operation.
    pub fn idle() -> Self {
        Self {
            in_progress: false,
            percent: 100,
            opcode: 0,
            return_code: MailboxStatus::Success.code(),
            vendor_status: 0,
        }
    }

    /// Decoded return code.
    pub fn status(&self) -> MailboxStatus {
        MailboxStatus::from_code(self.return_code)
    }

    /// Decode the CXL-defined layout.
    pub fn decode_spec(payload: &[u8]) -> Result<Self> {
        if payload.len() < BG_STATUS_LEN {
            return Err(Error::Protocol(format!(
                "background status reply too short: {} bytes, expected {BG_STATUS_LEN}",
                payload.len()
            )));
        }
        Ok(Self {
            in_progress: payload[0] & 0x01 != 0,
            percent: payload[0] >> 1,
            opcode: LittleEndian::read_u16(&payload[2..4]),
            return_code: LittleEndian::read_u16(&payload[4..6]),
            vendor_status: LittleEndian::read_u16(&payload[6..8]),
        })
    }

    /// Encode the CXL-defined layout.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode_spec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BG_STATUS_LEN);
        buf.push((self.percent.min(100) << 1) | u8::from(self.in_progress));
        buf.push(0);
        buf.write_u16::<LittleEndian>(self.opcode).unwrap();
        buf.write_u16::<LittleEndian>(self.return_code).unwrap();
        buf.write_u16::<LittleEndian>(self.vendor_status).unwrap();
        buf
    }

    /// Decode the HBO layout.
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode_hbo(payload: &[u8]) -> Result<Self> {
        if payload.len() < HBO_STATUS_LEN {
            return Err(Error::Protocol(format!(
                "HBO status reply too short: {} bytes, expected {HBO_STATUS_LEN}",
                payload.len()
            )));
        }
        let raw = LittleEndian::read_u64(&payload[..HBO_STATUS_LEN]);
        Ok(Self {
            in_progress: (raw >> 23) & 0x1 != 0,
            percent: ((raw >> 16) & 0x7F) as u8,
            opcode: (raw & 0xFFFF) as u16,
            return_code: ((raw >> 32) & 0xFFFF) as u16,
            vendor_status: ((raw >> 48) & 0xFFFF) as u16,
        })
    }

    /// Encode the HBO layout.
    pub fn encode_hbo(&self) -> Vec<u8> {
        let raw = u64::from(self.opcode)
            | (u64::from(self.percent.min(100)) << 16)
            | (u64::from(self.in_progress) << 23)
            | (u64::from(self.return_code) << 32)
            | (u64::from(self.vendor_status) << 48);
        raw.to_le_bytes().to_vec()
    }
}

/// Decoded Get FW Info reply.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FwInfo {
    /// Number of firmware slots.
    pub slots_supported: u8,
    /// Slot running now (1-based, 0 if none).
    pub active_slot: u8,
    /// Slot activated on next cold reset (0 if none).
    pub staged_slot: u8,
    /// Device can activate without a reset.
    pub online_activation: bool,
    /// Revision string per slot, `None` when the slot is empty.
    pub revisions: Vec<Option<String>>,
}

impl FwInfo {
    /// Decode a Get FW Info reply.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < FW_INFO_LEN {
            return Err(Error::Protocol(format!(
                "FW info reply too short: {} bytes, expected {FW_INFO_LEN}",
                payload.len()
            )));
        }

        let slots_supported = payload[0];
        let slot_info = payload[1];
        let slots = usize::from(slots_supported).min(MAX_FW_SLOTS);

        let revisions = (0..slots)
            .map(|i| {
                let start = FW_INFO_REVISION_OFFSET + i * FW_REVISION_LEN;
                let raw = &payload[start..start + FW_REVISION_LEN];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let text = String::from_utf8_lossy(&raw[..end]).trim().to_string();
                (!text.is_empty()).then_some(text)
            })
            .collect();

        Ok(Self {
            slots_supported,
            active_slot: slot_info & 0x07,
            staged_slot: (slot_info >> 3) & 0x07,
            online_activation: payload[2] & 0x01 != 0,
            revisions,
        })
    }

    /// Encode a Get FW Info reply.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; FW_INFO_LEN];
        buf[0] = self.slots_supported;
        buf[1] = (self.active_slot & 0x07) | ((self.staged_slot & 0x07) << 3);
        buf[2] = u8::from(self.online_activation);
        for (i, rev) in self.revisions.iter().take(MAX_FW_SLOTS).enumerate() {
            if let Some(rev) = rev {
                let start = FW_INFO_REVISION_OFFSET + i * FW_REVISION_LEN;
                let bytes = rev.as_bytes();
                let n = bytes.len().min(FW_REVISION_LEN);
                buf[start..start + n].copy_from_slice(&bytes[..n]);
            }
        }
        buf
    }

    /// Revision of a 1-based slot.
    pub fn revision(&self, slot: u8) -> Option<&str> {
        let index = usize::from(slot).checked_sub(1)?;
        self.revisions.get(index)?.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_payload_layout() {
        let data = [0xAAu8; 44];
        let payload = encode_transfer(TransferAction::End, 2, 3, &data);
        assert_eq!(payload.len(), TRANSFER_HEADER_LEN + 44);
        assert_eq!(payload[0], 3); // End
        assert_eq!(payload[1], 2);
        assert_eq!(&payload[2..4], &[0, 0]);
        assert_eq!(&payload[4..8], &[3, 0, 0, 0]);
        assert!(payload[8..TRANSFER_HEADER_LEN].iter().all(|&b| b == 0));
        assert_eq!(&payload[TRANSFER_HEADER_LEN..], &data[..]);

        let parsed = TransferRequest::parse(&payload).unwrap();
        assert_eq!(parsed.action, 3);
        assert_eq!(parsed.slot, 2);
        assert_eq!(parsed.offset, 3);
        assert_eq!(parsed.data.len(), 44);
    }

    #[test]
    fn test_transfer_request_rejects_short_payload() {
        assert!(TransferRequest::parse(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_activate_payload() {
        assert_eq!(encode_activate(1, 2), vec![1, 2]);
    }

    #[test]
    fn test_spec_status_bit_layout() {
        // 42% in progress, opcode 0x0201, return code Success.
        let raw = [(42 << 1) | 1, 0, 0x01, 0x02, 0x00, 0x00, 0x34, 0x12];
        let status = BackgroundStatus::decode_spec(&raw).unwrap();
        assert!(status.in_progress);
        assert_eq!(status.percent, 42);
        assert_eq!(status.opcode, 0x0201);
        assert_eq!(status.status(), MailboxStatus::Success);
        assert_eq!(status.vendor_status, 0x1234);
        assert_eq!(status.encode_spec(), raw.to_vec());
    }

    #[test]
    fn test_hbo_status_bit_layout() {
        let status = BackgroundStatus {
            in_progress: true,
            percent: 75,
            opcode: 0xCD02,
            return_code: MailboxStatus::FwAuthenticationFailed.code(),
            vendor_status: 0xBEEF,
        };
        let raw = u64::from_le_bytes(status.encode_hbo().try_into().unwrap());
        assert_eq!(raw & 0xFFFF, 0xCD02);
        assert_eq!((raw >> 16) & 0x7F, 75);
        assert_eq!((raw >> 23) & 1, 1);
        assert_eq!((raw >> 32) & 0xFFFF, 10);
        assert_eq!(raw >> 48, 0xBEEF);
        assert_eq!(BackgroundStatus::decode_hbo(&raw.to_le_bytes()).unwrap(), status);
    }

    #[test]
    fn test_status_rejects_short_reply() {
        assert!(matches!(
            BackgroundStatus::decode_spec(&[0; 4]),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            BackgroundStatus::decode_hbo(&[0; 7]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_fw_info_decode() {
        let mut raw = vec![0u8; FW_INFO_LEN];
        raw[0] = 4;
        raw[1] = 0x02 | (0x03 << 3);
        raw[2] = 0x01;
        raw[0x10..0x10 + 7].copy_from_slice(b"1.0.0-a");
        raw[0x20..0x20 + 7].copy_from_slice(b"1.2.0-b");

        let info = FwInfo::decode(&raw).unwrap();
        assert_eq!(info.slots_supported, 4);
        assert_eq!(info.active_slot, 2);
        assert_eq!(info.staged_slot, 3);
        assert!(info.online_activation);
        assert_eq!(info.revisions.len(), 4);
        assert_eq!(info.revision(1), Some("1.0.0-a"));
        assert_eq!(info.revision(2), Some("1.2.0-b"));
        assert_eq!(info.revision(3), None);
        assert_eq!(info.revision(0), None);
        assert_eq!(info.encode(), raw);
    }

    #[test]
    fn test_fw_info_rejects_short_reply() {
        assert!(FwInfo::decode(&[0; 16]).is_err());
    }
}
