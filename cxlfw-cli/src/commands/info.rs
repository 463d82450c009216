//! `fw-info` and `bg-status` command implementations.

use anyhow::{Context, Result};
use cxlfw::firmware::FirmwareUpdater;
use cxlfw::mailbox::payload::{BackgroundStatus, FwInfo};
use cxlfw::mailbox::{MailboxClient, Opcode};
use cxlfw::poll::{self, StatusQuery};
use rust_i18n::t;
use serde_json::json;

use crate::Cli;
use crate::config::Config;

/// Print firmware slot information.
pub(crate) fn cmd_fw_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let device = cli.device_name(config).to_string();
    let mut backend = cli.open_backend(config)?;
    let info = FirmwareUpdater::new(backend.device_mut())
        .with_context(|| t!("error.claim_device").to_string())?
        .firmware_info()
        .with_context(|| t!("error.query_failed").to_string())?;

    if json {
        println!("{}", fw_info_json(&device, &info));
    } else {
        print_fw_info(&device, &info);
    }
    Ok(())
}

fn fw_info_json(device: &str, info: &FwInfo) -> String {
    let slots: Vec<serde_json::Value> = (1..=info.slots_supported)
        .map(|slot| {
            json!({
                "slot": slot,
                "revision": info.revision(slot),
                "active": slot == info.active_slot,
                "staged": slot == info.staged_slot,
            })
        })
        .collect();
    let value = json!({
        "device": device,
        "slots_supported": info.slots_supported,
        "active_slot": info.active_slot,
        "staged_slot": (info.staged_slot != 0).then_some(info.staged_slot),
        "online_activation": info.online_activation,
        "slots": slots,
    });
    serde_json::to_string_pretty(&value).unwrap_or_default()
}

fn print_fw_info(device: &str, info: &FwInfo) {
    let none = t!("common.none");
    println!("{}", t!("info.device", device = device));
    println!("{}", t!("info.slots_supported", count = info.slots_supported));
    println!("{}", t!("info.active_slot", slot = info.active_slot));
    if info.staged_slot == 0 {
        println!("{}", t!("info.staged_slot", slot = none));
    } else {
        println!("{}", t!("info.staged_slot", slot = info.staged_slot));
    }
    let online = if info.online_activation {
        t!("common.yes")
    } else {
        t!("common.no")
    };
    println!("{}", t!("info.online_activation", value = online));

    println!();
    for slot in 1..=info.slots_supported {
        let revision = info
            .revision(slot)
            .map_or_else(|| t!("info.empty_slot").to_string(), str::to_string);
        let mut tags = Vec::new();
        if slot == info.active_slot {
            tags.push(t!("info.tag_active").to_string());
        }
        if slot == info.staged_slot {
            tags.push(t!("info.tag_staged").to_string());
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" ({})", tags.join(", "))
        };
        println!("  {}", t!("info.slot_line", slot = slot, revision = revision, tags = tags));
    }
}

/// Print the status of the last background operation.
///
/// This is a read-only query, so it does not claim the device and works
/// while another operation is running.
pub(crate) fn cmd_bg_status(cli: &Cli, config: &Config, hbo: bool, json: bool) -> Result<()> {
    let device = cli.device_name(config).to_string();
    let query = if hbo {
        StatusQuery::Hbo
    } else {
        StatusQuery::Spec
    };

    let mut backend = cli.open_backend(config)?;
    let mut client = MailboxClient::new(backend.device_mut().transport_mut());
    let status = poll::query_status(&mut client, query)
        .with_context(|| t!("error.query_failed").to_string())?;

    if json {
        println!("{}", bg_status_json(&device, &status));
    } else {
        print_bg_status(&device, &status);
    }
    Ok(())
}

fn opcode_label(code: u16) -> String {
    Opcode::from_code(code).map_or_else(|| format!("0x{code:04X}"), |op| op.to_string())
}

fn bg_status_json(device: &str, status: &BackgroundStatus) -> String {
    let value = json!({
        "device": device,
        "in_progress": status.in_progress,
        "percent": status.percent,
        "opcode": status.opcode,
        "command": Opcode::from_code(status.opcode).map(Opcode::name),
        "return_code": status.return_code,
        "status": status.status().to_string(),
        "vendor_status": status.vendor_status,
    });
    serde_json::to_string_pretty(&value).unwrap_or_default()
}

fn print_bg_status(device: &str, status: &BackgroundStatus) {
    let state = if status.in_progress {
        t!("status.running", percent = status.percent)
    } else {
        t!("status.idle")
    };
    println!("{}", t!("info.device", device = device));
    println!("{}", t!("status.state", state = state));
    println!("{}", t!("status.command", command = opcode_label(status.opcode)));
    println!(
        "{}",
        t!(
            "status.result",
            status = status.status(),
            code = status.return_code
        )
    );
    if status.vendor_status != 0 {
        println!(
            "{}",
            t!("status.vendor", code = format!("0x{:04X}", status.vendor_status))
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> FwInfo {
        FwInfo {
            slots_supported: 3,
            active_slot: 1,
            staged_slot: 2,
            online_activation: true,
            revisions: vec![Some("1.0.0".into()), Some("1.1.0".into()), None],
        }
    }

    #[test]
    fn test_fw_info_json() {
        let parsed: serde_json::Value =
            serde_json::from_str(&fw_info_json("mem0", &sample_info())).unwrap();
        assert_eq!(parsed["device"], "mem0");
        assert_eq!(parsed["slots_supported"], 3);
        assert_eq!(parsed["staged_slot"], 2);
        assert_eq!(parsed["slots"][0]["revision"], "1.0.0");
        assert_eq!(parsed["slots"][0]["active"], true);
        assert_eq!(parsed["slots"][1]["staged"], true);
        assert!(parsed["slots"][2]["revision"].is_null());
    }

    #[test]
    fn test_fw_info_json_without_staged_slot() {
        let mut info = sample_info();
        info.staged_slot = 0;
        let parsed: serde_json::Value =
            serde_json::from_str(&fw_info_json("mem0", &info)).unwrap();
        assert!(parsed["staged_slot"].is_null());
    }

    #[test]
    fn test_bg_status_json() {
        let status = BackgroundStatus {
            in_progress: true,
            percent: 40,
            opcode: 0x0201,
            return_code: 0,
            vendor_status: 0,
        };
        let parsed: serde_json::Value =
            serde_json::from_str(&bg_status_json("mem1", &status)).unwrap();
        assert_eq!(parsed["in_progress"], true);
        assert_eq!(parsed["percent"], 40);
        assert_eq!(parsed["opcode"], 0x0201);
        assert_eq!(parsed["command"], "transfer-fw");
        assert_eq!(parsed["status"], "Success");
    }

    #[test]
    fn test_opcode_label() {
        assert_eq!(opcode_label(0x0202), "activate-fw (0x0202)");
        assert_eq!(opcode_label(0x1234), "0x1234");
    }
}
