//! `activate-fw` command implementation.

use anyhow::{Context, Result};
use console::style;
use cxlfw::firmware::{ActivateKind, ActivationAction, ActivationRequest, FirmwareUpdater};
use dialoguer::{Confirm, Error as DialoguerError, theme::ColorfulTheme};
use rust_i18n::t;
use std::io::IsTerminal;

use crate::config::Config;
use crate::{Cli, CliError};

/// Activate a firmware slot.
pub(crate) fn cmd_activate_fw(
    cli: &Cli,
    config: &Config,
    slot: u8,
    action: ActivationAction,
    hbo: bool,
    yes: bool,
) -> Result<()> {
    let device = cli.device_name(config).to_string();
    if !yes {
        confirm_activation(cli, &device, slot, action)?;
    }

    let kind = if hbo {
        ActivateKind::VendorBackground
    } else {
        ActivateKind::SpecDefined
    };
    let request = ActivationRequest::new(action, slot).with_kind(kind);
    let activation = config.activation_config();

    let mut backend = cli.open_backend(config)?;
    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("⏳").yellow(),
            t!(
                "activate.activating",
                slot = slot,
                action = action,
                device = device
            )
        );
    }

    let result = {
        let mut updater = FirmwareUpdater::new(backend.device_mut())
            .with_context(|| t!("error.claim_device").to_string())?;
        updater.activate(&request, &activation)
    };
    backend
        .save_after(result)?
        .with_context(|| t!("error.activate_failed", slot = slot).to_string())?;

    if !cli.quiet {
        let done = match action {
            ActivationAction::Online => t!("activate.completed_online", slot = slot),
            ActivationAction::OnNextReset => t!("activate.completed_on_reset", slot = slot),
        };
        eprintln!("{} {}", style("✓").green().bold(), done);
    }

    Ok(())
}

/// Ask before switching firmware; refuse when no one can answer.
fn confirm_activation(cli: &Cli, device: &str, slot: u8, action: ActivationAction) -> Result<()> {
    if cli.non_interactive || !std::io::stdin().is_terminal() {
        return Err(CliError::Usage(t!("activate.need_yes").to_string()).into());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(
            t!(
                "activate.confirm",
                slot = slot,
                action = action,
                device = device
            )
            .to_string(),
        )
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled(t!("activate.cancelled").to_string()).into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled(t!("activate.cancelled").to_string()).into()
            } else {
                CliError::Usage(t!("common.prompt_failed").to_string()).into()
            }
        },
    }
}
