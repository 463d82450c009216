//! `update-fw` command implementation.

use anyhow::{Context, Result};
use console::style;
use cxlfw::firmware::{FirmwareUpdater, TransferKind, TransferOutcome};
use cxlfw::FirmwareImage;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use rust_i18n::t;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, use_fancy_output};

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Transfer an image to the device.
pub(crate) fn cmd_update_fw(
    cli: &Cli,
    config: &Config,
    image_path: &Path,
    slot: u8,
    hbo: bool,
    os: bool,
    mock: bool,
) -> Result<()> {
    let kind = TransferKind::from_flags(hbo, os)?;
    let transfer = config.transfer_config(kind, slot, mock);
    transfer.validate()?;

    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("📦").cyan(),
            t!("update.loading_image", path = image_path.display())
        );
    }
    let image = FirmwareImage::from_file(image_path).with_context(|| {
        t!("error.load_image", path = image_path.display().to_string()).to_string()
    })?;

    let mut backend = cli.open_backend(config)?;
    if !cli.quiet {
        let target = if kind == TransferKind::OsImage {
            t!("update.os_target").to_string()
        } else {
            t!("update.slot_target", slot = slot).to_string()
        };
        eprintln!(
            "{} {}",
            style("⏳").yellow(),
            t!(
                "update.transferring",
                bytes = image.len(),
                blocks = image.block_count(transfer.block_size),
                target = target,
                device = cli.device_name(config)
            )
        );
    }

    let pb = progress_bar(cli.quiet);
    let result = {
        let mut updater = FirmwareUpdater::new(backend.device_mut())
            .with_context(|| t!("error.claim_device").to_string())?;
        updater.transfer(&image, &transfer, |p| {
            pb.set_position(p.percent() as u64);
            pb.set_message(p.action.to_string());
        })
    };
    let result = backend.save_after(result)?;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            pb.abandon_with_message(t!("common.failed").to_string());
            return Err(err).context(t!("error.transfer_failed").to_string());
        },
    };

    match outcome {
        TransferOutcome::Completed { blocks, bytes } => {
            pb.finish_with_message(t!("common.complete").to_string());
            if !cli.quiet {
                eprintln!(
                    "\n{} {}",
                    style("✓").green().bold(),
                    t!("update.completed", blocks = blocks, bytes = bytes)
                );
            }
        },
        TransferOutcome::MockAborted { abort_error } => {
            pb.abandon_with_message(t!("update.mock_label").to_string());
            if let Some(e) = abort_error {
                warn!("{}", t!("update.mock_abort_failed", error = e));
            }
            if !cli.quiet {
                eprintln!(
                    "\n{} {}",
                    style("✓").green().bold(),
                    t!("update.mock_completed")
                );
            }
        },
    }

    Ok(())
}
