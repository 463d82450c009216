//! Block-by-block firmware transfer.
//!
//! ```text
//! Idle -> Initiating -> Continuing* -> Ending -> Completed
//!              \             |            /
//!               +------> Aborting <------+
//!                           |
//!                        Aborted
//! ```
//!
//! Each step is submitted under the step retry policy and then confirmed by
//! a background poll before the next step is issued. A single-block image is
//! sent as one END step.

use std::time::Duration;

use log::{debug, info, warn};

use super::{FW_BLOCK_SIZE, FW_BYTE_ALIGN, FirmwareUpdater, TransferAction, TransferKind};
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::mailbox::Transport;
use crate::mailbox::payload::encode_transfer;
use crate::poll::poll_until_done;
use crate::retry::{RetryPolicy, with_retry};

/// Default attempts per transfer step while the device reports busy.
pub const DEFAULT_STEP_ATTEMPTS: u32 = 50;

/// Default delay between step attempts.
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(10);

/// Default polls per block confirmation.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 100;

/// Default delay between block confirmation polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Transfer workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferState {
    /// Nothing sent yet.
    Idle,
    /// Sending the first block.
    Initiating,
    /// Sending intermediate blocks.
    Continuing,
    /// Sending the last block.
    Ending,
    /// Device accepted the final block.
    Completed,
    /// Sending the abort request.
    Aborting,
    /// Transfer discarded.
    Aborted,
}

impl TransferState {
    /// State while a step with `action` is in flight.
    pub fn for_action(action: TransferAction) -> Self {
        match action {
            TransferAction::Initiate => Self::Initiating,
            TransferAction::Continue => Self::Continuing,
            TransferAction::End => Self::Ending,
            TransferAction::Abort => Self::Aborting,
        }
    }

    /// Whether the workflow has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// One block of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStep<'a> {
    /// Step index, starting at 0.
    pub index: usize,
    /// Action field.
    pub action: TransferAction,
    /// Offset in `FW_BYTE_ALIGN` units.
    pub offset: u32,
    /// Block data.
    pub data: &'a [u8],
}

/// Ordered transfer steps for an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan<'a> {
    steps: Vec<TransferStep<'a>>,
    total_bytes: usize,
}

impl<'a> TransferPlan<'a> {
    /// Split `image` into `block_size` steps.
    ///
    /// The first step is INITIATE, the last END and everything between
    /// CONTINUE; a single block is one END step.
    pub fn new(image: &'a FirmwareImage, block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        let chunks: Vec<&[u8]> = image.data().chunks(block_size).collect();
        let last = chunks.len().saturating_sub(1);

        let steps = chunks
            .into_iter()
            .enumerate()
            .map(|(index, data)| {
                let action = if index == last {
                    TransferAction::End
                } else if index == 0 {
                    TransferAction::Initiate
                } else {
                    TransferAction::Continue
                };
                Ok(TransferStep {
                    index,
                    action,
                    offset: align_units(index * block_size)?,
                    data,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            steps,
            total_bytes: image.len(),
        })
    }

    /// Plan for a mock transfer: the first block as INITIATE and nothing else.
    ///
    /// Even a single-block image is sent as INITIATE so the device never
    /// commits anything before the abort. Progress is still measured
    /// against the whole image.
    pub fn mock(image: &'a FirmwareImage, block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        let first = &image.data()[..block_size.min(image.len())];
        Ok(Self {
            steps: vec![TransferStep {
                index: 0,
                action: TransferAction::Initiate,
                offset: 0,
                data: first,
            }],
            total_bytes: image.len(),
        })
    }

    /// Steps in submission order.
    pub fn steps(&self) -> &[TransferStep<'a>] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Bytes in the image being transferred.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

fn validate_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || block_size % FW_BYTE_ALIGN != 0 {
        return Err(Error::Config(format!(
            "block size {block_size} must be a positive multiple of {FW_BYTE_ALIGN}"
        )));
    }
    Ok(())
}

fn align_units(byte_offset: usize) -> Result<u32> {
    u32::try_from(byte_offset / FW_BYTE_ALIGN)
        .map_err(|_| Error::Config(format!("offset {byte_offset} does not fit the offset field")))
}

/// Parameters of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Command family.
    pub kind: TransferKind,
    /// Target slot, passed through to the device.
    pub slot: u8,
    /// Block size in bytes.
    pub block_size: usize,
    /// Abort after the first successful step.
    pub mock: bool,
    /// Retry budget for each step submission.
    pub step_retry: RetryPolicy,
    /// Poll budget for each block confirmation.
    pub poll: RetryPolicy,
}

impl TransferConfig {
    /// Default configuration for `kind` and `slot`.
    pub fn new(kind: TransferKind, slot: u8) -> Self {
        Self {
            kind,
            slot,
            block_size: FW_BLOCK_SIZE,
            mock: false,
            step_retry: RetryPolicy::new(DEFAULT_STEP_ATTEMPTS, DEFAULT_STEP_DELAY),
            poll: RetryPolicy::new(DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL),
        }
    }

    /// Enable or disable mock mode.
    #[must_use]
    pub fn with_mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    /// Set the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the per-step retry budget.
    #[must_use]
    pub fn with_step_retry(mut self, policy: RetryPolicy) -> Self {
        self.step_retry = policy;
        self
    }

    /// Set the per-block poll budget.
    #[must_use]
    pub fn with_poll(mut self, policy: RetryPolicy) -> Self {
        self.poll = policy;
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        validate_block_size(self.block_size)?;
        self.step_retry.validate()?;
        self.poll.validate()
    }
}

/// Progress report after each confirmed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Steps confirmed so far.
    pub step: usize,
    /// Steps in the plan.
    pub total_steps: usize,
    /// Action of the confirmed step.
    pub action: TransferAction,
    /// Bytes confirmed so far.
    pub bytes_sent: usize,
    /// Bytes in the plan.
    pub total_bytes: usize,
}

impl TransferProgress {
    /// Completion percentage.
    pub fn percent(&self) -> usize {
        if self.total_bytes == 0 {
            return 100;
        }
        self.bytes_sent * 100 / self.total_bytes
    }
}

/// How a transfer ended when no step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every block was accepted and the device committed the image.
    Completed {
        /// Steps sent.
        blocks: usize,
        /// Bytes sent.
        bytes: usize,
    },
    /// Mock mode: first block accepted, transfer aborted on purpose.
    MockAborted {
        /// Failure of the abort request, if any.
        abort_error: Option<String>,
    },
}

impl TransferOutcome {
    /// Final state of the workflow.
    pub fn state(&self) -> TransferState {
        match self {
            Self::Completed { .. } => TransferState::Completed,
            Self::MockAborted { .. } => TransferState::Aborted,
        }
    }
}

impl<T: Transport> FirmwareUpdater<'_, T> {
    /// Transfer `image` to the slot named in `config`.
    ///
    /// `progress` is called after every confirmed step. Any step failure
    /// (device refusal, exhausted retries or polls, transport error) triggers
    /// one best-effort abort and is returned as `Error::TransferFailed`.
    pub fn transfer<F>(
        &mut self,
        image: &FirmwareImage,
        config: &TransferConfig,
        mut progress: F,
    ) -> Result<TransferOutcome>
    where
        F: FnMut(&TransferProgress),
    {
        config.validate()?;
        let plan = if config.mock {
            TransferPlan::mock(image, config.block_size)?
        } else {
            TransferPlan::new(image, config.block_size)?
        };

        info!(
            "{}: transferring {} bytes to slot {} in {} block(s) via {}{}",
            self.guard.name(),
            plan.total_bytes(),
            config.slot,
            plan.len(),
            config.kind.opcode(),
            if config.mock { " (mock)" } else { "" }
        );

        let mut state = TransferState::Idle;
        let mut bytes_sent = 0;
        let mut last_decile = 0;

        for step in plan.steps() {
            let next = TransferState::for_action(step.action);
            if next != state {
                debug!("{}: transfer {state:?} -> {next:?}", self.guard.name());
                state = next;
            }

            if let Err(source) = self.send_step(step, config) {
                warn!(
                    "{}: step {} ({}) failed: {source}",
                    self.guard.name(),
                    step.index,
                    step.action
                );
                let abort_error = self.abort_transfer(config).err().map(|e| e.to_string());
                return Err(Error::TransferFailed {
                    step: step.index,
                    action: step.action,
                    source: Box::new(source),
                    abort_error,
                });
            }

            bytes_sent += step.data.len();
            let report = TransferProgress {
                step: step.index + 1,
                total_steps: plan.len(),
                action: step.action,
                bytes_sent,
                total_bytes: plan.total_bytes(),
            };
            progress(&report);

            let decile = report.percent() / 10;
            if decile > last_decile {
                last_decile = decile;
                info!("{}: {}% transferred", self.guard.name(), decile * 10);
            }
        }

        if config.mock {
            info!("{}: mock transfer, aborting after first block", self.guard.name());
            let abort_error = self.abort_transfer(config).err().map(|e| e.to_string());
            return Ok(TransferOutcome::MockAborted { abort_error });
        }

        info!(
            "{}: transfer complete, slot {} updated",
            self.guard.name(),
            config.slot
        );
        Ok(TransferOutcome::Completed {
            blocks: plan.len(),
            bytes: bytes_sent,
        })
    }

    /// Submit one step and wait for the device to finish processing it.
    fn send_step(&mut self, step: &TransferStep<'_>, config: &TransferConfig) -> Result<()> {
        let opcode = config.kind.opcode();
        let payload = encode_transfer(step.action, config.slot, step.offset, step.data);
        debug!(
            "{}: step {} {} offset {} ({} bytes)",
            self.guard.name(),
            step.index,
            step.action,
            step.offset,
            step.data.len()
        );

        let mut client = self.guard.client();
        with_retry(&config.step_retry, self.sleeper.as_mut(), || {
            client.submit(opcode, &payload)
        })?;
        poll_until_done(
            &mut client,
            config.kind.status_query(),
            &config.poll,
            self.sleeper.as_mut(),
        )?;
        Ok(())
    }

    /// Send the abort request. Its outcome is logged and returned, never
    /// retried beyond the step policy.
    fn abort_transfer(&mut self, config: &TransferConfig) -> Result<()> {
        let name = self.guard.name().to_string();
        debug!("{name}: transfer {:?}", TransferState::Aborting);

        let opcode = config.kind.opcode();
        let dummy = vec![0u8; config.block_size];
        let payload = encode_transfer(TransferAction::Abort, config.slot, 0, &dummy);

        let mut client = self.guard.client();
        let result = with_retry(&config.step_retry, self.sleeper.as_mut(), || {
            client.submit(opcode, &payload)
        });

        match &result {
            Ok(_) => info!("{name}: transfer {:?}", TransferState::Aborted),
            Err(e) => warn!("{name}: abort failed, device may need a fresh transfer: {e}"),
        }
        result.map(|_| ())
    }
}
