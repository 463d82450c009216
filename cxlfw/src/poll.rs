//! Background operation polling.
//!
//! Long-running commands (firmware block processing, activation) complete
//! asynchronously on the device. The poller issues a status query until the
//! operation reports it is no longer running.

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::mailbox::payload::BackgroundStatus;
use crate::mailbox::{MailboxClient, Opcode, Transport};
use crate::retry::{self, Attempt, RetryError, RetryPolicy, Sleeper};

/// Which status command to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StatusQuery {
    /// Get Background Operation Status, CXL-defined layout.
    Spec,
    /// Vendor hidden-background-operation status.
    Hbo,
}

impl StatusQuery {
    /// Opcode of the status command.
    pub fn opcode(self) -> Opcode {
        match self {
            Self::Spec => Opcode::GetBackgroundStatus,
            Self::Hbo => Opcode::HboStatus,
        }
    }

    /// Decode a status reply.
    pub fn decode(self, payload: &[u8]) -> Result<BackgroundStatus> {
        match self {
            Self::Spec => BackgroundStatus::decode_spec(payload),
            Self::Hbo => BackgroundStatus::decode_hbo(payload),
        }
    }
}

/// Issue a single status query.
pub fn query_status<T: Transport + ?Sized>(
    client: &mut MailboxClient<'_, T>,
    query: StatusQuery,
) -> Result<BackgroundStatus> {
    let payload = client.submit(query.opcode(), &[])?;
    query.decode(&payload)
}

/// Poll until the background operation is no longer running.
///
/// A retryable mailbox status on the query itself counts as an attempt. A
/// finished operation with a non-success return code is
/// `Error::BackgroundFailed`; running out of attempts is
/// `Error::PollExhausted`.
pub fn poll_until_done<T: Transport + ?Sized>(
    client: &mut MailboxClient<'_, T>,
    query: StatusQuery,
    policy: &RetryPolicy,
    sleeper: &mut dyn Sleeper,
) -> Result<BackgroundStatus> {
    let mut last_percent = 0;
    // Stays on the status command itself if no poll ever reported a running op.
    let mut last_opcode = query.opcode().code();

    let outcome = retry::run(policy, sleeper, |attempt| {
        let status = match query_status(client, query) {
            Ok(status) => status,
            Err(err) if err.is_retryable() => {
                trace!("{}: status query deferred: {err}", client.name());
                return Attempt::Pending(());
            },
            Err(err) => return Attempt::Failed(err),
        };

        if status.in_progress {
            last_percent = status.percent;
            last_opcode = status.opcode;
            trace!(
                "{}: background 0x{:04X} at {}% (poll {attempt}/{})",
                client.name(),
                status.opcode,
                status.percent,
                policy.max_attempts
            );
            return Attempt::Pending(());
        }

        if status.status().is_success() {
            debug!(
                "{}: background operation done after {attempt} poll(s)",
                client.name()
            );
            Attempt::Done(status)
        } else {
            Attempt::Failed(Error::BackgroundFailed {
                opcode: status.opcode,
                status: status.status(),
            })
        }
    });

    outcome.map_err(|err| match err {
        RetryError::Exhausted { attempts, .. } => Error::PollExhausted {
            opcode: last_opcode,
            attempts,
            percent: last_percent,
        },
        RetryError::Deadline { attempts, .. } => Error::DeadlineExceeded {
            what: format!("polling {}", query.opcode()),
            limit: policy.deadline.unwrap_or_default(),
            attempts,
        },
        RetryError::Failed(err) => err,
    })
}
