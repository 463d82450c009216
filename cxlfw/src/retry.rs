//! Bounded fixed-delay retry.
//!
//! [`run`] is the decision loop shared by mailbox retries and background
//! polling: call the operation, stop on a result or a hard failure, otherwise
//! sleep and try again until the attempt budget (or the optional wall-clock
//! ceiling) is spent. Backoff is a fixed delay.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{Error, Result};

/// Attempt budget for one mailbox call or one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// Maximum number of calls, including the first.
    pub max_attempts: u32,
    /// Delay between calls.
    pub delay: Duration,
    /// Optional wall-clock ceiling across all attempts.
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget and delay.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            deadline: None,
        }
    }

    /// Add a wall-clock ceiling.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Worst-case time spent sleeping under this policy.
    pub fn budget(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }

    /// Check the policy is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Blocking delay between attempts.
pub trait Sleeper {
    /// Block for `duration`.
    fn sleep(&mut self, duration: Duration);
}

impl<S: Sleeper + ?Sized> Sleeper for &mut S {
    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Sleeper backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Result of one attempt.
#[derive(Debug)]
pub enum Attempt<T, P> {
    /// Finished with a value.
    Done(T),
    /// Not finished yet; try again. Carries what was observed.
    Pending(P),
    /// Finished with a failure that retrying cannot fix.
    Failed(Error),
}

/// Why [`run`] gave up.
#[derive(Debug)]
pub enum RetryError<P> {
    /// Every attempt returned `Pending`.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Last pending observation.
        last: P,
    },
    /// Wall-clock ceiling reached first.
    Deadline {
        /// Attempts made.
        attempts: u32,
        /// Last pending observation.
        last: P,
    },
    /// An attempt failed.
    Failed(Error),
}

/// Drive `op` under `policy`.
///
/// `op` receives the 1-based attempt number. The sleeper is called between
/// attempts only, never after the final one.
pub fn run<T, P>(
    policy: &RetryPolicy,
    sleeper: &mut dyn Sleeper,
    mut op: impl FnMut(u32) -> Attempt<T, P>,
) -> std::result::Result<T, RetryError<P>> {
    policy.validate().map_err(RetryError::Failed)?;
    let start = Instant::now();
    let mut attempt = 1;

    loop {
        let last = match op(attempt) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Failed(err) => return Err(RetryError::Failed(err)),
            Attempt::Pending(observed) => observed,
        };

        if attempt >= policy.max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last,
            });
        }

        if let Some(deadline) = policy.deadline {
            if start.elapsed() + policy.delay > deadline {
                return Err(RetryError::Deadline {
                    attempts: attempt,
                    last,
                });
            }
        }

        sleeper.sleep(policy.delay);
        attempt += 1;
    }
}

/// Repeat a mailbox operation while it reports a retryable status.
///
/// Success and non-retryable errors are returned as-is. Running out of
/// attempts yields `Error::RetriesExhausted` carrying the last status, so
/// callers can tell "device kept saying busy" from "device refused".
pub fn with_retry<T>(
    policy: &RetryPolicy,
    sleeper: &mut dyn Sleeper,
    mut operation: impl FnMut() -> Result<T>,
) -> Result<T> {
    let outcome = run(policy, sleeper, |attempt| match operation() {
        Ok(value) => Attempt::Done(value),
        Err(Error::Device { opcode, status }) if status.is_retryable() => {
            debug!(
                "{opcode}: {status} (attempt {attempt}/{}), retrying in {:?}",
                policy.max_attempts, policy.delay
            );
            Attempt::Pending((opcode, status))
        },
        Err(err) => Attempt::Failed(err),
    });

    outcome.map_err(|err| match err {
        RetryError::Exhausted {
            attempts,
            last: (opcode, last),
        } => {
            warn!("{opcode}: giving up after {attempts} attempts, device still reports {last}");
            Error::RetriesExhausted {
                opcode,
                attempts,
                last,
            }
        },
        RetryError::Deadline {
            attempts,
            last: (opcode, _),
        } => Error::DeadlineExceeded {
            what: opcode.to_string(),
            limit: policy.deadline.unwrap_or_default(),
            attempts,
        },
        RetryError::Failed(err) => err,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSleeper;
    use super::*;
    use crate::mailbox::{MailboxStatus, Opcode};

    fn busy(opcode: Opcode) -> Error {
        Error::Device {
            opcode,
            status: MailboxStatus::Busy,
        }
    }

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, Duration::from_millis(5))
    }

    #[test]
    fn test_busy_k_times_then_success_sleeps_k_times() {
        for k in 0..5u32 {
            let mut sleeper = RecordingSleeper::default();
            let mut calls = 0;
            let result = with_retry(&policy(6), &mut sleeper, || {
                calls += 1;
                if calls <= k {
                    Err(busy(Opcode::TransferFw))
                } else {
                    Ok(calls)
                }
            });
            assert_eq!(result.unwrap(), k + 1);
            assert_eq!(sleeper.sleeps.len(), k as usize);
            assert!(sleeper.sleeps.iter().all(|d| *d == Duration::from_millis(5)));
        }
    }

    #[test]
    fn test_busy_max_times_exhausts_without_extra_call() {
        let mut sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy(4), &mut sleeper, || {
            calls += 1;
            Err(busy(Opcode::TransferFw))
        });
        assert_eq!(calls, 4);
        assert_eq!(sleeper.sleeps.len(), 3);
        match result {
            Err(Error::RetriesExhausted {
                opcode,
                attempts,
                last,
            }) => {
                assert_eq!(opcode, Opcode::TransferFw);
                assert_eq!(attempts, 4);
                assert_eq!(last, MailboxStatus::Busy);
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_background_started_is_retried() {
        let mut sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result = with_retry(&policy(3), &mut sleeper, || {
            calls += 1;
            if calls == 1 {
                Err(Error::Device {
                    opcode: Opcode::HboActivateFw,
                    status: MailboxStatus::BackgroundCommandStarted,
                })
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_terminal_status_stops_immediately() {
        let mut sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy(10), &mut sleeper, || {
            calls += 1;
            Err(Error::Device {
                opcode: Opcode::TransferFw,
                status: MailboxStatus::FwInvalidSlot,
            })
        });
        assert_eq!(calls, 1);
        assert!(sleeper.sleeps.is_empty());
        let err = result.unwrap_err();
        assert!(!err.is_exhausted());
        assert_eq!(err.device_status(), Some(MailboxStatus::FwInvalidSlot));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut sleeper = RecordingSleeper::default();
        let result: Result<()> = with_retry(&policy(0), &mut sleeper, || Ok(()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_deadline_stops_before_budget() {
        let mut sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::new(100, Duration::from_secs(1))
            .with_deadline(Duration::from_millis(500));
        let result: Result<()> = with_retry(&policy, &mut sleeper, || Err(busy(Opcode::ActivateFw)));
        assert!(matches!(
            result,
            Err(Error::DeadlineExceeded { attempts: 1, .. })
        ));
        assert!(sleeper.sleeps.is_empty());
    }

    #[test]
    fn test_run_passes_attempt_numbers() {
        let mut sleeper = RecordingSleeper::default();
        let mut seen = Vec::new();
        let result: std::result::Result<(), RetryError<u32>> =
            run(&policy(3), &mut sleeper, |attempt| {
                seen.push(attempt);
                Attempt::Pending(attempt)
            });
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(matches!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: 3
            })
        ));
    }

    #[test]
    fn test_policy_budget() {
        assert_eq!(policy(4).budget(), Duration::from_millis(15));
        assert_eq!(policy(0).budget(), Duration::ZERO);
    }
}
