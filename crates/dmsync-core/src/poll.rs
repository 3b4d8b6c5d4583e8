// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Polling driver shared by every wait in the control loop.
//!
//! Each wait is split in two: a pure step function that inspects one
//! observation and decides whether to continue, finish or fail, and
//! [`poll_until`], which owns the probe call, the capped exponential
//! backoff and the cancellation check.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MigrationError, Result};

/// Exponential backoff bounds: start at `initial`, double, never exceed `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Fixed cadence (no growth).
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
        }
    }

    /// Start a fresh delay sequence.
    pub fn start(&self) -> Backoff {
        Backoff {
            next: self.initial.min(self.max),
            max: self.max,
        }
    }
}

/// Delay sequence produced by a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    /// Delay to sleep now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = (current * 2).min(self.max);
        current
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Decision of a step function for one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// Not there yet; sleep and observe again.
    Continue,
    /// Condition satisfied.
    Done(T),
}

/// Observe, decide, back off, repeat.
///
/// - `probe` fetches the latest observation. Retryable errors
///   ([`MigrationError::is_retryable`]) are logged and treated as "state
///   unknown"; any other error ends the wait.
/// - `step` decides on each observation; an `Err` ends the wait immediately.
/// - The token is checked before every probe and raced against every sleep.
pub async fn poll_until<O, T, P, Fut, S>(
    what: &str,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    mut probe: P,
    mut step: S,
) -> Result<T>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<O>>,
    S: FnMut(O) -> Result<Step<T>>,
{
    let mut backoff = policy.start();
    let mut attempt: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            debug!(what, attempt, "Wait cancelled");
            return Err(MigrationError::Cancelled);
        }

        attempt += 1;
        match probe().await {
            Ok(observation) => {
                if let Step::Done(value) = step(observation)? {
                    debug!(what, attempt, "Wait satisfied");
                    return Ok(value);
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(what, attempt, error = %e, "Poll failed, retrying after backoff");
            }
            Err(e) => return Err(e),
        }

        let delay = backoff.next_delay();
        debug!(what, attempt, delay_ms = delay.as_millis() as u64, "Waiting");

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(what, attempt, "Wait cancelled");
                return Err(MigrationError::Cancelled);
            }

            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
        let delays: Vec<_> = policy.start().take(6).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
    }

    #[test]
    fn test_backoff_sum_bounded_by_cap() {
        let cap = Duration::from_secs(10);
        let policy = BackoffPolicy::new(Duration::from_millis(100), cap);
        for n in 1..50u32 {
            let delays: Vec<_> = policy.start().take(n as usize).collect();
            assert!(delays.iter().all(|d| *d <= cap));
            assert!(delays.iter().sum::<Duration>() <= cap * n);
        }
    }

    #[test]
    fn test_fixed_policy() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(1));
        assert!(policy.start().take(5).all(|d| d == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_retries_transport_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();

        let result = poll_until(
            "test",
            BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1)),
            &cancel,
            move || {
                let counter = counter.clone();
                async move {
                    match counter.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(MigrationError::Transport("boom".into())),
                        n => Ok(n),
                    }
                }
            },
            |n| Ok(if n >= 2 { Step::Done(n) } else { Step::Continue }),
        )
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_stops_on_step_error() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let err = poll_until(
            "test",
            BackoffPolicy::fixed(Duration::from_secs(1)),
            &cancel,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            |_| -> Result<Step<()>> { Err(MigrationError::JobNotFound("j".into())) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MigrationError::JobNotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_honours_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });

        let err = poll_until(
            "forever",
            BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10)),
            &cancel,
            || async { Ok(()) },
            |_| -> Result<Step<()>> { Ok(Step::Continue) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MigrationError::Cancelled));
    }
}
