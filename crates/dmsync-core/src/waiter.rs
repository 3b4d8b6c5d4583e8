// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded wait for long-running remote operations.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::RemoteResourceClient;
use crate::config::PollingConfig;
use crate::error::{MigrationError, Result};
use crate::poll::{BackoffPolicy, Step, poll_until};
use crate::types::{OperationHandle, OperationSnapshot};

/// Polls an operation at a fixed cadence until it reports completion.
///
/// Generic across delete-job, delete-profile and delete-instance operations:
/// completion comes from [`OperationSnapshot::is_done`] only.
#[derive(Debug, Clone, Copy)]
pub struct OperationWaiter {
    interval: Duration,
    timeout: Duration,
}

impl Default for OperationWaiter {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
        }
    }
}

impl OperationWaiter {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_config(config: &PollingConfig) -> Self {
        Self::new(config.operation_interval, config.operation_timeout)
    }

    /// Block until `probe` returns a completed snapshot.
    ///
    /// Fails with [`MigrationError::OperationTimeout`] carrying the last
    /// snapshot seen, [`MigrationError::MalformedOperation`] when a snapshot
    /// has no completion field, or [`MigrationError::OperationFailed`] when
    /// the operation finished with an error.
    pub async fn wait<P, Fut>(
        &self,
        name: &str,
        cancel: &CancellationToken,
        probe: P,
    ) -> Result<OperationSnapshot>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<OperationSnapshot>>,
    {
        let mut last: Option<OperationSnapshot> = None;

        let outcome = tokio::time::timeout(
            self.timeout,
            poll_until(
                name,
                BackoffPolicy::fixed(self.interval),
                cancel,
                probe,
                |snapshot: OperationSnapshot| {
                    let done = snapshot.is_done()?;
                    debug!(operation = name, done, "Operation polled");
                    if done {
                        if let Some(message) = snapshot.error() {
                            return Err(MigrationError::OperationFailed {
                                name: name.to_string(),
                                message,
                            });
                        }
                        Ok(Step::Done(snapshot))
                    } else {
                        last = Some(snapshot);
                        Ok(Step::Continue)
                    }
                },
            ),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(MigrationError::OperationTimeout {
                name: name.to_string(),
                timeout_secs: self.timeout.as_secs(),
                last: last.map(|s| s.0).unwrap_or(serde_json::Value::Null),
            }),
        }
    }

    /// Wait for an operation issued by `client`.
    pub async fn wait_for(
        &self,
        client: &dyn RemoteResourceClient,
        handle: &OperationHandle,
        cancel: &CancellationToken,
    ) -> Result<OperationSnapshot> {
        let snapshot = self
            .wait(&handle.name, cancel, move || async move {
                client.get_operation(handle).await.map_err(MigrationError::from)
            })
            .await?;
        info!(operation = %handle.name, "Operation completed");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_when_done() {
        let polls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let snapshot = OperationWaiter::default()
            .wait("op-1", &cancel, || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(OperationSnapshot(json!({"name": "op-1", "done": n >= 2}))) }
            })
            .await
            .unwrap();

        assert_eq!(snapshot.0["done"], true);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_last_snapshot() {
        let cancel = CancellationToken::new();
        let err = OperationWaiter::new(Duration::from_secs(1), Duration::from_secs(5))
            .wait("op-slow", &cancel, || async {
                Ok(OperationSnapshot(json!({"name": "op-slow", "status": "RUNNING"})))
            })
            .await
            .unwrap_err();

        match err {
            MigrationError::OperationTimeout { name, last, .. } => {
                assert_eq!(name, "op-slow");
                assert_eq!(last["status"], "RUNNING");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_rejects_malformed_snapshot() {
        let cancel = CancellationToken::new();
        let err = OperationWaiter::default()
            .wait("op-odd", &cancel, || async {
                Ok(OperationSnapshot(json!({"name": "op-odd"})))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::MalformedOperation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_surfaces_operation_error() {
        let cancel = CancellationToken::new();
        let err = OperationWaiter::default()
            .wait("sqlop-7", &cancel, || async {
                Ok(OperationSnapshot(json!({
                    "name": "sqlop-7",
                    "status": "DONE",
                    "error": {"errors": [{"code": "INTERNAL_ERROR", "message": "instance busy"}]}
                })))
            })
            .await
            .unwrap_err();

        match err {
            MigrationError::OperationFailed { name, message } => {
                assert_eq!(name, "sqlop-7");
                assert_eq!(message, "instance busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
