// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Migration job state machine.
//!
//! States `{absent, NOT_STARTED, RUNNING, FAILED, COMPLETED, ...}` crossed
//! with phases `{PHASE_UNSPECIFIED, FULL_DUMP, CDC, PROMOTE_IN_PROGRESS}`.
//! Each wait is a pure step function over one [`MigrationJob`] snapshot,
//! driven by [`poll_until`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::client::RemoteResourceClient;
use crate::config::PollingConfig;
use crate::error::{MigrationError, Result};
use crate::poll::{Step, poll_until};
use crate::types::{JobPhase, JobState, Location, MigrationJob, MigrationJobSpec};
use crate::waiter::OperationWaiter;

/// Drives one migration job through create, start, waits, promote and delete.
pub struct MigrationJobController {
    client: Arc<dyn RemoteResourceClient>,
    polling: PollingConfig,
    waiter: OperationWaiter,
}

impl MigrationJobController {
    pub fn new(client: Arc<dyn RemoteResourceClient>, polling: &PollingConfig) -> Self {
        Self {
            client,
            polling: polling.clone(),
            waiter: OperationWaiter::from_config(polling),
        }
    }

    /// Latest snapshot, or `None` if the job does not exist.
    pub async fn describe(&self, location: &Location, job_id: &str) -> Result<Option<MigrationJob>> {
        match self.client.get_migration_job(location, job_id).await {
            Ok(job) => {
                debug!(job_id, state = %job.state, phase = %job.current_phase(), "Migration job observed");
                Ok(Some(job))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Latest snapshot; a missing job is [`MigrationError::JobNotFound`].
    async fn fetch(&self, location: &Location, job_id: &str) -> Result<MigrationJob> {
        self.describe(location, job_id)
            .await?
            .ok_or_else(|| MigrationError::JobNotFound(job_id.to_string()))
    }

    /// Create the job unless it already exists, then wait for NOT_STARTED.
    #[instrument(skip(self, spec, cancel))]
    pub async fn ensure_created(
        &self,
        location: &Location,
        job_id: &str,
        spec: &MigrationJobSpec,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if let Some(job) = self.describe(location, job_id).await? {
            info!(state = %job.state, "Migration job already exists");
            return Ok(false);
        }

        self.client
            .create_migration_job(location, job_id, spec)
            .await
            .map_err(|e| MigrationError::JobCreationFailed {
                job_id: job_id.to_string(),
                message: e.to_string(),
            })?;

        info!("Waiting for migration job to be NOT_STARTED");
        poll_until(
            job_id,
            self.polling.job_create,
            cancel,
            move || self.describe(location, job_id),
            |job| created_step(job_id, job),
        )
        .await?;

        info!("Migration job created");
        Ok(true)
    }

    /// Start the job and loop until it is RUNNING.
    ///
    /// Idempotent: on a RUNNING job this is a single fetch.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_started(
        &self,
        location: &Location,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Steps can't await, so the start call happens in the probe.
        poll_until(
            job_id,
            self.polling.job_start,
            cancel,
            move || async move {
                let job = self.fetch(location, job_id).await?;
                if job.state == JobState::NotStarted {
                    self.client
                        .start_migration_job(location, job_id)
                        .await
                        .map_err(|e| MigrationError::JobStartFailed {
                            job_id: job_id.to_string(),
                            message: e.to_string(),
                        })?;
                    info!(job_id, "Started migration job, awaiting RUNNING");
                }
                Ok(job)
            },
            |job| start_step(job_id, &job),
        )
        .await?;

        info!("Migration job is RUNNING");
        Ok(())
    }

    /// Wait until the job's state equals `target`.
    ///
    /// Unbounded: only FAILED or `cancel` end the wait early.
    #[instrument(skip(self, target, cancel), fields(target_state = %target))]
    pub async fn await_state(
        &self,
        location: &Location,
        job_id: &str,
        target: JobState,
        cancel: &CancellationToken,
    ) -> Result<MigrationJob> {
        let job = self.fetch(location, job_id).await?;
        info!(state = %job.state, "Awaiting migration job state");

        let mut first = Some(job);
        let job = poll_until(
            job_id,
            self.polling.job_wait,
            cancel,
            move || {
                let seeded = first.take();
                async move {
                    match seeded {
                        Some(job) => Ok(job),
                        None => self.fetch(location, job_id).await,
                    }
                }
            },
            |job| state_step(job_id, &target, job),
        )
        .await?;

        info!(state = %job.state, "Migration job reached target state");
        Ok(job)
    }

    /// Wait until the job's phase is at or past `target`.
    ///
    /// The job must be RUNNING when called. COMPLETED while waiting counts
    /// as reached.
    #[instrument(skip(self, target, cancel), fields(target_phase = %target))]
    pub async fn await_phase(
        &self,
        location: &Location,
        job_id: &str,
        target: JobPhase,
        cancel: &CancellationToken,
    ) -> Result<MigrationJob> {
        let job = self.fetch(location, job_id).await?;
        if job.state != JobState::Running {
            return Err(MigrationError::JobNotRunning {
                job_id: job_id.to_string(),
                state: job.state.to_string(),
            });
        }
        info!(phase = %job.current_phase(), "Awaiting migration job phase");

        let mut first = Some(job);
        let job = poll_until(
            job_id,
            self.polling.job_wait,
            cancel,
            move || {
                let seeded = first.take();
                async move {
                    match seeded {
                        Some(job) => Ok(job),
                        None => self.fetch(location, job_id).await,
                    }
                }
            },
            |job| phase_step(job_id, &target, job),
        )
        .await?;

        info!(phase = %job.current_phase(), state = %job.state, "Migration job reached target phase");
        Ok(job)
    }

    /// Promote the destination to primary, ending continuous replication.
    #[instrument(skip(self))]
    pub async fn promote(&self, location: &Location, job_id: &str) -> Result<()> {
        self.client.promote_migration_job(location, job_id).await?;
        info!("Migration job promotion requested");
        if let Some(job) = self.describe(location, job_id).await? {
            debug!(state = %job.state, phase = %job.current_phase(), "Migration job after promote");
        }
        Ok(())
    }

    /// Delete the job and wait for the operation to finish.
    #[instrument(skip(self, cancel))]
    pub async fn delete(
        &self,
        location: &Location,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let handle = self.client.delete_migration_job(location, job_id).await?;
        self.waiter
            .wait_for(self.client.as_ref(), &handle, cancel)
            .await?;
        Ok(())
    }

    /// Delete the database instance backing a destination and wait.
    #[instrument(skip(self, cancel))]
    pub async fn delete_instance(
        &self,
        project_id: &str,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let handle = self.client.delete_instance(project_id, instance).await?;
        self.waiter
            .wait_for(self.client.as_ref(), &handle, cancel)
            .await?;
        Ok(())
    }
}

/// Creation wait: done at NOT_STARTED. A just-created job that is not
/// visible yet keeps the wait going.
pub fn created_step(job_id: &str, job: Option<MigrationJob>) -> Result<Step<()>> {
    let Some(job) = job else {
        return Ok(Step::Continue);
    };
    match job.state {
        JobState::NotStarted => Ok(Step::Done(())),
        JobState::Failed | JobState::Completed => Err(MigrationError::JobCreationFailed {
            job_id: job_id.to_string(),
            message: format!("unexpected state {} after create: {}", job.state, job.details()),
        }),
        _ => Ok(Step::Continue),
    }
}

/// Start loop: done at RUNNING.
pub fn start_step(job_id: &str, job: &MigrationJob) -> Result<Step<()>> {
    match job.state {
        JobState::Running => Ok(Step::Done(())),
        JobState::Failed => Err(MigrationError::JobStartFailed {
            job_id: job_id.to_string(),
            message: job.error_message().unwrap_or("unknown error").to_string(),
        }),
        JobState::Completed => Err(MigrationError::JobAlreadyCompleted(job_id.to_string())),
        _ => Ok(Step::Continue),
    }
}

/// State wait: done when the state equals `target`; FAILED aborts unless it
/// is the target.
pub fn state_step(job_id: &str, target: &JobState, job: MigrationJob) -> Result<Step<MigrationJob>> {
    if &job.state == target {
        return Ok(Step::Done(job));
    }
    if job.state == JobState::Failed {
        return Err(MigrationError::JobFailed {
            job_id: job_id.to_string(),
            details: job.details(),
        });
    }
    Ok(Step::Continue)
}

/// Phase wait: done once the phase reaches `target` or the job completes.
pub fn phase_step(job_id: &str, target: &JobPhase, job: MigrationJob) -> Result<Step<MigrationJob>> {
    match job.state {
        JobState::Running if job.current_phase().has_reached(target) => Ok(Step::Done(job)),
        JobState::Running => Ok(Step::Continue),
        JobState::Completed => Ok(Step::Done(job)),
        JobState::Failed => Err(MigrationError::JobFailed {
            job_id: job_id.to_string(),
            details: job.details(),
        }),
        _ => Err(MigrationError::JobNotRunning {
            job_id: job_id.to_string(),
            state: job.state.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobError;

    fn job(state: JobState, phase: Option<JobPhase>) -> MigrationJob {
        MigrationJob {
            name: "projects/p/locations/r/migrationJobs/auto-mj-orders".to_string(),
            state,
            phase,
            error: None,
            source: String::new(),
            destination: String::new(),
        }
    }

    #[test]
    fn test_created_step() {
        assert_eq!(created_step("j", None).unwrap(), Step::Continue);
        assert_eq!(
            created_step("j", Some(job(JobState::Other("CREATING".into()), None))).unwrap(),
            Step::Continue
        );
        assert_eq!(
            created_step("j", Some(job(JobState::NotStarted, None))).unwrap(),
            Step::Done(())
        );
        assert!(matches!(
            created_step("j", Some(job(JobState::Completed, None))),
            Err(MigrationError::JobCreationFailed { .. })
        ));
    }

    #[test]
    fn test_start_step_failed_carries_message() {
        let mut failed = job(JobState::Failed, None);
        failed.error = Some(JobError {
            code: Some(9),
            message: "source unreachable".to_string(),
        });
        match start_step("j", &failed) {
            Err(MigrationError::JobStartFailed { message, .. }) => {
                assert_eq!(message, "source unreachable")
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            start_step("j", &job(JobState::Completed, None)),
            Err(MigrationError::JobAlreadyCompleted(_))
        ));
        assert_eq!(start_step("j", &job(JobState::NotStarted, None)).unwrap(), Step::Continue);
    }

    #[test]
    fn test_state_step_failed_is_fatal_unless_target() {
        assert!(matches!(
            state_step("j", &JobState::Running, job(JobState::Failed, None)),
            Err(MigrationError::JobFailed { .. })
        ));
        assert!(matches!(
            state_step("j", &JobState::Failed, job(JobState::Failed, None)).unwrap(),
            Step::Done(_)
        ));
        assert!(matches!(
            state_step("j", &JobState::Running, job(JobState::NotStarted, None)).unwrap(),
            Step::Continue
        ));
    }

    #[test]
    fn test_phase_step() {
        let target = JobPhase::Cdc;
        assert!(matches!(
            phase_step("j", &target, job(JobState::Running, Some(JobPhase::FullDump))).unwrap(),
            Step::Continue
        ));
        assert!(matches!(
            phase_step("j", &target, job(JobState::Running, Some(JobPhase::Unspecified))).unwrap(),
            Step::Continue
        ));
        assert!(matches!(
            phase_step("j", &target, job(JobState::Running, Some(JobPhase::PromoteInProgress)))
                .unwrap(),
            Step::Done(_)
        ));
        assert!(matches!(
            phase_step("j", &target, job(JobState::Completed, None)).unwrap(),
            Step::Done(_)
        ));
        assert!(matches!(
            phase_step("j", &target, job(JobState::Other("STOPPED".into()), None)),
            Err(MigrationError::JobNotRunning { .. })
        ));
    }
}
