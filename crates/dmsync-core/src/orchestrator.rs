// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Top-level sequencer for one migration unit.
//!
//! `sync` walks the fixed resource graph: source profile → destination
//! profile/instance → migration job → RUNNING → target phase. Every step is
//! idempotent so an interrupted run can simply be repeated. Newly discovered
//! destination fields are written back to the [`ConfigStore`] before the
//! next step reads them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::RemoteResourceClient;
use crate::config::PollingConfig;
use crate::error::{MigrationError, Result};
use crate::jobs::MigrationJobController;
use crate::probe::{ProgressEstimator, ReachabilityProbe};
use crate::profiles::ConnectionProfileManager;
use crate::store::ConfigStore;
use crate::types::{JobPhase, JobState, Location, MigrationJob, MigrationJobSpec, Project};
use crate::unit::{
    DiscoveredDestination, MigrationUnit, backing_instance, generate_password, run_stamp,
};

/// Result of [`MigrationOrchestrator::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The source could not be reached; nothing was touched.
    SourceUnreachable,
    /// The job is RUNNING at (or past) the target phase, or COMPLETED.
    Synced { state: JobState, phase: JobPhase },
}

/// Resource kinds torn down by [`MigrationOrchestrator::cleanup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTarget {
    Instance,
    SourceProfile,
    Job,
}

/// One attempted deletion.
#[derive(Debug, Clone)]
pub struct CleanupStep {
    pub target: CleanupTarget,
    pub resource: String,
    /// `None` on success.
    pub error: Option<String>,
}

/// What [`MigrationOrchestrator::cleanup`] managed to do.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub job_found: bool,
    pub steps: Vec<CleanupStep>,
}

impl CleanupReport {
    pub fn succeeded(&self, target: CleanupTarget) -> bool {
        self.steps
            .iter()
            .any(|s| s.target == target && s.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CleanupStep> {
        self.steps.iter().filter(|s| s.error.is_some())
    }
}

/// Builder for [`MigrationOrchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    client: Option<Arc<dyn RemoteResourceClient>>,
    store: Option<Arc<dyn ConfigStore>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    progress: Option<Arc<dyn ProgressEstimator>>,
    polling: PollingConfig,
    run_stamp: Option<String>,
}

impl OrchestratorBuilder {
    pub fn client(mut self, client: Arc<dyn RemoteResourceClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressEstimator>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Override the destination profile timestamp (defaults to now).
    pub fn run_stamp(mut self, stamp: impl Into<String>) -> Self {
        self.run_stamp = Some(stamp.into());
        self
    }

    pub fn build(self) -> Result<MigrationOrchestrator> {
        let client = self
            .client
            .ok_or_else(|| MigrationError::Config("remote client is required".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| MigrationError::Config("config store is required".to_string()))?;
        let probe = self
            .probe
            .ok_or_else(|| MigrationError::Config("reachability probe is required".to_string()))?;
        let progress = self
            .progress
            .ok_or_else(|| MigrationError::Config("progress estimator is required".to_string()))?;

        Ok(MigrationOrchestrator {
            profiles: ConnectionProfileManager::new(client.clone(), &self.polling),
            jobs: MigrationJobController::new(client.clone(), &self.polling),
            client,
            store,
            probe,
            progress,
            run_stamp: self
                .run_stamp
                .unwrap_or_else(|| run_stamp(chrono::Local::now())),
            in_flight: Mutex::new(HashSet::new()),
            projects: OnceCell::new(),
        })
    }
}

/// Drives the full lifecycle of migration units.
///
/// Independent units may be driven concurrently; a second `sync` on a unit
/// that is already syncing fails with [`MigrationError::UnitBusy`].
pub struct MigrationOrchestrator {
    client: Arc<dyn RemoteResourceClient>,
    store: Arc<dyn ConfigStore>,
    probe: Arc<dyn ReachabilityProbe>,
    progress: Arc<dyn ProgressEstimator>,
    profiles: ConnectionProfileManager,
    jobs: MigrationJobController,
    run_stamp: String,
    in_flight: Mutex<HashSet<String>>,
    projects: OnceCell<Vec<Project>>,
}

/// Releases a unit's single-flight slot on drop.
struct UnitGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.name);
    }
}

impl MigrationOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Timestamp used for destination profiles created by this process.
    pub fn stamp(&self) -> &str {
        &self.run_stamp
    }

    fn acquire(&self, name: &str) -> Result<UnitGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(name.to_string()) {
            return Err(MigrationError::UnitBusy(name.to_string()));
        }
        Ok(UnitGuard {
            in_flight: &self.in_flight,
            name: name.to_string(),
        })
    }

    /// Provision everything and wait until replication reaches the unit's
    /// target phase.
    ///
    /// Aborts on the first failing step without rolling anything back.
    #[instrument(skip(self, cancel))]
    pub async fn sync(&self, unit_name: &str, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let _guard = self.acquire(unit_name)?;
        let mut unit = self.store.load_unit(unit_name).await?;

        info!("Starting migration job");
        if !self.probe.is_reachable(&unit.source).await {
            info!("Migration job won't continue because connection test was not successful");
            return Ok(SyncOutcome::SourceUnreachable);
        }

        let location = unit.location();
        let source_profile_id = unit.source_profile_id();
        info!("Creating connection profiles");
        self.profiles
            .ensure_profile(
                &location,
                &source_profile_id,
                &unit.source_profile_spec(),
                cancel,
            )
            .await?;

        let destination_profile_id = self.ensure_destination(&mut unit, &location, cancel).await?;

        let job_id = unit.job_id();
        info!(job_id = %job_id, "Creating migration job");
        let spec = MigrationJobSpec::continuous(&location, &source_profile_id, &destination_profile_id);
        self.jobs
            .ensure_created(&location, &job_id, &spec, cancel)
            .await?;
        self.jobs.ensure_started(&location, &job_id, cancel).await?;

        self.jobs
            .await_state(&location, &job_id, JobState::Running, cancel)
            .await?;
        info!(target_phase = %unit.target_phase, "Job running, awaiting phase");

        let job = self
            .jobs
            .await_phase(&location, &job_id, unit.target_phase.clone(), cancel)
            .await?;
        info!(phase = %job.current_phase(), "Phase reached, sync complete, ready to cutover");

        Ok(SyncOutcome::Synced {
            phase: job.current_phase(),
            state: job.state,
        })
    }

    /// Return the destination profile ID, provisioning it if needed.
    ///
    /// A new destination's credential and address are persisted before this
    /// returns.
    async fn ensure_destination(
        &self,
        unit: &mut MigrationUnit,
        location: &Location,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if let Some(job) = self.jobs.describe(location, &unit.job_id()).await?
            && let Some(existing) = job.destination_profile_id()
        {
            info!(profile_id = %existing, "Destination instance already created");
            self.backfill_host(unit, existing).await?;
            return Ok(existing.to_string());
        }

        if let Some(recorded) = unit.discovered.profile_id.clone() {
            let state = self.profiles.state(location, &recorded).await?;
            if state.is_live() {
                info!(profile_id = %recorded, state = %state, "Reusing recorded destination profile");
                self.backfill_host(unit, &recorded).await?;
                return Ok(recorded);
            }
            warn!(profile_id = %recorded, state = %state, "Recorded destination profile is not usable, provisioning a new one");
        }

        let profile_id = unit.destination_profile_id(&self.run_stamp);
        let root_password = generate_password();
        debug!(
            profile_id = %profile_id,
            cpu = unit.destination.cpu,
            memory_mb = unit.destination.memory_mb,
            "Provisioning destination"
        );
        self.profiles
            .ensure_profile(
                location,
                &profile_id,
                &unit.destination_profile_spec(&profile_id, &root_password),
                cancel,
            )
            .await?;

        let host = self.discover_host(&unit.project_id, &profile_id).await;
        debug!(profile_id = %profile_id, host = ?host, "Destination discovered, root password generated");

        unit.discovered = DiscoveredDestination {
            profile_id: Some(profile_id.clone()),
            host,
            root_password: Some(root_password),
        };
        self.store.save_unit(unit).await?;
        info!(profile_id = %profile_id, "Destination recorded in configuration");

        Ok(profile_id)
    }

    /// Retry the host lookup a previous run could not complete.
    ///
    /// Only applies when the unit has no recorded destination or records the
    /// one in use.
    async fn backfill_host(&self, unit: &mut MigrationUnit, profile_id: &str) -> Result<()> {
        let discovered = &unit.discovered;
        if discovered.host.is_some()
            || !discovered
                .profile_id
                .as_deref()
                .is_none_or(|recorded| recorded == profile_id)
        {
            return Ok(());
        }

        let Some(host) = self.discover_host(&unit.project_id, profile_id).await else {
            return Ok(());
        };
        unit.discovered.profile_id = Some(profile_id.to_string());
        unit.discovered.host = Some(host);
        self.store.save_unit(unit).await?;
        info!(profile_id = %profile_id, "Destination host recorded in configuration");
        Ok(())
    }

    /// Primary address of the instance; a lookup failure is logged and
    /// yields `None` so the credential still gets persisted.
    async fn discover_host(&self, project_id: &str, instance: &str) -> Option<String> {
        match self.client.get_instance(project_id, instance).await {
            Ok(found) => found.primary_address().map(str::to_string),
            Err(e) => {
                warn!(instance, error = %e, "Could not get host for database instance");
                None
            }
        }
    }

    /// Percentage of source data present on the destination; 0 when the
    /// source is unreachable.
    #[instrument(skip(self))]
    pub async fn get_progress(&self, unit_name: &str) -> Result<f64> {
        let unit = self.store.load_unit(unit_name).await?;
        if !self.probe.is_reachable(&unit.source).await {
            info!(progress = 0.0, "Source unreachable");
            return Ok(0.0);
        }
        let destination = unit.destination_endpoint().ok_or_else(|| {
            MigrationError::Config(format!(
                "destination for {} has not been provisioned yet",
                unit_name
            ))
        })?;
        let progress = self
            .progress
            .percentage_migrated(&unit.source, &destination)
            .await?;
        info!(progress, "Progress");
        Ok(progress)
    }

    /// Best-effort teardown of the job and the resources around it.
    ///
    /// Each deletion is attempted independently; failures are logged and
    /// reported, never raised.
    #[instrument(skip(self, cancel))]
    pub async fn cleanup(&self, unit_name: &str, cancel: &CancellationToken) -> Result<CleanupReport> {
        let unit = self.store.load_unit(unit_name).await?;
        let location = unit.location();
        let job_id = unit.job_id();
        let mut report = CleanupReport::default();

        let job = match self.jobs.describe(&location, &job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "Job for unit was not found, exiting");
                return Ok(report);
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to get migration job, exiting");
                return Ok(report);
            }
        };
        report.job_found = true;

        match job.destination_profile_id().map(backing_instance) {
            Some(instance) => {
                info!(instance = %instance, "Deleting database instance");
                let outcome = self
                    .jobs
                    .delete_instance(&unit.project_id, &instance, cancel)
                    .await;
                report.record(CleanupTarget::Instance, instance, outcome);
            }
            None => warn!("Job has no destination, skipping instance deletion"),
        }

        info!(profile = %job.source, "Deleting source connection profile");
        let outcome = self.profiles.delete(&job.source, cancel).await;
        report.record(CleanupTarget::SourceProfile, job.source.clone(), outcome);

        info!(job_id = %job_id, "Deleting migration job");
        let outcome = self.jobs.delete(&location, &job_id, cancel).await;
        report.record(CleanupTarget::Job, job_id, outcome);

        Ok(report)
    }

    /// Cut over: the destination becomes the new primary.
    #[instrument(skip(self))]
    pub async fn promote(&self, unit_name: &str) -> Result<()> {
        let unit = self.store.load_unit(unit_name).await?;
        self.jobs.promote(&unit.location(), &unit.job_id()).await
    }

    /// Current job snapshot, `None` if no job exists yet.
    pub async fn status(&self, unit_name: &str) -> Result<Option<MigrationJob>> {
        let unit = self.store.load_unit(unit_name).await?;
        self.jobs.describe(&unit.location(), &unit.job_id()).await
    }

    /// Project directory, fetched once per orchestrator.
    pub async fn list_projects(&self) -> Result<&[Project]> {
        let projects = self
            .projects
            .get_or_try_init(|| async {
                let projects = self.client.list_projects().await?;
                debug!(count = projects.len(), "Discovered projects");
                Ok::<_, MigrationError>(projects)
            })
            .await?;
        Ok(projects.as_slice())
    }

    /// Create a user on the destination instance; returns its password
    /// (generated when `password` is `None`).
    #[instrument(skip(self, password))]
    pub async fn create_database_user(
        &self,
        unit_name: &str,
        username: &str,
        password: Option<String>,
    ) -> Result<String> {
        let unit = self.store.load_unit(unit_name).await?;
        let instance = match unit.discovered.profile_id.clone() {
            Some(id) => id,
            None => self
                .jobs
                .describe(&unit.location(), &unit.job_id())
                .await?
                .and_then(|job| job.destination_profile_id().map(str::to_string))
                .ok_or_else(|| {
                    MigrationError::NotFound(format!("destination instance for {}", unit_name))
                })?,
        };

        let password = password.unwrap_or_else(generate_password);
        self.client
            .create_user(&unit.project_id, &instance, username, &password)
            .await?;
        info!(instance = %instance, "Database user created");
        Ok(password)
    }
}

impl CleanupReport {
    fn record(&mut self, target: CleanupTarget, resource: String, outcome: Result<()>) {
        let error = match outcome {
            Ok(()) => None,
            Err(e) => {
                warn!(?target, resource = %resource, error = %e, "Unable to delete");
                Some(e.to_string())
            }
        };
        self.steps.push(CleanupStep {
            target,
            resource,
            error,
        });
    }
}
