// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock remote client for testing.
//!
//! Keeps profiles, jobs, instances and operations in memory and simulates
//! the asynchronous behaviour of the real control plane: profiles report
//! CREATING for a few reads before settling, jobs follow a per-job script
//! of `(state, phase)` snapshots once started, and deletions hand back
//! operations that finish after a configurable number of polls.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use crate::client::RemoteResourceClient;
use crate::error::{ClientError, ClientResult};
use crate::types::{
    ConnectionProfile, ConnectionProfileSpec, DatabaseInstance, IpMapping, JobPhase, JobState,
    Location, MigrationJob, MigrationJobSpec, OperationApi, OperationHandle, OperationSnapshot,
    ProfileEndpoint, ProfileState, Project,
};
use crate::unit::backing_instance;

/// Call sites that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    GetProfile,
    CreateProfile,
    PatchProfile,
    DeleteProfile,
    GetJob,
    CreateJob,
    StartJob,
    PromoteJob,
    DeleteJob,
    GetOperation,
    GetInstance,
    DeleteInstance,
    CreateUser,
    ListProjects,
}

/// Per-method call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub profile_gets: u32,
    pub profile_creates: u32,
    pub profile_patches: u32,
    pub profile_deletes: u32,
    pub job_gets: u32,
    pub job_creates: u32,
    pub job_starts: u32,
    pub job_promotes: u32,
    pub job_deletes: u32,
    pub operation_gets: u32,
    pub instance_gets: u32,
    pub instance_deletes: u32,
    pub user_creates: u32,
    pub project_lists: u32,
}

#[derive(Debug, Clone)]
struct MockProfile {
    profile: ConnectionProfile,
    spec: Option<ConnectionProfileSpec>,
    // CREATING reads left before the profile settles.
    pending_reads: u32,
}

#[derive(Debug, Clone)]
struct MockOperation {
    api: OperationApi,
    polls_left: u32,
}

#[derive(Default)]
struct MockState {
    profiles: HashMap<String, MockProfile>,
    jobs: HashMap<String, MigrationJob>,
    scripts: HashMap<String, VecDeque<(JobState, Option<JobPhase>)>>,
    instances: HashMap<(String, String), DatabaseInstance>,
    operations: HashMap<String, MockOperation>,
    failures: HashMap<FailPoint, Option<u32>>,
    users: Vec<(String, String, String)>,
    calls: MockCalls,
    next_operation: u32,
}

impl MockState {
    fn check(&mut self, point: FailPoint) -> ClientResult<()> {
        match self.failures.get_mut(&point) {
            None => Ok(()),
            Some(None) => Err(injected(point)),
            Some(Some(0)) => {
                self.failures.remove(&point);
                Ok(())
            }
            Some(Some(left)) => {
                *left -= 1;
                if *left == 0 {
                    self.failures.remove(&point);
                }
                Err(injected(point))
            }
        }
    }

    fn operation(&mut self, api: OperationApi, polls: u32) -> OperationHandle {
        self.next_operation += 1;
        let name = match &api {
            OperationApi::Dms => format!("projects/mock/operations/op-{}", self.next_operation),
            OperationApi::SqlAdmin { .. } => format!("sqlop-{}", self.next_operation),
        };
        self.operations.insert(
            name.clone(),
            MockOperation {
                api: api.clone(),
                polls_left: polls,
            },
        );
        OperationHandle { api, name }
    }
}

fn injected(point: FailPoint) -> ClientError {
    ClientError::Transport(format!("injected failure at {:?}", point))
}

/// Mock remote client for testing.
pub struct MockClient {
    state: Mutex<MockState>,
    /// Reads that return CREATING after a profile is created.
    pub profile_ready_after: u32,
    /// State a created profile settles in.
    pub profile_outcome: ProfileState,
    /// Polls an operation reports not-done before finishing (0 = done on
    /// the first poll).
    pub operation_polls: u32,
    /// Error message finished operations report, if any.
    pub operation_error: Option<String>,
    /// PRIMARY address given to provisioned instances.
    pub instance_address: String,
    /// Phase a job reports right after it is started.
    pub start_phase: JobPhase,
    projects: Vec<Project>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            profile_ready_after: 1,
            profile_outcome: ProfileState::Ready,
            operation_polls: 0,
            operation_error: None,
            instance_address: "10.20.30.40".to_string(),
            start_phase: JobPhase::FullDump,
            projects: Vec::new(),
        }
    }

    pub fn with_projects(mut self, projects: Vec<Project>) -> Self {
        self.projects = projects;
        self
    }

    /// Fail every call at `point` with a transport error.
    pub async fn fail(&self, point: FailPoint) {
        self.state.lock().await.failures.insert(point, None);
    }

    /// Fail the next `times` calls at `point`, then recover.
    pub async fn fail_times(&self, point: FailPoint, times: u32) {
        self.state.lock().await.failures.insert(point, Some(times));
    }

    pub async fn calls(&self) -> MockCalls {
        self.state.lock().await.calls.clone()
    }

    /// Seed a profile that already exists in `state`.
    pub async fn insert_profile(&self, location: &Location, profile_id: &str, state: ProfileState) {
        let name = location.profile_name(profile_id);
        self.state.lock().await.profiles.insert(
            name.clone(),
            MockProfile {
                profile: ConnectionProfile {
                    name,
                    display_name: Some(profile_id.to_string()),
                    state,
                },
                spec: None,
                pending_reads: 0,
            },
        );
    }

    /// Last spec written for a profile through create or patch.
    pub async fn profile_spec(
        &self,
        location: &Location,
        profile_id: &str,
    ) -> Option<ConnectionProfileSpec> {
        self.state
            .lock()
            .await
            .profiles
            .get(&location.profile_name(profile_id))
            .and_then(|p| p.spec.clone())
    }

    pub async fn has_profile(&self, location: &Location, profile_id: &str) -> bool {
        self.state
            .lock()
            .await
            .profiles
            .contains_key(&location.profile_name(profile_id))
    }

    /// Seed a job snapshot.
    pub async fn insert_job(&self, location: &Location, job_id: &str, mut job: MigrationJob) {
        let name = location.job_name(job_id);
        job.name = name.clone();
        self.state.lock().await.jobs.insert(name, job);
    }

    /// Snapshots the job reports on successive reads once it has started.
    pub async fn script_job(
        &self,
        location: &Location,
        job_id: &str,
        steps: impl IntoIterator<Item = (JobState, Option<JobPhase>)>,
    ) {
        self.state
            .lock()
            .await
            .scripts
            .insert(location.job_name(job_id), steps.into_iter().collect());
    }

    pub async fn job(&self, location: &Location, job_id: &str) -> Option<MigrationJob> {
        self.state
            .lock()
            .await
            .jobs
            .get(&location.job_name(job_id))
            .cloned()
    }

    /// Seed a database instance.
    pub async fn insert_instance(&self, project_id: &str, instance: &str, address: Option<&str>) {
        let ip_addresses = address
            .map(|ip| {
                vec![IpMapping {
                    kind: "PRIMARY".to_string(),
                    ip_address: ip.to_string(),
                }]
            })
            .unwrap_or_default();
        self.state.lock().await.instances.insert(
            (project_id.to_string(), instance.to_string()),
            DatabaseInstance {
                name: instance.to_string(),
                state: Some("RUNNABLE".to_string()),
                ip_addresses,
            },
        );
    }

    pub async fn has_instance(&self, project_id: &str, instance: &str) -> bool {
        self.state
            .lock()
            .await
            .instances
            .contains_key(&(project_id.to_string(), instance.to_string()))
    }

    /// `(instance, username, password)` for every created user.
    pub async fn created_users(&self) -> Vec<(String, String, String)> {
        self.state.lock().await.users.clone()
    }

    fn provisioned_instance(&self, name: &str, address: Option<&str>) -> DatabaseInstance {
        DatabaseInstance {
            name: name.to_string(),
            state: Some("RUNNABLE".to_string()),
            ip_addresses: address
                .map(|ip| {
                    vec![IpMapping {
                        kind: "PRIMARY".to_string(),
                        ip_address: ip.to_string(),
                    }]
                })
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl RemoteResourceClient for MockClient {
    async fn get_connection_profile(
        &self,
        location: &Location,
        profile_id: &str,
    ) -> ClientResult<ConnectionProfile> {
        let mut state = self.state.lock().await;
        state.calls.profile_gets += 1;
        state.check(FailPoint::GetProfile)?;

        let name = location.profile_name(profile_id);
        let entry = state
            .profiles
            .get_mut(&name)
            .ok_or_else(|| ClientError::NotFound(name.clone()))?;
        if entry.profile.state == ProfileState::Creating {
            if entry.pending_reads == 0 {
                entry.profile.state = self.profile_outcome.clone();
            } else {
                entry.pending_reads -= 1;
            }
        }
        Ok(entry.profile.clone())
    }

    async fn create_connection_profile(
        &self,
        location: &Location,
        profile_id: &str,
        spec: &ConnectionProfileSpec,
    ) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.profile_creates += 1;
        state.check(FailPoint::CreateProfile)?;

        let name = location.profile_name(profile_id);
        if state.profiles.contains_key(&name) {
            return Err(ClientError::Transport(format!("409 Conflict: {} already exists", name)));
        }
        state.profiles.insert(
            name.clone(),
            MockProfile {
                profile: ConnectionProfile {
                    name,
                    display_name: Some(spec.display_name.clone()),
                    state: ProfileState::Creating,
                },
                spec: Some(spec.clone()),
                pending_reads: self.profile_ready_after,
            },
        );

        // A destination profile provisions its instance and the replica
        // representation of the source.
        if let ProfileEndpoint::Cloudsql(_) = spec.endpoint {
            let project = location.project_id.clone();
            let primary = self.provisioned_instance(profile_id, Some(&self.instance_address));
            let representation = self.provisioned_instance(&backing_instance(profile_id), None);
            state
                .instances
                .insert((project.clone(), primary.name.clone()), primary);
            state
                .instances
                .insert((project, representation.name.clone()), representation);
        }
        Ok(())
    }

    async fn patch_connection_profile(
        &self,
        location: &Location,
        profile_id: &str,
        spec: &ConnectionProfileSpec,
        _update_mask: &[&str],
    ) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.profile_patches += 1;
        state.check(FailPoint::PatchProfile)?;

        let name = location.profile_name(profile_id);
        let entry = state
            .profiles
            .get_mut(&name)
            .ok_or_else(|| ClientError::NotFound(name.clone()))?;
        entry.spec = Some(spec.clone());
        Ok(())
    }

    async fn delete_connection_profile(&self, name: &str) -> ClientResult<OperationHandle> {
        let mut state = self.state.lock().await;
        state.calls.profile_deletes += 1;
        state.check(FailPoint::DeleteProfile)?;

        if state.profiles.remove(name).is_none() {
            return Err(ClientError::NotFound(name.to_string()));
        }
        Ok(state.operation(OperationApi::Dms, self.operation_polls))
    }

    async fn get_migration_job(
        &self,
        location: &Location,
        job_id: &str,
    ) -> ClientResult<MigrationJob> {
        let mut state = self.state.lock().await;
        state.calls.job_gets += 1;
        state.check(FailPoint::GetJob)?;

        let name = location.job_name(job_id);
        let started = match state.jobs.get(&name) {
            None => return Err(ClientError::NotFound(name)),
            Some(job) => job.state != JobState::NotStarted,
        };
        let next = if started {
            state.scripts.get_mut(&name).and_then(VecDeque::pop_front)
        } else {
            None
        };
        let job = state
            .jobs
            .get_mut(&name)
            .ok_or_else(|| ClientError::NotFound(name.clone()))?;
        if let Some((job_state, phase)) = next {
            job.state = job_state;
            job.phase = phase;
        }
        Ok(job.clone())
    }

    async fn create_migration_job(
        &self,
        location: &Location,
        job_id: &str,
        spec: &MigrationJobSpec,
    ) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.job_creates += 1;
        state.check(FailPoint::CreateJob)?;

        let name = location.job_name(job_id);
        if state.jobs.contains_key(&name) {
            return Err(ClientError::Transport(format!("409 Conflict: {} already exists", name)));
        }
        state.jobs.insert(
            name.clone(),
            MigrationJob {
                name,
                state: JobState::NotStarted,
                phase: None,
                error: None,
                source: spec.source.clone(),
                destination: spec.destination.clone(),
            },
        );
        Ok(())
    }

    async fn start_migration_job(&self, location: &Location, job_id: &str) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.job_starts += 1;
        state.check(FailPoint::StartJob)?;

        let name = location.job_name(job_id);
        let job = state
            .jobs
            .get_mut(&name)
            .ok_or_else(|| ClientError::NotFound(name.clone()))?;
        if job.state != JobState::NotStarted {
            return Err(ClientError::Transport(format!(
                "400 Bad Request: job is {}",
                job.state
            )));
        }
        job.state = JobState::Running;
        job.phase = Some(self.start_phase.clone());
        Ok(())
    }

    async fn promote_migration_job(
        &self,
        location: &Location,
        job_id: &str,
    ) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.job_promotes += 1;
        state.check(FailPoint::PromoteJob)?;

        let name = location.job_name(job_id);
        let job = state
            .jobs
            .get_mut(&name)
            .ok_or_else(|| ClientError::NotFound(name.clone()))?;
        job.phase = Some(JobPhase::PromoteInProgress);
        Ok(())
    }

    async fn delete_migration_job(
        &self,
        location: &Location,
        job_id: &str,
    ) -> ClientResult<OperationHandle> {
        let mut state = self.state.lock().await;
        state.calls.job_deletes += 1;
        state.check(FailPoint::DeleteJob)?;

        let name = location.job_name(job_id);
        if state.jobs.remove(&name).is_none() {
            return Err(ClientError::NotFound(name));
        }
        Ok(state.operation(OperationApi::Dms, self.operation_polls))
    }

    async fn get_operation(&self, handle: &OperationHandle) -> ClientResult<OperationSnapshot> {
        let mut state = self.state.lock().await;
        state.calls.operation_gets += 1;
        state.check(FailPoint::GetOperation)?;

        let op = state
            .operations
            .get_mut(&handle.name)
            .ok_or_else(|| ClientError::NotFound(handle.name.clone()))?;
        let done = op.polls_left == 0;
        if !done {
            op.polls_left -= 1;
        }
        let mut body = match op.api {
            OperationApi::Dms => json!({"name": handle.name, "done": done}),
            OperationApi::SqlAdmin { .. } => json!({
                "name": handle.name,
                "status": if done { "DONE" } else { "RUNNING" },
            }),
        };
        if let (true, Some(message)) = (done, &self.operation_error) {
            body["error"] = match op.api {
                OperationApi::Dms => json!({"code": 9, "message": message}),
                OperationApi::SqlAdmin { .. } => json!({"errors": [{"message": message}]}),
            };
        }
        Ok(OperationSnapshot(body))
    }

    async fn get_instance(
        &self,
        project_id: &str,
        instance: &str,
    ) -> ClientResult<DatabaseInstance> {
        let mut state = self.state.lock().await;
        state.calls.instance_gets += 1;
        state.check(FailPoint::GetInstance)?;

        state
            .instances
            .get(&(project_id.to_string(), instance.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{}/{}", project_id, instance)))
    }

    async fn delete_instance(
        &self,
        project_id: &str,
        instance: &str,
    ) -> ClientResult<OperationHandle> {
        let mut state = self.state.lock().await;
        state.calls.instance_deletes += 1;
        state.check(FailPoint::DeleteInstance)?;

        if state
            .instances
            .remove(&(project_id.to_string(), instance.to_string()))
            .is_none()
        {
            return Err(ClientError::NotFound(format!("{}/{}", project_id, instance)));
        }
        let api = OperationApi::SqlAdmin {
            project_id: project_id.to_string(),
        };
        Ok(state.operation(api, self.operation_polls))
    }

    async fn create_user(
        &self,
        project_id: &str,
        instance: &str,
        username: &str,
        password: &str,
    ) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        state.calls.user_creates += 1;
        state.check(FailPoint::CreateUser)?;

        if !state
            .instances
            .contains_key(&(project_id.to_string(), instance.to_string()))
        {
            return Err(ClientError::NotFound(format!("{}/{}", project_id, instance)));
        }
        state.users.push((
            instance.to_string(),
            username.to_string(),
            password.to_string(),
        ));
        Ok(())
    }

    async fn list_projects(&self) -> ClientResult<Vec<Project>> {
        let mut state = self.state.lock().await;
        state.calls.project_lists += 1;
        state.check(FailPoint::ListProjects)?;
        Ok(self.projects.clone())
    }
}
