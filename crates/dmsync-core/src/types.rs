// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote resource snapshots and request bodies.
//!
//! Field names follow the Database Migration v1 and Cloud SQL Admin v1beta4
//! JSON surfaces so the same types serve the REST client and the mock.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MigrationError, Result};

/// Project + region pair that scopes connection profiles and migration jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Cloud project ID.
    pub project_id: String,
    /// Region ID (e.g. `europe-west1`).
    pub region: String,
}

impl Location {
    /// Create a new location.
    pub fn new(project_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
        }
    }

    /// `projects/{project}/locations/{region}`
    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project_id, self.region)
    }

    /// Full resource name of a connection profile.
    pub fn profile_name(&self, profile_id: &str) -> String {
        format!("{}/connectionProfiles/{}", self.parent(), profile_id)
    }

    /// Full resource name of a migration job.
    pub fn job_name(&self, job_id: &str) -> String {
        format!("{}/migrationJobs/{}", self.parent(), job_id)
    }
}

/// Last path segment of a resource name.
pub fn resource_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

// ============================================================================
// Connection profiles
// ============================================================================

/// Remote lifecycle state of a connection profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProfileState {
    /// No profile with this ID exists.
    NotExists,
    Creating,
    Ready,
    Failed,
    /// Any other state, surfaced verbatim.
    Other(String),
}

impl ProfileState {
    /// READY or CREATING.
    pub fn is_live(&self) -> bool {
        matches!(self, ProfileState::Creating | ProfileState::Ready)
    }
}

impl From<String> for ProfileState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "NOT_EXISTS" => ProfileState::NotExists,
            "CREATING" => ProfileState::Creating,
            "READY" => ProfileState::Ready,
            "FAILED" => ProfileState::Failed,
            _ => ProfileState::Other(value),
        }
    }
}

impl From<ProfileState> for String {
    fn from(state: ProfileState) -> Self {
        match state {
            ProfileState::NotExists => "NOT_EXISTS".to_string(),
            ProfileState::Creating => "CREATING".to_string(),
            ProfileState::Ready => "READY".to_string(),
            ProfileState::Failed => "FAILED".to_string(),
            ProfileState::Other(s) => s,
        }
    }
}

impl std::fmt::Display for ProfileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from(self.clone()))
    }
}

/// Observed connection profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "unspecified_profile_state")]
    pub state: ProfileState,
}

fn unspecified_profile_state() -> ProfileState {
    ProfileState::Other("STATE_UNSPECIFIED".to_string())
}

/// Desired connection profile, serialized as the create/patch request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfileSpec {
    pub display_name: String,
    #[serde(flatten)]
    pub endpoint: ProfileEndpoint,
}

/// Kind-specific half of a connection profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProfileEndpoint {
    /// Password-based source database.
    #[serde(rename = "postgresql")]
    Postgresql(PostgresqlProfile),
    /// Managed destination instance provisioned with the profile.
    #[serde(rename = "cloudsql")]
    Cloudsql(CloudSqlProfile),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresqlProfile {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSqlProfile {
    pub settings: CloudSqlSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSqlSettings {
    pub auto_storage_increase: bool,
    pub data_disk_type: String,
    pub root_password: String,
    pub database_version: String,
    pub tier: String,
    pub data_disk_size_gb: u64,
    /// Full resource name of the source connection profile.
    pub source_id: String,
    pub ip_config: Value,
}

impl ConnectionProfileSpec {
    /// Fields a patch is allowed to touch when the profile already exists.
    ///
    /// Destination profiles are immutable once created.
    pub fn mutable_fields(&self) -> &'static [&'static str] {
        match self.endpoint {
            ProfileEndpoint::Postgresql(_) => &[
                "postgresql.host",
                "postgresql.port",
                "postgresql.username",
                "postgresql.password",
            ],
            ProfileEndpoint::Cloudsql(_) => &[],
        }
    }
}

// ============================================================================
// Migration jobs
// ============================================================================

/// Remote lifecycle state of a migration job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    NotStarted,
    Running,
    Failed,
    Completed,
    /// Any other state (STARTING, STOPPED, ...), surfaced verbatim.
    Other(String),
}

impl From<String> for JobState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "NOT_STARTED" => JobState::NotStarted,
            "RUNNING" => JobState::Running,
            "FAILED" => JobState::Failed,
            "COMPLETED" => JobState::Completed,
            _ => JobState::Other(value),
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        match state {
            JobState::NotStarted => "NOT_STARTED".to_string(),
            JobState::Running => "RUNNING".to_string(),
            JobState::Failed => "FAILED".to_string(),
            JobState::Completed => "COMPLETED".to_string(),
            JobState::Other(s) => s,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from(self.clone()))
    }
}

/// Replication phase of a RUNNING job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobPhase {
    Unspecified,
    FullDump,
    Cdc,
    PromoteInProgress,
    /// Any other phase, surfaced verbatim.
    Other(String),
}

impl JobPhase {
    /// Position in the replication order. `None` means no phase reached yet.
    pub fn rank(&self) -> Option<u8> {
        match self {
            JobPhase::FullDump => Some(1),
            JobPhase::Cdc => Some(2),
            JobPhase::PromoteInProgress => Some(3),
            JobPhase::Unspecified | JobPhase::Other(_) => None,
        }
    }

    /// Whether this phase is at or past `target`.
    pub fn has_reached(&self, target: &JobPhase) -> bool {
        match (self.rank(), target.rank()) {
            (Some(current), Some(wanted)) => current >= wanted,
            _ => false,
        }
    }
}

impl From<String> for JobPhase {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PHASE_UNSPECIFIED" => JobPhase::Unspecified,
            "FULL_DUMP" => JobPhase::FullDump,
            "CDC" => JobPhase::Cdc,
            "PROMOTE_IN_PROGRESS" => JobPhase::PromoteInProgress,
            _ => JobPhase::Other(value),
        }
    }
}

impl From<JobPhase> for String {
    fn from(phase: JobPhase) -> Self {
        match phase {
            JobPhase::Unspecified => "PHASE_UNSPECIFIED".to_string(),
            JobPhase::FullDump => "FULL_DUMP".to_string(),
            JobPhase::Cdc => "CDC".to_string(),
            JobPhase::PromoteInProgress => "PROMOTE_IN_PROGRESS".to_string(),
            JobPhase::Other(s) => s,
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from(self.clone()))
    }
}

/// Error payload attached to a FAILED job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// Observed migration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJob {
    #[serde(default)]
    pub name: String,
    #[serde(default = "unspecified_job_state")]
    pub state: JobState,
    #[serde(default)]
    pub phase: Option<JobPhase>,
    #[serde(default)]
    pub error: Option<JobError>,
    /// Full resource name of the source connection profile.
    #[serde(default)]
    pub source: String,
    /// Full resource name of the destination connection profile.
    #[serde(default)]
    pub destination: String,
}

fn unspecified_job_state() -> JobState {
    JobState::Other("STATE_UNSPECIFIED".to_string())
}

impl MigrationJob {
    /// Phase, or `Unspecified` when the remote omits it.
    pub fn current_phase(&self) -> JobPhase {
        self.phase.clone().unwrap_or(JobPhase::Unspecified)
    }

    /// The error message if the job carries one.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// ID of the destination connection profile.
    pub fn destination_profile_id(&self) -> Option<&str> {
        if self.destination.is_empty() {
            None
        } else {
            Some(resource_id(&self.destination))
        }
    }

    /// Compact description for error payloads.
    pub fn details(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Desired migration job, serialized as the create request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJobSpec {
    #[serde(rename = "type")]
    pub job_type: String,
    pub source: String,
    pub destination: String,
    pub destination_database: DestinationDatabase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationDatabase {
    pub provider: String,
    pub engine: String,
}

impl MigrationJobSpec {
    /// Continuous PostgreSQL → Cloud SQL job between two profiles.
    pub fn continuous(location: &Location, source_profile: &str, destination_profile: &str) -> Self {
        Self {
            job_type: "CONTINUOUS".to_string(),
            source: location.profile_name(source_profile),
            destination: location.profile_name(destination_profile),
            destination_database: DestinationDatabase {
                provider: "CLOUDSQL".to_string(),
                engine: "POSTGRESQL".to_string(),
            },
        }
    }
}

// ============================================================================
// Long-running operations
// ============================================================================

/// Which API issued an operation; decides where it is polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationApi {
    /// Database Migration operation, addressed by its full name.
    Dms,
    /// Cloud SQL Admin operation, scoped to a project.
    SqlAdmin { project_id: String },
}

/// Handle returned by mutating calls that complete asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub api: OperationApi,
    pub name: String,
}

impl OperationHandle {
    pub fn dms(name: impl Into<String>) -> Self {
        Self {
            api: OperationApi::Dms,
            name: name.into(),
        }
    }

    pub fn sql_admin(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api: OperationApi::SqlAdmin {
                project_id: project_id.into(),
            },
            name: name.into(),
        }
    }
}

/// Latest snapshot of a remote operation.
///
/// Kept as raw JSON: DMS operations carry `done`, Cloud SQL operations carry
/// `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSnapshot(pub Value);

impl OperationSnapshot {
    /// Derive completion: `done` wins, then `status == "DONE"`.
    pub fn is_done(&self) -> Result<bool> {
        if let Some(done) = self.0.get("done") {
            return Ok(done.as_bool().unwrap_or(false));
        }
        if let Some(status) = self.0.get("status") {
            return Ok(status.as_str() == Some("DONE"));
        }
        let keys = self
            .0
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        Err(MigrationError::MalformedOperation(keys))
    }

    /// Error reported by a finished operation.
    ///
    /// DMS uses `error.message`; Cloud SQL lists them under `error.errors`.
    pub fn error(&self) -> Option<String> {
        let error = self.0.get("error")?;
        if let Some(message) = error.get("message").and_then(Value::as_str) {
            return Some(message.to_string());
        }
        let messages: Vec<&str> = error
            .get("errors")
            .and_then(Value::as_array)
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        if messages.is_empty() {
            Some(error.to_string())
        } else {
            Some(messages.join("; "))
        }
    }
}

// ============================================================================
// Database instances & projects
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpMapping {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub ip_address: String,
}

/// Observed Cloud SQL instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub ip_addresses: Vec<IpMapping>,
}

impl DatabaseInstance {
    /// Address of type PRIMARY, if assigned yet.
    pub fn primary_address(&self) -> Option<&str> {
        self.ip_addresses
            .iter()
            .find(|ip| ip.kind == "PRIMARY")
            .map(|ip| ip.ip_address.as_str())
    }
}

/// Entry of the project directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lifecycle_state: Option<String>,
}
