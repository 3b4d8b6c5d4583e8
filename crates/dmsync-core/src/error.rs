// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dmsync-core.

use thiserror::Error;

/// Result type using MigrationError.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Result type for remote client calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors raised by a [`RemoteResourceClient`](crate::client::RemoteResourceClient).
///
/// The control loop only distinguishes "not found" from everything else.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or API failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// Check whether this error means the resource is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

/// Errors surfaced by the migration control loop.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MigrationError {
    /// Network/API failure on a call that is not retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// A resource the caller addressed does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Creating a connection profile failed or it never became usable.
    #[error("failed to provision connection profile {profile_id}: {cause}")]
    ProfileProvisioningFailed { profile_id: String, cause: String },

    /// Creating the migration job failed.
    #[error("cannot create migration job {job_id}: {message}")]
    JobCreationFailed { job_id: String, message: String },

    /// The migration job reported FAILED while being started.
    #[error("failed to start migration job {job_id}: {message}")]
    JobStartFailed { job_id: String, message: String },

    /// The migration job is already COMPLETED and cannot be started.
    #[error("migration job {0} already completed")]
    JobAlreadyCompleted(String),

    /// The migration job left the RUNNING state.
    #[error("migration job {job_id} is not running (state: {state})")]
    JobNotRunning { job_id: String, state: String },

    /// The migration job does not exist.
    #[error("migration job not found: {0}")]
    JobNotFound(String),

    /// The migration job reported FAILED while being awaited.
    #[error("migration job {job_id} failed: {details}")]
    JobFailed { job_id: String, details: String },

    /// A remote operation did not complete in time.
    #[error("operation {name} did not complete within {timeout_secs}s (last seen: {last})")]
    OperationTimeout {
        name: String,
        timeout_secs: u64,
        last: serde_json::Value,
    },

    /// A remote operation completed with an error payload.
    #[error("operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },

    /// A remote operation snapshot carried neither `done` nor `status`.
    #[error("unable to get status of operation, fields present: {0:?}")]
    MalformedOperation(Vec<String>),

    /// The caller's cancellation token fired.
    #[error("cancelled")]
    Cancelled,

    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable configuration store failure.
    #[error("config store error: {0}")]
    Store(String),

    /// No migration unit with this name in the configuration store.
    #[error("migration unit not found: {0}")]
    UnitNotFound(String),

    /// Another sync is already in flight for this unit.
    #[error("migration unit {0} is already being synced")]
    UnitBusy(String),

    /// Database probe failure.
    #[error("probe error: {0}")]
    Probe(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrationError {
    /// Transport errors are retried by polling loops; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrationError::Transport(_))
    }
}

impl From<ClientError> for MigrationError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(what) => MigrationError::NotFound(what),
            ClientError::Transport(msg) | ClientError::Decode(msg) => {
                MigrationError::Transport(msg)
            }
        }
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Probe(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_not_found_maps_to_not_found() {
        let err: MigrationError = ClientError::NotFound("jobs/x".to_string()).into();
        assert!(matches!(err, MigrationError::NotFound(ref s) if s == "jobs/x"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_client_decode_maps_to_transport() {
        let err: MigrationError = ClientError::Decode("bad json".to_string()).into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("bad json"));
    }

    #[test]
    fn test_profile_provisioning_display() {
        let err = MigrationError::ProfileProvisioningFailed {
            profile_id: "src-orders".to_string(),
            cause: "quota exceeded".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("src-orders"));
        assert!(display.contains("quota exceeded"));
    }
}
