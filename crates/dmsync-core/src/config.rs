// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the REST transport and the polling loops.

use std::time::Duration;

use crate::error::{MigrationError, Result};
use crate::poll::BackoffPolicy;

const DEFAULT_DMS_ENDPOINT: &str = "https://datamigration.googleapis.com/v1";
const DEFAULT_SQLADMIN_ENDPOINT: &str = "https://sqladmin.googleapis.com/sql/v1beta4";
const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://cloudresourcemanager.googleapis.com/v1";

/// Configuration for [`RestClient`](crate::rest::RestClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Database Migration API.
    pub dms_endpoint: String,
    /// Base URL of the Cloud SQL Admin API.
    pub sqladmin_endpoint: String,
    /// Base URL of the Resource Manager API.
    pub resource_manager_endpoint: String,
    /// OAuth bearer token sent with every request.
    pub access_token: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dms_endpoint: DEFAULT_DMS_ENDPOINT.to_string(),
            sqladmin_endpoint: DEFAULT_SQLADMIN_ENDPOINT.to_string(),
            resource_manager_endpoint: DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string(),
            access_token: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DMSYNC_ACCESS_TOKEN`: OAuth bearer token (required)
    /// - `DMSYNC_DMS_ENDPOINT`: Database Migration API base URL
    /// - `DMSYNC_SQLADMIN_ENDPOINT`: Cloud SQL Admin API base URL
    /// - `DMSYNC_RESOURCE_MANAGER_ENDPOINT`: Resource Manager API base URL
    /// - `DMSYNC_REQUEST_TIMEOUT_MS`: Request timeout in milliseconds (default: 30000)
    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var("DMSYNC_ACCESS_TOKEN")
            .map_err(|_| MigrationError::Config("DMSYNC_ACCESS_TOKEN is not set".to_string()))?;

        let dms_endpoint = std::env::var("DMSYNC_DMS_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_DMS_ENDPOINT.to_string());
        let sqladmin_endpoint = std::env::var("DMSYNC_SQLADMIN_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_SQLADMIN_ENDPOINT.to_string());
        let resource_manager_endpoint = std::env::var("DMSYNC_RESOURCE_MANAGER_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string());

        let request_timeout_ms: u64 = std::env::var("DMSYNC_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .map_err(|e| MigrationError::Config(format!("invalid DMSYNC_REQUEST_TIMEOUT_MS: {}", e)))?;

        Ok(Self {
            dms_endpoint,
            sqladmin_endpoint,
            resource_manager_endpoint,
            access_token,
            request_timeout: Duration::from_millis(request_timeout_ms),
        })
    }

    /// Point all three APIs at one base URL (tests, proxies).
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.dms_endpoint = format!("{}/dms/v1", base);
        self.sqladmin_endpoint = format!("{}/sql/v1beta4", base);
        self.resource_manager_endpoint = format!("{}/crm/v1", base);
        self
    }

    /// Set the bearer token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Cadence of every wait in the control loop.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Waiting for a freshly created connection profile to become READY.
    pub profile_ready: BackoffPolicy,
    /// Waiting for a freshly created job to reach NOT_STARTED.
    pub job_create: BackoffPolicy,
    /// Start loop until the job is RUNNING.
    pub job_start: BackoffPolicy,
    /// Long waits for a job state or phase.
    pub job_wait: BackoffPolicy,
    /// Poll interval for long-running operations.
    pub operation_interval: Duration,
    /// Give up on a long-running operation after this long.
    pub operation_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            profile_ready: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10)),
            job_create: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1)),
            job_start: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1)),
            job_wait: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10)),
            operation_interval: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(120),
        }
    }
}

impl PollingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_wait(mut self, policy: BackoffPolicy) -> Self {
        self.job_wait = policy;
        self
    }

    pub fn with_profile_ready(mut self, policy: BackoffPolicy) -> Self {
        self.profile_ready = policy;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}
