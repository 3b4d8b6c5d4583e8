// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote resource client interface.
//!
//! Defines the abstract interface to the cloud control plane. The control
//! loop only depends on this trait; [`RestClient`](crate::rest::RestClient)
//! talks to the real APIs and [`MockClient`](crate::mock::MockClient) serves
//! tests.

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::types::{
    ConnectionProfile, ConnectionProfileSpec, DatabaseInstance, Location, MigrationJob,
    MigrationJobSpec, OperationHandle, OperationSnapshot, Project,
};

/// Operations against connection profiles, migration jobs, database
/// instances and the project directory.
///
/// Every call either returns the current snapshot or fails with
/// [`ClientError`](crate::error::ClientError). Mutations may return before
/// their effect is durable; deletions hand back an [`OperationHandle`] to
/// poll.
#[async_trait]
pub trait RemoteResourceClient: Send + Sync {
    // Connection profiles

    async fn get_connection_profile(
        &self,
        location: &Location,
        profile_id: &str,
    ) -> ClientResult<ConnectionProfile>;

    async fn create_connection_profile(
        &self,
        location: &Location,
        profile_id: &str,
        spec: &ConnectionProfileSpec,
    ) -> ClientResult<()>;

    /// Patch only the fields listed in `update_mask`.
    async fn patch_connection_profile(
        &self,
        location: &Location,
        profile_id: &str,
        spec: &ConnectionProfileSpec,
        update_mask: &[&str],
    ) -> ClientResult<()>;

    /// Delete by full resource name.
    async fn delete_connection_profile(&self, name: &str) -> ClientResult<OperationHandle>;

    // Migration jobs

    async fn get_migration_job(
        &self,
        location: &Location,
        job_id: &str,
    ) -> ClientResult<MigrationJob>;

    async fn create_migration_job(
        &self,
        location: &Location,
        job_id: &str,
        spec: &MigrationJobSpec,
    ) -> ClientResult<()>;

    async fn start_migration_job(&self, location: &Location, job_id: &str) -> ClientResult<()>;

    async fn promote_migration_job(&self, location: &Location, job_id: &str)
    -> ClientResult<()>;

    async fn delete_migration_job(
        &self,
        location: &Location,
        job_id: &str,
    ) -> ClientResult<OperationHandle>;

    // Operations

    async fn get_operation(&self, handle: &OperationHandle) -> ClientResult<OperationSnapshot>;

    // Database instances

    async fn get_instance(&self, project_id: &str, instance: &str)
    -> ClientResult<DatabaseInstance>;

    async fn delete_instance(&self, project_id: &str, instance: &str)
    -> ClientResult<OperationHandle>;

    async fn create_user(
        &self,
        project_id: &str,
        instance: &str,
        username: &str,
        password: &str,
    ) -> ClientResult<()>;

    // Project directory

    async fn list_projects(&self) -> ClientResult<Vec<Project>>;
}
