// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! REST implementation of [`RemoteResourceClient`].
//!
//! Talks JSON over HTTPS to the Database Migration, Cloud SQL Admin and
//! Resource Manager APIs with a bearer token. HTTP 404 maps to
//! [`ClientError::NotFound`]; every other non-2xx status becomes
//! [`ClientError::Transport`] carrying the status and response body.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::client::RemoteResourceClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, MigrationError, Result};
use crate::types::{
    ConnectionProfile, ConnectionProfileSpec, DatabaseInstance, Location, MigrationJob,
    MigrationJobSpec, OperationApi, OperationHandle, OperationSnapshot, Project,
};

/// Name of the operation returned by a mutating call.
#[derive(Debug, Deserialize)]
struct OperationRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectPage {
    #[serde(default)]
    projects: Vec<Project>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// HTTP client for the cloud control plane.
pub struct RestClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl RestClient {
    /// Create a new client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MigrationError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Create a client from `DMSYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    fn dms_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.dms_endpoint, path)
    }

    fn sql_url(&self, project_id: &str, path: &str) -> String {
        format!(
            "{}/projects/{}/{}",
            self.config.sqladmin_endpoint,
            urlencoding::encode(project_id),
            path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.config.access_token)
    }

    /// Send a request and map non-2xx statuses.
    async fn send(&self, request: RequestBuilder, what: &str) -> ClientResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, what, "Request rejected");
        if status == StatusCode::NOT_FOUND {
            Err(ClientError::NotFound(what.to_string()))
        } else {
            Err(ClientError::Transport(format!("HTTP {} for {}: {}", status, what, body)))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> ClientResult<T> {
        let response = self.send(self.request(Method::GET, url), what).await?;
        Ok(response.json::<T>().await?)
    }

    async fn post_json(&self, url: &str, body: &Value, what: &str) -> ClientResult<Value> {
        let response = self
            .send(self.request(Method::POST, url).json(body), what)
            .await?;
        Ok(response.json::<Value>().await?)
    }

    async fn delete_op(&self, url: &str, what: &str) -> ClientResult<OperationRef> {
        let response = self.send(self.request(Method::DELETE, url), what).await?;
        Ok(response.json::<OperationRef>().await?)
    }
}

#[async_trait]
impl RemoteResourceClient for RestClient {
    #[instrument(skip(self))]
    async fn get_connection_profile(
        &self,
        location: &Location,
        profile_id: &str,
    ) -> ClientResult<ConnectionProfile> {
        let name = location.profile_name(profile_id);
        self.get_json(&self.dms_url(&name), &name).await
    }

    #[instrument(skip(self, spec))]
    async fn create_connection_profile(
        &self,
        location: &Location,
        profile_id: &str,
        spec: &ConnectionProfileSpec,
    ) -> ClientResult<()> {
        let url = format!(
            "{}/connectionProfiles?connectionProfileId={}",
            self.dms_url(&location.parent()),
            urlencoding::encode(profile_id)
        );
        let body = serde_json::to_value(spec)?;
        let op = self.post_json(&url, &body, profile_id).await?;
        debug!(operation = ?op.get("name"), "Connection profile creation accepted");
        Ok(())
    }

    #[instrument(skip(self, spec))]
    async fn patch_connection_profile(
        &self,
        location: &Location,
        profile_id: &str,
        spec: &ConnectionProfileSpec,
        update_mask: &[&str],
    ) -> ClientResult<()> {
        let name = location.profile_name(profile_id);
        let url = format!(
            "{}?updateMask={}",
            self.dms_url(&name),
            urlencoding::encode(&update_mask.join(","))
        );
        let request = self
            .request(Method::PATCH, &url)
            .json(&serde_json::to_value(spec)?);
        self.send(request, &name).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_connection_profile(&self, name: &str) -> ClientResult<OperationHandle> {
        let op = self.delete_op(&self.dms_url(name), name).await?;
        Ok(OperationHandle::dms(op.name))
    }

    #[instrument(skip(self))]
    async fn get_migration_job(
        &self,
        location: &Location,
        job_id: &str,
    ) -> ClientResult<MigrationJob> {
        let name = location.job_name(job_id);
        self.get_json(&self.dms_url(&name), &name).await
    }

    #[instrument(skip(self, spec))]
    async fn create_migration_job(
        &self,
        location: &Location,
        job_id: &str,
        spec: &MigrationJobSpec,
    ) -> ClientResult<()> {
        let url = format!(
            "{}/migrationJobs?migrationJobId={}",
            self.dms_url(&location.parent()),
            urlencoding::encode(job_id)
        );
        let body = serde_json::to_value(spec)?;
        self.post_json(&url, &body, job_id).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn start_migration_job(&self, location: &Location, job_id: &str) -> ClientResult<()> {
        let name = location.job_name(job_id);
        let url = format!("{}:start", self.dms_url(&name));
        self.post_json(&url, &json!({}), &name).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn promote_migration_job(
        &self,
        location: &Location,
        job_id: &str,
    ) -> ClientResult<()> {
        let name = location.job_name(job_id);
        let url = format!("{}:promote", self.dms_url(&name));
        self.post_json(&url, &json!({}), &name).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_migration_job(
        &self,
        location: &Location,
        job_id: &str,
    ) -> ClientResult<OperationHandle> {
        let name = location.job_name(job_id);
        let op = self.delete_op(&self.dms_url(&name), &name).await?;
        Ok(OperationHandle::dms(op.name))
    }

    async fn get_operation(&self, handle: &OperationHandle) -> ClientResult<OperationSnapshot> {
        let url = match &handle.api {
            OperationApi::Dms => self.dms_url(&handle.name),
            OperationApi::SqlAdmin { project_id } => self.sql_url(
                project_id,
                &format!("operations/{}", urlencoding::encode(&handle.name)),
            ),
        };
        let body: Value = self.get_json(&url, &handle.name).await?;
        Ok(OperationSnapshot(body))
    }

    #[instrument(skip(self))]
    async fn get_instance(
        &self,
        project_id: &str,
        instance: &str,
    ) -> ClientResult<DatabaseInstance> {
        let url = self.sql_url(
            project_id,
            &format!("instances/{}", urlencoding::encode(instance)),
        );
        self.get_json(&url, instance).await
    }

    #[instrument(skip(self))]
    async fn delete_instance(
        &self,
        project_id: &str,
        instance: &str,
    ) -> ClientResult<OperationHandle> {
        let url = self.sql_url(
            project_id,
            &format!("instances/{}", urlencoding::encode(instance)),
        );
        let op = self.delete_op(&url, instance).await?;
        Ok(OperationHandle::sql_admin(project_id, op.name))
    }

    #[instrument(skip(self, password))]
    async fn create_user(
        &self,
        project_id: &str,
        instance: &str,
        username: &str,
        password: &str,
    ) -> ClientResult<()> {
        let url = self.sql_url(
            project_id,
            &format!("instances/{}/users", urlencoding::encode(instance)),
        );
        let body = json!({"name": username, "password": password});
        self.post_json(&url, &body, instance).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> ClientResult<Vec<Project>> {
        let base = format!("{}/projects", self.config.resource_manager_endpoint);
        let mut projects = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{}?pageToken={}", base, urlencoding::encode(token)),
                None => base.clone(),
            };
            let page: ProjectPage = self.get_json(&url, "projects").await?;
            projects.extend(page.projects);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(count = projects.len(), "Listed projects");
        Ok(projects)
    }
}
