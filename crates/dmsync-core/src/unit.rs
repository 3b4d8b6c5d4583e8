// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Migration unit: one logical database to move, as held in the durable
//! configuration store.

use rand::Rng;
use rand::distributions::Uniform;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    CloudSqlProfile, CloudSqlSettings, ConnectionProfileSpec, JobPhase, Location,
    PostgresqlProfile, ProfileEndpoint,
};

const SOURCE_PROFILE_PREFIX: &str = "src-";
const JOB_PREFIX: &str = "auto-mj-";
const DESTINATION_PROFILE_PREFIX: &str = "sql-";
const INSTANCE_SUFFIX: &str = "-master";
const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PASSWORD_LEN: usize = 12;
const ROOT_USER: &str = "postgres";

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// Connection parameters for a PostgreSQL endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEndpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Provisioning parameters for the managed destination instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationSettings {
    pub cpu: u32,
    pub memory_mb: u32,
    pub storage_gb: u64,
    pub disk_type: String,
    pub database_version: String,
    #[serde(default)]
    pub auto_storage_increase: bool,
    #[serde(default)]
    pub ip_config: Value,
}

/// Fields learned while provisioning the destination.
///
/// Persisted right after discovery so a re-run resumes instead of
/// re-provisioning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDestination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,
}

/// One logical database migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationUnit {
    /// Key in the configuration store; filled in on load.
    #[serde(skip)]
    pub name: String,
    pub project_id: String,
    pub region: String,
    pub source: DatabaseEndpoint,
    pub destination: DestinationSettings,
    /// Phase `sync` waits for.
    #[serde(default = "default_target_phase")]
    pub target_phase: JobPhase,
    #[serde(default)]
    pub discovered: DiscoveredDestination,
}

fn default_target_phase() -> JobPhase {
    JobPhase::Cdc
}

impl MigrationUnit {
    pub fn location(&self) -> Location {
        Location::new(&self.project_id, &self.region)
    }

    /// `src-{name}`
    pub fn source_profile_id(&self) -> String {
        format!("{}{}", SOURCE_PROFILE_PREFIX, self.name)
    }

    /// `auto-mj-{name}`, stable across retries.
    pub fn job_id(&self) -> String {
        format!("{}{}", JOB_PREFIX, self.name)
    }

    /// `sql-{name}-{stamp}`; a new stamp per process start.
    pub fn destination_profile_id(&self, stamp: &str) -> String {
        format!("{}{}-{}", DESTINATION_PROFILE_PREFIX, self.name, stamp)
    }

    /// Destination as reachable with the discovered root credential.
    pub fn destination_endpoint(&self) -> Option<DatabaseEndpoint> {
        let discovered = &self.discovered;
        Some(DatabaseEndpoint {
            host: discovered.host.clone()?,
            port: DEFAULT_PORT,
            username: ROOT_USER.to_string(),
            password: discovered.root_password.clone()?,
        })
    }

    pub fn source_profile_spec(&self) -> ConnectionProfileSpec {
        ConnectionProfileSpec {
            display_name: self.source_profile_id(),
            endpoint: ProfileEndpoint::Postgresql(PostgresqlProfile {
                host: self.source.host.clone(),
                port: self.source.port,
                username: self.source.username.clone(),
                password: self.source.password.clone(),
            }),
        }
    }

    pub fn destination_profile_spec(
        &self,
        profile_id: &str,
        root_password: &str,
    ) -> ConnectionProfileSpec {
        let settings = &self.destination;
        ConnectionProfileSpec {
            display_name: profile_id.to_string(),
            endpoint: ProfileEndpoint::Cloudsql(CloudSqlProfile {
                settings: CloudSqlSettings {
                    auto_storage_increase: settings.auto_storage_increase,
                    data_disk_type: settings.disk_type.clone(),
                    root_password: root_password.to_string(),
                    database_version: settings.database_version.clone(),
                    tier: format!("db-custom-{}-{}", settings.cpu, settings.memory_mb),
                    data_disk_size_gb: settings.storage_gb,
                    source_id: self.location().profile_name(&self.source_profile_id()),
                    ip_config: settings.ip_config.clone(),
                },
            }),
        }
    }
}

/// Cloud SQL instance that backs a destination connection profile.
pub fn backing_instance(destination_profile_id: &str) -> String {
    format!("{}{}", destination_profile_id, INSTANCE_SUFFIX)
}

/// Random root credential: 12 characters from `A-Z0-9`.
pub fn generate_password() -> String {
    let dist = Uniform::from(0..PASSWORD_ALPHABET.len());
    rand::thread_rng()
        .sample_iter(dist)
        .take(PASSWORD_LEN)
        .map(|i| PASSWORD_ALPHABET[i] as char)
        .collect()
}

/// Timestamp suffix for destination profile IDs, e.g. `20240131t235959`.
pub fn run_stamp(now: chrono::DateTime<chrono::Local>) -> String {
    now.format("%Y%m%dt%H%M%S").to_string()
}
