// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! dmsync core
//!
//! Drives continuous PostgreSQL → Cloud SQL migrations through the cloud's
//! Database Migration service.
//!
//! # Architecture
//!
//! For each migration unit the orchestrator walks a fixed resource graph:
//! - Source connection profile (`src-{unit}`)
//! - Destination connection profile plus managed instance (`sql-{unit}-{stamp}`)
//! - Continuous migration job (`auto-mj-{unit}`)
//!
//! Every remote mutation is followed by a wait. Waits are pure step
//! functions over one snapshot, driven by [`poll::poll_until`] with capped
//! exponential backoff and a [`CancellationToken`](tokio_util::sync::CancellationToken).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dmsync_core::{
//!     ClientConfig, JsonFileStore, MigrationOrchestrator, PostgresProbe,
//!     PostgresProgressEstimator, RestClient,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = MigrationOrchestrator::builder()
//!     .client(Arc::new(RestClient::new(ClientConfig::from_env()?)?))
//!     .store(Arc::new(JsonFileStore::new("units.json")))
//!     .probe(Arc::new(PostgresProbe::default()))
//!     .progress(Arc::new(PostgresProgressEstimator::default()))
//!     .build()?;
//!
//! let outcome = orchestrator.sync("orders", &CancellationToken::new()).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod mock;
pub mod orchestrator;
pub mod poll;
pub mod probe;
pub mod profiles;
pub mod rest;
pub mod store;
pub mod types;
pub mod unit;
pub mod waiter;

pub use client::RemoteResourceClient;
pub use config::{ClientConfig, PollingConfig};
pub use error::{ClientError, ClientResult, MigrationError, Result};
pub use jobs::MigrationJobController;
pub use mock::{FailPoint, MockCalls, MockClient};
pub use orchestrator::{
    CleanupReport, CleanupStep, CleanupTarget, MigrationOrchestrator, OrchestratorBuilder,
    SyncOutcome,
};
pub use poll::{Backoff, BackoffPolicy, Step, poll_until};
pub use probe::{PostgresProbe, PostgresProgressEstimator, ProgressEstimator, ReachabilityProbe};
pub use profiles::{ConnectionProfileManager, ProfileOutcome};
pub use rest::RestClient;
pub use store::{ConfigStore, JsonFileStore, MemoryStore, UnitMap};
pub use types::{
    ConnectionProfile, ConnectionProfileSpec, DatabaseInstance, JobPhase, JobState, Location,
    MigrationJob, MigrationJobSpec, OperationHandle, OperationSnapshot, ProfileState, Project,
};
pub use unit::{DatabaseEndpoint, DestinationSettings, DiscoveredDestination, MigrationUnit};
pub use waiter::OperationWaiter;
