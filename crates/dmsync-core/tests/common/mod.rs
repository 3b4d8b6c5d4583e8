// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for dmsync-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use dmsync_core::{
    DatabaseEndpoint, Location, MemoryStore, MigrationOrchestrator, MigrationUnit, MockClient,
    ProgressEstimator, ReachabilityProbe, Result,
};

pub const PROJECT: &str = "acme-prod";
pub const REGION: &str = "europe-west1";
pub const STAMP: &str = "20240101t000000";

pub fn location() -> Location {
    Location::new(PROJECT, REGION)
}

/// A unit with default target phase and nothing discovered yet.
pub fn unit(name: &str) -> MigrationUnit {
    let mut unit: MigrationUnit = serde_json::from_value(json!({
        "project_id": PROJECT,
        "region": REGION,
        "source": {
            "host": format!("{}.rds.example.com", name),
            "username": "repl",
            "password": "source-pw"
        },
        "destination": {
            "cpu": 2,
            "memory_mb": 7680,
            "storage_gb": 100,
            "disk_type": "PD_SSD",
            "database_version": "POSTGRES_14"
        }
    }))
    .unwrap();
    unit.name = name.to_string();
    unit
}

/// Reachability probe with a fixed answer.
pub struct StaticProbe(pub bool);

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn is_reachable(&self, _endpoint: &DatabaseEndpoint) -> bool {
        self.0
    }
}

/// Progress estimator with a fixed answer.
pub struct FixedProgress(pub f64);

#[async_trait]
impl ProgressEstimator for FixedProgress {
    async fn percentage_migrated(
        &self,
        _source: &DatabaseEndpoint,
        _destination: &DatabaseEndpoint,
    ) -> Result<f64> {
        Ok(self.0)
    }
}

pub fn orchestrator(
    client: Arc<MockClient>,
    store: Arc<MemoryStore>,
    reachable: bool,
) -> MigrationOrchestrator {
    MigrationOrchestrator::builder()
        .client(client)
        .store(store)
        .probe(Arc::new(StaticProbe(reachable)))
        .progress(Arc::new(FixedProgress(42.5)))
        .run_stamp(STAMP)
        .build()
        .unwrap()
}
