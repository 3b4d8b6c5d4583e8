// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable configuration store for migration units.
//!
//! A single document maps unit name → [`MigrationUnit`]. Writers replace the
//! whole document; [`ConfigStore::save_unit`] is the read-modify-write used
//! by the orchestrator to persist discovered destination fields.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::unit::MigrationUnit;

/// Units keyed by name.
pub type UnitMap = BTreeMap<String, MigrationUnit>;

/// Read-all / write-all store of migration units.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load every unit, with `name` filled in from its key.
    async fn load_all(&self) -> Result<UnitMap>;

    /// Atomically replace the whole document.
    async fn save_all(&self, units: &UnitMap) -> Result<()>;

    /// Load one unit by name.
    async fn load_unit(&self, name: &str) -> Result<MigrationUnit> {
        self.load_all()
            .await?
            .remove(name)
            .ok_or_else(|| MigrationError::UnitNotFound(name.to_string()))
    }

    /// Replace one unit, keeping the others as currently stored.
    async fn save_unit(&self, unit: &MigrationUnit) -> Result<()> {
        let mut units = self.load_all().await?;
        units.insert(unit.name.clone(), unit.clone());
        self.save_all(&units).await
    }
}

fn with_names(mut units: UnitMap) -> UnitMap {
    for (name, unit) in units.iter_mut() {
        unit.name = name.clone();
    }
    units
}

/// JSON document on disk, written through a temp file and rename.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<UnitMap> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            MigrationError::Store(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let units: UnitMap = serde_json::from_slice(&bytes)?;
        Ok(with_names(units))
    }

    async fn write(&self, units: &UnitMap) -> Result<()> {
        let body = serde_json::to_vec_pretty(units)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), units = units.len(), "Configuration saved");
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn load_all(&self) -> Result<UnitMap> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn save_all(&self, units: &UnitMap) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write(units).await
    }

    async fn save_unit(&self, unit: &MigrationUnit) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut units = self.read().await?;
        units.insert(unit.name.clone(), unit.clone());
        self.write(&units).await
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    units: Mutex<UnitMap>,
}

impl MemoryStore {
    pub fn new(units: impl IntoIterator<Item = MigrationUnit>) -> Self {
        Self {
            units: Mutex::new(
                units
                    .into_iter()
                    .map(|unit| (unit.name.clone(), unit))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load_all(&self) -> Result<UnitMap> {
        Ok(self.units.lock().await.clone())
    }

    async fn save_all(&self, units: &UnitMap) -> Result<()> {
        *self.units.lock().await = units.clone();
        Ok(())
    }

    async fn save_unit(&self, unit: &MigrationUnit) -> Result<()> {
        self.units
            .lock()
            .await
            .insert(unit.name.clone(), unit.clone());
        Ok(())
    }
}
