// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Source reachability and migration progress, measured directly against
//! the PostgreSQL endpoints.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};
use tracing::{debug, info};

use crate::error::{MigrationError, Result};
use crate::unit::DatabaseEndpoint;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

const EXCLUDED_DATABASES: &[&str] = &["template0", "template1", "rdsadmin", "cloudsqladmin"];
const EXCLUDED_SCHEMAS: &[&str] = &[
    "pg_temp_1",
    "pg_toast_temp_1",
    "pg_catalog",
    "information_schema",
    "pglogical",
];

const SQL_DATABASES: &str = "SELECT datname::text FROM pg_catalog.pg_database";
const SQL_SCHEMAS: &str = "SELECT schema_name::text FROM information_schema.schemata ORDER BY 1";
const SQL_TABLES: &str = r#"
SELECT table_schema::text, table_name::text,
       pg_relation_size(quote_ident(table_schema) || '.' || quote_ident(table_name)) AS size
FROM information_schema.tables
WHERE table_type = 'BASE TABLE' AND table_schema::text = ANY($1)
ORDER BY 1, 2
"#;

/// Lightweight "can we log in" check against the source.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, endpoint: &DatabaseEndpoint) -> bool;
}

/// Compares synchronized vs. total data volume.
#[async_trait]
pub trait ProgressEstimator: Send + Sync {
    /// Percentage (0–100) of source table bytes present on the destination.
    async fn percentage_migrated(
        &self,
        source: &DatabaseEndpoint,
        destination: &DatabaseEndpoint,
    ) -> Result<f64>;
}

fn connect_options(endpoint: &DatabaseEndpoint, database: &str) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&endpoint.host)
        .port(endpoint.port)
        .username(&endpoint.username)
        .password(&endpoint.password)
        .database(database)
}

async fn connect(
    endpoint: &DatabaseEndpoint,
    database: &str,
    timeout: Duration,
) -> Result<PgConnection> {
    match tokio::time::timeout(timeout, PgConnection::connect_with(&connect_options(endpoint, database)))
        .await
    {
        Ok(conn) => Ok(conn?),
        Err(_) => Err(MigrationError::Probe(format!(
            "connection to {}:{} timed out after {}s",
            endpoint.host,
            endpoint.port,
            timeout.as_secs()
        ))),
    }
}

/// Connects to the `postgres` database with a short timeout.
#[derive(Debug, Clone)]
pub struct PostgresProbe {
    connect_timeout: Duration,
}

impl Default for PostgresProbe {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PostgresProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ReachabilityProbe for PostgresProbe {
    async fn is_reachable(&self, endpoint: &DatabaseEndpoint) -> bool {
        info!(host = %endpoint.host, "Testing connection");
        match connect(endpoint, "postgres", self.connect_timeout).await {
            Ok(conn) => {
                let _ = conn.close().await;
                info!(host = %endpoint.host, "Connection successful");
                true
            }
            Err(e) => {
                info!(host = %endpoint.host, "Connection not successful");
                debug!(error = %e, "Connection failure detail");
                false
            }
        }
    }
}

/// Table key: (database, schema, table).
pub type TableKey = (String, String, String);

/// Sizes every base table on both sides and compares them.
#[derive(Debug, Clone)]
pub struct PostgresProgressEstimator {
    connect_timeout: Duration,
}

impl Default for PostgresProgressEstimator {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PostgresProgressEstimator {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn table_sizes(&self, endpoint: &DatabaseEndpoint) -> Result<HashMap<TableKey, i64>> {
        debug!(host = %endpoint.host, "Listing databases");
        let mut conn = connect(endpoint, "postgres", self.connect_timeout).await?;
        let databases: Vec<String> = sqlx::query_scalar::<_, String>(SQL_DATABASES)
            .fetch_all(&mut conn)
            .await?
            .into_iter()
            .filter(|db: &String| !EXCLUDED_DATABASES.contains(&db.as_str()))
            .collect();
        let _ = conn.close().await;

        let mut sizes = HashMap::new();
        for database in databases {
            debug!(host = %endpoint.host, database = %database, "Listing tables");
            let mut conn = connect(endpoint, &database, self.connect_timeout).await?;
            let schemas: Vec<String> = sqlx::query_scalar::<_, String>(SQL_SCHEMAS)
                .fetch_all(&mut conn)
                .await?
                .into_iter()
                .filter(|s: &String| !EXCLUDED_SCHEMAS.contains(&s.as_str()))
                .collect();

            let rows = sqlx::query(SQL_TABLES)
                .bind(&schemas)
                .fetch_all(&mut conn)
                .await?;
            for row in rows {
                let schema: String = row.try_get(0)?;
                let table: String = row.try_get(1)?;
                let size: i64 = row.try_get(2)?;
                sizes.insert((database.clone(), schema, table), size);
            }
            let _ = conn.close().await;
        }
        Ok(sizes)
    }
}

/// Inner join on table key; destination sizes are clipped to the source's.
pub fn percentage(source: &HashMap<TableKey, i64>, destination: &HashMap<TableKey, i64>) -> f64 {
    let (mut total, mut synced) = (0i64, 0i64);
    for (key, src_size) in source {
        if let Some(dst_size) = destination.get(key) {
            total += src_size;
            synced += (*dst_size).min(*src_size);
        }
    }
    if total == 0 {
        return 0.0;
    }
    synced as f64 / total as f64 * 100.0
}

#[async_trait]
impl ProgressEstimator for PostgresProgressEstimator {
    async fn percentage_migrated(
        &self,
        source: &DatabaseEndpoint,
        destination: &DatabaseEndpoint,
    ) -> Result<f64> {
        let src = self.table_sizes(source).await?;
        let dst = self.table_sizes(destination).await?;
        debug!(source_tables = src.len(), destination_tables = dst.len(), "Comparing sizes");
        Ok(percentage(&src, &dst))
    }
}
