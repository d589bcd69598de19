//! # Rankscout Warehouse
//!
//! DuckDB-backed persistence for discovery runs.
//!
//! ## Overview
//!
//! - **Discovery store**: whole id lists keyed by request fingerprint, with a TTL,
//!   implementing [`DiscoveryStore`] so repeated runs skip the id queries
//! - **Run log**: one row per finished discovery run for later inspection
//! - **Connection pooling** and versioned migrations
//!
//! All values are bound as query parameters; fingerprints and ids are never
//! interpolated into SQL.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `discovery_cache` | Id lists by fingerprint, with store time |
//! | `discovery_runs` | Finished run summaries |
//! | `schema_migrations` | Applied migration versions |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rankscout_warehouse::{Warehouse, WarehouseDiscoveryStore};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let store = Arc::new(WarehouseDiscoveryStore::new(warehouse));
//!     // engine.with_store(store)
//!     # let _ = store;
//!     Ok(())
//! }
//! ```

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use ::duckdb::{params, OptionalExt};
use rankscout_core::discovery::{DiscoveryOutcome, DiscoveryStore, StoreError};
use rankscout_core::{ItemId, UtcDateTime};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "RANKSCOUT_HOME";

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored id list no longer decodes.
    #[error("stored discovery entry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("warehouse task failed: {0}")]
    Task(String),
}

impl From<WarehouseError> for StoreError {
    fn from(error: WarehouseError) -> Self {
        match error {
            WarehouseError::Corrupt(source) => Self::Corrupt(source.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for rankscout data.
    pub rankscout_home: PathBuf,
    pub db_path: PathBuf,
    /// Idle connections kept open for reuse.
    pub max_pool_size: usize,
    /// Entries older than this are treated as absent.
    pub discovery_ttl: Duration,
}

impl WarehouseConfig {
    /// Default layout under `home`: `<home>/cache/discovery.duckdb`.
    pub fn at(home: impl Into<PathBuf>) -> Self {
        let rankscout_home = home.into();
        let db_path = rankscout_home.join("cache").join("discovery.duckdb");
        Self {
            rankscout_home,
            db_path,
            max_pool_size: 4,
            discovery_ttl: Duration::from_secs(2 * 60 * 60),
        }
    }

    pub fn with_discovery_ttl(mut self, ttl: Duration) -> Self {
        self.discovery_ttl = ttl;
        self
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::at(resolve_rankscout_home())
    }
}

/// Summary row written for every finished discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryRun {
    pub run_id: String,
    pub fingerprint: String,
    pub id_source: String,
    pub ids_considered: i64,
    pub candidates: i64,
    pub partial_failures: i64,
    pub cancelled: bool,
    /// Unix seconds.
    pub finished_at: i64,
}

impl DiscoveryRun {
    pub fn from_outcome(outcome: &DiscoveryOutcome, finished_at: i64) -> Self {
        Self {
            run_id: outcome.run_id.to_string(),
            fingerprint: outcome.fingerprint.clone(),
            id_source: outcome.id_source.as_str().to_owned(),
            ids_considered: outcome.ids_considered as i64,
            candidates: outcome.candidates.len() as i64,
            partial_failures: outcome.partial_failures.len() as i64,
            cancelled: outcome.cancelled,
            finished_at,
        }
    }
}

/// Discovery persistence over a pooled `DuckDB` file.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Opens (creating directories as needed) and migrates the database.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Id list stored for `fingerprint`, unless missing or older than the TTL at `now`.
    pub fn load_discovery(&self, fingerprint: &str, now: i64) -> Result<Option<Vec<ItemId>>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let row: Option<(String, i64)> = connection
            .query_row(
                "SELECT item_ids, stored_at FROM discovery_cache WHERE fingerprint = ?",
                params![fingerprint],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((item_ids, stored_at)) = row else {
            return Ok(None);
        };
        if now.saturating_sub(stored_at) >= self.ttl_secs() {
            debug!(fingerprint, "stored discovery entry expired");
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&item_ids)?))
    }

    /// Replaces the entry for `fingerprint` and drops expired entries.
    pub fn store_discovery(&self, fingerprint: &str, ids: &[ItemId], now: i64) -> Result<(), WarehouseError> {
        let item_ids = serde_json::to_string(ids)?;
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            connection.execute(
                "DELETE FROM discovery_cache WHERE stored_at <= ?",
                params![now.saturating_sub(self.ttl_secs())],
            )?;
            connection.execute(
                "INSERT OR REPLACE INTO discovery_cache (fingerprint, item_ids, id_count, stored_at) \
                 VALUES (?, ?, ?, ?)",
                params![fingerprint, item_ids, ids.len() as i64, now],
            )?;
            Ok(())
        })();
        finalize_transaction(&connection, result)
    }

    /// Removes expired entries, returning how many were dropped.
    pub fn purge_expired(&self, now: i64) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let removed = connection.execute(
            "DELETE FROM discovery_cache WHERE stored_at <= ?",
            params![now.saturating_sub(self.ttl_secs())],
        )?;
        Ok(removed)
    }

    pub fn record_run(&self, run: &DiscoveryRun) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute(
            "INSERT OR REPLACE INTO discovery_runs \
             (run_id, fingerprint, id_source, ids_considered, candidates, partial_failures, cancelled, finished_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                run.run_id,
                run.fingerprint,
                run.id_source,
                run.ids_considered,
                run.candidates,
                run.partial_failures,
                run.cancelled,
                run.finished_at
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<DiscoveryRun>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT run_id, fingerprint, id_source, ids_considered, candidates, partial_failures, \
             cancelled, finished_at FROM discovery_runs ORDER BY finished_at DESC, run_id LIMIT ?",
        )?;
        let rows = statement.query_map(params![limit as i64], |row| {
            Ok(DiscoveryRun {
                run_id: row.get(0)?,
                fingerprint: row.get(1)?,
                id_source: row.get(2)?,
                ids_considered: row.get(3)?,
                candidates: row.get(4)?,
                partial_failures: row.get(5)?,
                cancelled: row.get(6)?,
                finished_at: row.get(7)?,
            })
        })?;

        let mut runs = Vec::new();
        for run in rows {
            runs.push(run?);
        }
        Ok(runs)
    }

    fn ttl_secs(&self) -> i64 {
        i64::try_from(self.config.discovery_ttl.as_secs()).unwrap_or(i64::MAX)
    }
}

/// [`DiscoveryStore`] over a [`Warehouse`]; blocking calls run on tokio's blocking pool.
#[derive(Clone)]
pub struct WarehouseDiscoveryStore {
    warehouse: Warehouse,
}

impl WarehouseDiscoveryStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }
}

impl DiscoveryStore for WarehouseDiscoveryStore {
    fn get_cached_discovery<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<ItemId>>, StoreError>> + Send + 'a>> {
        let warehouse = self.warehouse.clone();
        let fingerprint = fingerprint.to_owned();
        Box::pin(async move {
            let now = unix_now();
            tokio::task::spawn_blocking(move || warehouse.load_discovery(&fingerprint, now))
                .await
                .map_err(|error| StoreError::Backend(error.to_string()))?
                .map_err(StoreError::from)
        })
    }

    fn put_cached_discovery<'a>(
        &'a self,
        fingerprint: &'a str,
        ids: &'a [ItemId],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        let warehouse = self.warehouse.clone();
        let fingerprint = fingerprint.to_owned();
        let ids = ids.to_vec();
        Box::pin(async move {
            let now = unix_now();
            tokio::task::spawn_blocking(move || warehouse.store_discovery(&fingerprint, &ids, now))
                .await
                .map_err(|error| StoreError::Backend(error.to_string()))?
                .map_err(StoreError::from)
        })
    }
}

/// Current time in unix seconds.
pub fn unix_now() -> i64 {
    UtcDateTime::now().into_inner().unix_timestamp()
}

fn finalize_transaction<T>(
    connection: &::duckdb::Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// `RANKSCOUT_HOME`, else `~/.rankscout`, else `./.rankscout`.
pub fn resolve_rankscout_home() -> PathBuf {
    if let Some(path) = env::var_os(HOME_ENV) {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".rankscout");
    }

    PathBuf::from(".rankscout")
}
