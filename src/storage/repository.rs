//! Repository traits shared by all metrics stores

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tracing::error;

use super::error::{StorageError, StorageResult};
use super::schema::MetricsRow;
use crate::ServerMetrics;

/// Health status of a repository
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Is the store operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional store-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Generic create/read store.
///
/// Writes go through [`Repository::create`], which never fails: storage
/// problems are logged and the item is dropped. Use
/// [`Repository::insert`] directly when the caller needs the error.
///
/// `remove` and `update` are part of the surface but stored readings are
/// append-only, so the provided implementations refuse them.
#[async_trait]
pub trait Repository: Send + Sync {
    type Item: Send + Sync + 'static;
    type Record: Send + 'static;

    /// Persist one item
    async fn insert(&self, item: &Self::Item) -> StorageResult<()>;

    /// Persist one item, logging instead of returning failures
    async fn create(&self, item: &Self::Item) {
        if let Err(e) = self.insert(item).await {
            error!("failed to persist item: {e}");
        }
    }

    async fn get_all(&self) -> StorageResult<Vec<Self::Record>>;

    /// Fails with [`StorageError::NotFound`] when no record has this id
    async fn get(&self, id: i32) -> StorageResult<Self::Record>;

    async fn remove(&self, _id: i32) -> StorageResult<()> {
        Err(StorageError::Unsupported("remove"))
    }

    async fn update(&self, _id: i32, _item: &Self::Item) -> StorageResult<()> {
        Err(StorageError::Unsupported("update"))
    }
}

/// Store for readings received by the hub
#[async_trait]
pub trait MetricsRepository: Repository<Item = ServerMetrics, Record = MetricsRow> {
    /// Make sure the database and the metrics table exist.
    ///
    /// Safe to call on every start; does nothing when already set up.
    async fn initialize(&self) -> StorageResult<()>;

    /// Most recent reading for every distinct source address
    async fn get_latest_per_source(&self) -> StorageResult<Vec<MetricsRow>>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;
}
