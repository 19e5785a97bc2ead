//! In-memory metrics store (no persistence)
//!
//! Used when the hub runs without a database and in tests. Rows get
//! sequential ids starting at 1, like a `serial` column.
//!
//! ## Limitations
//!
//! - **No persistence**: all data lost on restart
//! - **Unbounded**: every reading is kept until the process exits

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::error::{StorageError, StorageResult};
use super::repository::{HealthStatus, MetricsRepository, Repository};
use super::schema::MetricsRow;
use crate::ServerMetrics;

#[derive(Debug, Default)]
pub struct MemoryMetricsRepository {
    rows: RwLock<Vec<MetricsRow>>,
}

impl MemoryMetricsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl Repository for MemoryMetricsRepository {
    type Item = ServerMetrics;
    type Record = MetricsRow;

    async fn insert(&self, item: &ServerMetrics) -> StorageResult<()> {
        let mut rows = self.rows.write().await;
        let id = i32::try_from(rows.len() + 1)
            .map_err(|_| StorageError::QueryFailed("metrics id space exhausted".to_string()))?;
        rows.push(MetricsRow::from_server_metrics(id, item));
        trace!("stored metrics #{id} from {}", item.ip_address());
        Ok(())
    }

    async fn get_all(&self) -> StorageResult<Vec<MetricsRow>> {
        Ok(self.rows.read().await.clone())
    }

    async fn get(&self, id: i32) -> StorageResult<MetricsRow> {
        self.rows
            .read()
            .await
            .iter()
            .find(|row| row.metrics_id == id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }
}

#[async_trait]
impl MetricsRepository for MemoryMetricsRepository {
    async fn initialize(&self) -> StorageResult<()> {
        debug!("in-memory repository needs no initialization");
        Ok(())
    }

    async fn get_latest_per_source(&self) -> StorageResult<Vec<MetricsRow>> {
        let rows = self.rows.read().await;

        // later inserts win ties on equal timestamps
        let mut latest: BTreeMap<IpAddr, &MetricsRow> = BTreeMap::new();
        for row in rows.iter() {
            match latest.get(&row.ip_address) {
                Some(current) if current.timestamp > row.timestamp => {}
                _ => {
                    latest.insert(row.ip_address, row);
                }
            }
        }

        Ok(latest.into_values().cloned().collect())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_metrics".to_string(), self.len().await.to_string()),
            ]),
        })
    }
}
