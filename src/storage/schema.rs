//! Metrics table layout and the row type read back from it
//!
//! Only the aggregate figures are persisted. Drive details and the machine
//! name stay in the live report; the source is identified by its address.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::query::{ColumnAttribute, ColumnType, QueryBuilder, QueryBuilderError};
use crate::ServerMetrics;

/// Columns written by an insert, in bind order
pub const INSERT_COLUMNS: [&str; 5] = [
    "ip_address",
    "cpu_usage_percent",
    "memory_available_mbytes",
    "memory_total_mbytes",
    "timestamp",
];

/// `CREATE TABLE` statement for the metrics table
pub fn metrics_table_definition(table: &str) -> Result<String, QueryBuilderError> {
    use ColumnAttribute::*;

    QueryBuilder::create_table(table)?
        .column_with("metrics_id", ColumnType::Serial, &[PrimaryKey])?
        .column_with("ip_address", ColumnType::IpAddress, &[NotNull])?
        .column_with("cpu_usage_percent", ColumnType::Real, &[NotNull])?
        .column_with("memory_available_mbytes", ColumnType::Integer, &[NotNull])?
        .column_with("memory_total_mbytes", ColumnType::Integer, &[NotNull])?
        .column_with("timestamp", ColumnType::Timestamp, &[NotNull])?
        .build()
}

/// One persisted reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRow {
    pub metrics_id: i32,

    pub ip_address: IpAddr,

    pub cpu_usage_percent: f32,

    pub memory_available_mbytes: i32,

    pub memory_total_mbytes: i32,

    /// Ingestion time at the hub (UTC)
    pub timestamp: DateTime<Utc>,
}

impl MetricsRow {
    pub fn from_server_metrics(metrics_id: i32, metrics: &ServerMetrics) -> Self {
        let snapshot = metrics.snapshot();
        Self {
            metrics_id,
            ip_address: metrics.ip_address(),
            cpu_usage_percent: snapshot.processor_usage_percent(),
            memory_available_mbytes: snapshot.available_memory_mbytes(),
            memory_total_mbytes: snapshot.total_memory_mbytes(),
            timestamp: metrics.timestamp(),
        }
    }

    pub fn memory_usage_percent(&self) -> f32 {
        if self.memory_total_mbytes <= 0 {
            return 0.0;
        }
        100.0 - self.memory_available_mbytes as f32 * 100.0 / self.memory_total_mbytes as f32
    }
}
