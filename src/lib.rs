pub mod actors;
pub mod agent;
pub mod config;
pub mod hub;
pub mod logging;
pub mod notifications;
pub mod protocol;
pub mod storage;
pub mod util;

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MBYTES_PER_GBYTE: f32 = 1024.0;

/// Errors raised when a metrics value violates its invariants
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsError {
    /// A value that must be zero or greater was negative (or NaN)
    Negative(&'static str),

    /// A value that must be strictly positive was zero or negative
    NotPositive(&'static str),
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsError::Negative(field) => write!(f, "{field} must be greater or equal to zero"),
            MetricsError::NotPositive(field) => write!(f, "{field} must be greater than zero"),
        }
    }
}

impl std::error::Error for MetricsError {}

fn verify_non_negative_f32(field: &'static str, value: f32) -> Result<f32, MetricsError> {
    // NaN fails this comparison as well
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(MetricsError::Negative(field))
    }
}

fn verify_non_negative(field: &'static str, value: i32) -> Result<i32, MetricsError> {
    if value >= 0 {
        Ok(value)
    } else {
        Err(MetricsError::Negative(field))
    }
}

fn verify_positive(field: &'static str, value: i32) -> Result<i32, MetricsError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(MetricsError::NotPositive(field))
    }
}

/// One point-in-time reading of a host's resource usage.
///
/// Instances are validated on construction and on deserialization, so every
/// snapshot that exists satisfies: processor usage >= 0, available memory >= 0
/// and total memory > 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetricsSnapshot")]
pub struct MetricsSnapshot {
    machine_name: String,
    processor_usage_percent: f32,
    available_memory_mbytes: i32,
    total_memory_mbytes: i32,
    drives: Vec<DriveMetrics>,
}

#[derive(Deserialize)]
struct RawMetricsSnapshot {
    machine_name: String,
    processor_usage_percent: f32,
    available_memory_mbytes: i32,
    total_memory_mbytes: i32,
    #[serde(default)]
    drives: Vec<DriveMetrics>,
}

impl TryFrom<RawMetricsSnapshot> for MetricsSnapshot {
    type Error = MetricsError;

    fn try_from(raw: RawMetricsSnapshot) -> Result<Self, Self::Error> {
        MetricsSnapshot::new(
            raw.machine_name,
            raw.processor_usage_percent,
            raw.available_memory_mbytes,
            raw.total_memory_mbytes,
            raw.drives,
        )
    }
}

impl MetricsSnapshot {
    pub fn new(
        machine_name: impl Into<String>,
        processor_usage_percent: f32,
        available_memory_mbytes: i32,
        total_memory_mbytes: i32,
        drives: Vec<DriveMetrics>,
    ) -> Result<Self, MetricsError> {
        Ok(Self {
            machine_name: machine_name.into(),
            processor_usage_percent: verify_non_negative_f32(
                "processor_usage_percent",
                processor_usage_percent,
            )?,
            available_memory_mbytes: verify_non_negative(
                "available_memory_mbytes",
                available_memory_mbytes,
            )?,
            total_memory_mbytes: verify_positive("total_memory_mbytes", total_memory_mbytes)?,
            drives,
        })
    }

    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    pub fn processor_usage_percent(&self) -> f32 {
        self.processor_usage_percent
    }

    pub fn available_memory_mbytes(&self) -> i32 {
        self.available_memory_mbytes
    }

    pub fn total_memory_mbytes(&self) -> i32 {
        self.total_memory_mbytes
    }

    pub fn drives(&self) -> &[DriveMetrics] {
        &self.drives
    }

    pub fn memory_usage_mbytes(&self) -> i32 {
        self.total_memory_mbytes - self.available_memory_mbytes
    }

    pub fn memory_available_percent(&self) -> f32 {
        self.available_memory_mbytes as f32 * 100.0 / self.total_memory_mbytes as f32
    }

    pub fn memory_usage_percent(&self) -> f32 {
        100.0 - self.memory_available_percent()
    }

    /// Usage across all drives, or `-1.0` when no drives were reported
    pub fn drives_usage_percent(&self) -> f32 {
        let total: i64 = self.drives.iter().map(|d| d.total_size_mbytes as i64).sum();
        if total <= 0 {
            return -1.0;
        }
        let free: i64 = self
            .drives
            .iter()
            .map(|d| d.available_free_space_mbytes as i64)
            .sum();
        100.0 - (free as f32 * 100.0 / total as f32)
    }

    /// Wrap the snapshot with the ingestion metadata captured by the hub
    pub fn into_server_metrics(
        self,
        connection_id: impl Into<String>,
        ip_address: IpAddr,
        timestamp: DateTime<Utc>,
    ) -> ServerMetrics {
        ServerMetrics {
            snapshot: self,
            connection_id: connection_id.into(),
            ip_address,
            timestamp,
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CPU: {:.2}%, Memory: {:.2} / {:.2} GB, Drives: [",
            self.processor_usage_percent,
            self.memory_usage_mbytes() as f32 / MBYTES_PER_GBYTE,
            self.total_memory_mbytes as f32 / MBYTES_PER_GBYTE,
        )?;
        for (i, drive) in self.drives.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{drive}")?;
        }
        write!(f, "]")
    }
}

/// Capacity of a single mounted drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDriveMetrics")]
pub struct DriveMetrics {
    name: String,
    available_free_space_mbytes: i32,
    total_size_mbytes: i32,
}

#[derive(Deserialize)]
struct RawDriveMetrics {
    name: String,
    available_free_space_mbytes: i32,
    total_size_mbytes: i32,
}

impl TryFrom<RawDriveMetrics> for DriveMetrics {
    type Error = MetricsError;

    fn try_from(raw: RawDriveMetrics) -> Result<Self, Self::Error> {
        DriveMetrics::new(
            raw.name,
            raw.available_free_space_mbytes,
            raw.total_size_mbytes,
        )
    }
}

impl DriveMetrics {
    pub fn new(
        name: impl Into<String>,
        available_free_space_mbytes: i32,
        total_size_mbytes: i32,
    ) -> Result<Self, MetricsError> {
        Ok(Self {
            name: name.into(),
            available_free_space_mbytes: verify_non_negative(
                "available_free_space_mbytes",
                available_free_space_mbytes,
            )?,
            total_size_mbytes: verify_positive("total_size_mbytes", total_size_mbytes)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available_free_space_mbytes(&self) -> i32 {
        self.available_free_space_mbytes
    }

    pub fn total_size_mbytes(&self) -> i32 {
        self.total_size_mbytes
    }
}

impl fmt::Display for DriveMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total_size_mbytes as f32 >= MBYTES_PER_GBYTE {
            write!(
                f,
                "{} - {:.2}/{:.2} GB",
                self.name,
                self.available_free_space_mbytes as f32 / MBYTES_PER_GBYTE,
                self.total_size_mbytes as f32 / MBYTES_PER_GBYTE
            )
        } else {
            write!(
                f,
                "{} - {}/{} MB",
                self.name, self.available_free_space_mbytes, self.total_size_mbytes
            )
        }
    }
}

/// A snapshot as received by the hub, tagged with where and when it arrived.
///
/// Only the inbound handler creates these; afterwards they are shared
/// read-only between the queue, the broadcaster and its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMetrics {
    snapshot: MetricsSnapshot,
    connection_id: String,
    ip_address: IpAddr,
    timestamp: DateTime<Utc>,
}

impl ServerMetrics {
    pub fn snapshot(&self) -> &MetricsSnapshot {
        &self.snapshot
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn ip_address(&self) -> IpAddr {
        self.ip_address
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Settings pushed from the hub to every connected agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationMessage {
    pub update_interval_seconds: u32,
}

impl ConfigurationMessage {
    pub const DEFAULT_UPDATE_INTERVAL_SECONDS: u32 = 5;

    pub const fn new(update_interval_seconds: u32) -> Self {
        Self {
            update_interval_seconds,
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds as u64)
    }
}

impl Default for ConfigurationMessage {
    fn default() -> Self {
        Self::new(Self::DEFAULT_UPDATE_INTERVAL_SECONDS)
    }
}

impl fmt::Display for ConfigurationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ update_interval_seconds: {} }}", self.update_interval_seconds)
    }
}
