//! Live views fed by the broadcasters
//!
//! `MetricsReport` keeps the latest reading per connection so the API can
//! show which agents are alive. `LogReport` keeps a bounded tail of the
//! hub's own log lines. Both are updated synchronously from a listener, so
//! they use a std lock and never hold it across an await.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ServerMetrics;
use crate::logging::LogMessage;
use crate::notifications::{NotificationManager, Subscription};

/// Maximum log lines kept for the API
pub const LOG_REPORT_CAPACITY: usize = 500;

/// A connection is considered lost after this many missed intervals
const CONNECTION_LOST_FACTOR: f64 = 1.5;

/// Latest reading of one connected agent
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub metrics: ServerMetrics,

    /// Seconds since the reading arrived
    pub elapsed_seconds: i64,

    pub connection_lost: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsReport {
    servers: Arc<RwLock<BTreeMap<String, ServerMetrics>>>,
}

impl MetricsReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep this report updated from `manager` for as long as the returned
    /// subscription lives
    pub fn attach(&self, manager: &NotificationManager<ServerMetrics>) -> Subscription {
        let report = self.clone();
        manager.subscribe(move |metrics: &ServerMetrics| {
            report.add_server_metrics(metrics.clone());
            Ok(())
        })
    }

    /// Replace the reading for the metrics' connection
    pub fn add_server_metrics(&self, metrics: ServerMetrics) {
        self.servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(metrics.connection_id().to_string(), metrics);
    }

    pub fn remove_server(&self, connection_id: &str) -> Option<ServerMetrics> {
        self.servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(connection_id)
    }

    pub fn get(&self, connection_id: &str) -> Option<ServerMetrics> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(connection_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections whose latest reading is within the lost threshold
    pub fn connected_count(&self, update_interval: Duration, now: DateTime<Utc>) -> usize {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|metrics| !is_connection_lost(metrics, update_interval, now))
            .count()
    }

    /// Status of every connection, ordered by connection id
    pub fn servers(&self, update_interval: Duration, now: DateTime<Utc>) -> Vec<ServerStatus> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|metrics| ServerStatus {
                elapsed_seconds: (now - metrics.timestamp()).num_seconds(),
                connection_lost: is_connection_lost(metrics, update_interval, now),
                metrics: metrics.clone(),
            })
            .collect()
    }
}

/// Whether no reading arrived for more than one and a half update intervals
pub fn is_connection_lost(
    metrics: &ServerMetrics,
    update_interval: Duration,
    now: DateTime<Utc>,
) -> bool {
    let elapsed = (now - metrics.timestamp()).num_milliseconds() as f64;
    elapsed > update_interval.as_millis() as f64 * CONNECTION_LOST_FACTOR
}

#[derive(Debug, Clone)]
pub struct LogReport {
    lines: Arc<RwLock<VecDeque<LogMessage>>>,
    capacity: usize,
}

impl Default for LogReport {
    fn default() -> Self {
        Self::new(LOG_REPORT_CAPACITY)
    }
}

impl LogReport {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn attach(&self, manager: &NotificationManager<LogMessage>) -> Subscription {
        let report = self.clone();
        manager.subscribe(move |message: &LogMessage| {
            report.push(message.clone());
            Ok(())
        })
    }

    /// Append a line, evicting the oldest once full
    pub fn push(&self, message: LogMessage) {
        let mut lines = self.lines.write().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(message);
    }

    /// Up to `limit` most recent lines, oldest first
    pub fn recent(&self, limit: usize) -> Vec<LogMessage> {
        let lines = self.lines.read().unwrap_or_else(PoisonError::into_inner);
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }
}
