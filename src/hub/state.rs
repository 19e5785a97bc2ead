//! Shared state passed to the HTTP and WebSocket handlers

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use super::configuration::ConfigurationStore;
use crate::ServerMetrics;
use crate::actors::{LogReport, MetricsProcessorHandle, MetricsReport};
use crate::notifications::QueueWriter;
use crate::storage::MetricsRepository;

#[derive(Clone)]
pub struct HubState {
    /// Inbound handlers enqueue received readings here
    pub metrics_queue: QueueWriter<ServerMetrics>,

    pub configuration: ConfigurationStore,

    pub repository: Arc<dyn MetricsRepository>,

    pub report: MetricsReport,

    pub logs: LogReport,

    pub processor: MetricsProcessorHandle,

    /// Fires when the hub shuts down; open agent connections close on it
    pub shutdown: CancellationToken,

    connections: Arc<AtomicU64>,
}

impl HubState {
    pub fn new(
        metrics_queue: QueueWriter<ServerMetrics>,
        configuration: ConfigurationStore,
        repository: Arc<dyn MetricsRepository>,
        report: MetricsReport,
        logs: LogReport,
        processor: MetricsProcessorHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            metrics_queue,
            configuration,
            repository,
            report,
            logs,
            processor,
            shutdown,
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Unique id for a new agent connection
    pub fn next_connection_id(&self) -> String {
        let n = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        format!("conn-{n}")
    }
}
