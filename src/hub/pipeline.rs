//! Wires the hub's topics together
//!
//! ```text
//!  ws handlers ─▶ metrics queue ─▶ pump ─▶ broadcaster ─┬▶ MetricsProcessor ─▶ repository
//!                                                        └▶ MetricsReport
//!  tracing     ─▶ log queue     ─▶ pump ─▶ broadcaster ──▶ LogReport
//! ```
//!
//! Every task runs on one [`TaskTracker`] and stops on one
//! [`CancellationToken`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::configuration::ConfigurationStore;
use super::state::HubState;
use crate::actors::{LogReport, MetricsProcessorHandle, MetricsReport};
use crate::config::HubConfig;
use crate::logging::LogMessage;
use crate::notifications::{
    NotificationManager, NotificationService, QueueReader, Subscription, background_queue,
};
use crate::storage::MetricsRepository;
use crate::ConfigurationMessage;

pub struct Pipeline {
    state: HubState,
    tracker: TaskTracker,
    cancel: CancellationToken,
    _subscriptions: Vec<Subscription>,
}

impl Pipeline {
    /// Spawn every pump and subscriber.
    ///
    /// `log_queue` is the reader paired with the writer handed to
    /// [`crate::logging::init_with_log_queue`]; without it the log report
    /// stays empty.
    pub fn start(
        config: &HubConfig,
        repository: Arc<dyn MetricsRepository>,
        log_queue: Option<QueueReader<LogMessage>>,
    ) -> Self {
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        let (metrics_queue, metrics_reader) = background_queue();
        let metrics = NotificationManager::new();
        let logs = NotificationManager::new();

        let processor =
            MetricsProcessorHandle::spawn(&metrics, repository.clone(), &tracker, cancel.clone());

        let report = MetricsReport::new();
        let log_report = LogReport::default();
        let subscriptions = vec![report.attach(&metrics), log_report.attach(&logs)];

        NotificationService::new(metrics_reader, metrics.clone()).spawn(&tracker, cancel.clone());
        match log_queue {
            Some(reader) => {
                NotificationService::new(reader, logs.clone()).spawn(&tracker, cancel.clone());
            }
            None => debug!("no log queue, the log report stays empty"),
        }

        let configuration =
            ConfigurationStore::new(ConfigurationMessage::new(config.update_interval_seconds));

        let state = HubState::new(
            metrics_queue,
            configuration,
            repository,
            report,
            log_report,
            processor,
            cancel.clone(),
        );

        info!("hub pipeline started");

        Self {
            state,
            tracker,
            cancel,
            _subscriptions: subscriptions,
        }
    }

    /// State for the HTTP server
    pub fn state(&self) -> HubState {
        self.state.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every task and wait for them to finish
    pub async fn shutdown(self) {
        info!("shutting down hub pipeline");

        self.state.processor.shutdown().await;
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        info!("hub pipeline stopped");
    }
}
