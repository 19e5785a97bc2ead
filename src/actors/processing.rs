//! MetricsProcessor - writes every published reading to the repository
//!
//! The broadcaster calls listeners synchronously, so the listener only hands
//! the reading over to this actor's own channel; the actual database write
//! happens on the actor's task. Storage errors are logged by
//! [`crate::storage::Repository::create`] and the reading is dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, trace};

use super::messages::{ProcessorCommand, ProcessorStats};
use crate::ServerMetrics;
use crate::notifications::{NotificationManager, Subscription};
use crate::storage::MetricsRepository;

pub struct MetricsProcessor {
    repository: Arc<dyn MetricsRepository>,
    metrics_rx: mpsc::UnboundedReceiver<ServerMetrics>,
    command_rx: mpsc::Receiver<ProcessorCommand>,
    subscription: Subscription,
    processed: u64,
}

impl MetricsProcessor {
    pub fn new(
        manager: &NotificationManager<ServerMetrics>,
        repository: Arc<dyn MetricsRepository>,
        command_rx: mpsc::Receiver<ProcessorCommand>,
    ) -> Self {
        let (metrics_tx, metrics_rx) = mpsc::unbounded_channel();
        let subscription = manager.subscribe(move |metrics: &ServerMetrics| {
            metrics_tx
                .send(metrics.clone())
                .map_err(|_| anyhow::anyhow!("metrics processor has stopped"))
        });

        Self {
            repository,
            metrics_rx,
            command_rx,
            subscription,
            processed: 0,
        }
    }

    #[instrument(skip_all, fields(subscription = self.subscription.id()))]
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("metrics processor is running");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd) {
                        break;
                    }
                }

                metrics = self.metrics_rx.recv() => match metrics {
                    Some(metrics) => {
                        trace!("persisting metrics from {}", metrics.ip_address());
                        self.repository.create(&metrics).await;
                        self.processed += 1;
                    }
                    None => break,
                },
            }
        }

        debug!("processed {} readings", self.processed);
        info!("metrics processor is stopping");
        // dropping self releases the subscription
    }

    /// Returns `false` when the actor should stop
    fn handle_command(&mut self, cmd: ProcessorCommand) -> bool {
        match cmd {
            ProcessorCommand::GetStats { respond_to } => {
                let _ = respond_to.send(ProcessorStats {
                    processed: self.processed,
                    pending: self.metrics_rx.len(),
                });
                true
            }
            ProcessorCommand::Shutdown => false,
        }
    }
}

/// Handle for controlling the MetricsProcessor
#[derive(Clone)]
pub struct MetricsProcessorHandle {
    sender: mpsc::Sender<ProcessorCommand>,
}

impl MetricsProcessorHandle {
    /// Subscribe to `manager` and spawn the processor on `tracker`
    pub fn spawn(
        manager: &NotificationManager<ServerMetrics>,
        repository: Arc<dyn MetricsRepository>,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let processor = MetricsProcessor::new(manager, repository, cmd_rx);

        tracker.spawn(processor.run(cancel));

        Self { sender: cmd_tx }
    }

    /// Get processing statistics
    pub async fn get_stats(&self) -> Option<ProcessorStats> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ProcessorCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Stop the processor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(ProcessorCommand::Shutdown).await;
    }
}
