//! NotificationService - drains an ingestion queue into a broadcaster
//!
//! One long-running task per topic. It pulls items off the
//! [`QueueReader`] in FIFO order and publishes each one to the
//! [`NotificationManager`] before taking the next, so subscribers always see
//! a topic in enqueue order. A failed delivery is logged and the loop keeps
//! going.

use std::any::type_name;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::manager::NotificationManager;
use super::queue::{DequeueError, QueueReader};

pub struct NotificationService<T> {
    reader: QueueReader<T>,
    manager: NotificationManager<T>,
    published: u64,
}

impl<T: Send + Sync + 'static> NotificationService<T> {
    pub fn new(reader: QueueReader<T>, manager: NotificationManager<T>) -> Self {
        Self {
            reader,
            manager,
            published: 0,
        }
    }

    /// Run on the given tracker until `cancel` fires or every writer is gone
    pub fn spawn(self, tracker: &TaskTracker, cancel: CancellationToken) -> JoinHandle<u64> {
        tracker.spawn(self.run(cancel))
    }

    /// Main loop; returns the number of items published
    #[instrument(skip_all, fields(topic = topic::<T>()))]
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        info!("notification service is running");

        loop {
            let item = match self.reader.dequeue(&cancel).await {
                Ok(item) => item,
                Err(DequeueError::Cancelled) => break,
                Err(DequeueError::Closed) => {
                    warn!("all queue writers are gone, stopping");
                    break;
                }
            };

            // the first publish may wait for a subscriber; stay cancellable
            let delivery = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                delivery = self.manager.publish(&item) => delivery,
            };

            self.published += 1;
            if !delivery.is_success() {
                error!(
                    "failed to deliver item to {} of {} subscribers",
                    delivery.failed,
                    delivery.failed + delivery.delivered
                );
            }
        }

        debug!("published {} items", self.published);
        info!("notification service is stopping");
        self.published
    }
}

fn topic<T>() -> &'static str {
    let name = type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}
