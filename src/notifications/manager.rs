//! In-process publish/subscribe register
//!
//! A `NotificationManager<T>` fans every published item out to the listeners
//! registered at that moment. Listeners run synchronously on the publisher's
//! task, against a copy of the listener set taken under the lock, so a
//! listener may subscribe or unsubscribe others without deadlocking.
//!
//! The very first `publish` waits until some listener has subscribed at least
//! once. After that the gate stays open for good: publishing to an empty
//! register drops the item.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{error, trace, warn};

type Listener<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Outcome of a single `publish`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Listeners that handled the item
    pub delivered: usize,

    /// Listeners that returned an error or panicked
    pub failed: usize,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

struct Registry<T> {
    listeners: Mutex<BTreeMap<u64, Listener<T>>>,
    next_id: AtomicU64,
    first_subscriber: watch::Sender<bool>,
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
}

impl<T> Unsubscribe for Registry<T> {
    fn unsubscribe(&self, id: u64) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners.remove(&id).is_some() {
            trace!(subscription = id, "listener removed");
        }
    }
}

/// Multi-subscriber broadcaster for one stream topic
pub struct NotificationManager<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for NotificationManager<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T> fmt::Debug for NotificationManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationManager")
            .field("subscribers", &self.subscriber_count())
            .field("gate_open", &self.is_gate_open())
            .finish()
    }
}

impl<T> NotificationManager<T> {
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether any listener has ever subscribed
    pub fn is_gate_open(&self) -> bool {
        *self.registry.first_subscriber.borrow()
    }
}

impl<T: 'static> Default for NotificationManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> NotificationManager<T> {
    pub fn new() -> Self {
        let (first_subscriber, _) = watch::channel(false);
        Self {
            registry: Arc::new(Registry {
                listeners: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
                first_subscriber,
            }),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        self.registry.first_subscriber.send_replace(true);
        trace!(subscription = id, "listener added");

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        Subscription { id, registry }
    }

    /// Hand `item` to every currently registered listener.
    ///
    /// Waits on the first call until a listener has ever subscribed. A
    /// failing or panicking listener is logged and does not keep the others
    /// from being called.
    pub async fn publish(&self, item: &T) -> Delivery {
        self.wait_for_first_subscriber().await;

        let listeners: Vec<(u64, Listener<T>)> = self
            .registry
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();

        let mut delivery = Delivery::default();
        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(item))) {
                Ok(Ok(())) => delivery.delivered += 1,
                Ok(Err(e)) => {
                    warn!(subscription = id, "listener failed: {e:#}");
                    delivery.failed += 1;
                }
                Err(_) => {
                    error!(subscription = id, "listener panicked");
                    delivery.failed += 1;
                }
            }
        }

        delivery
    }

    async fn wait_for_first_subscriber(&self) {
        let mut opened = self.registry.first_subscriber.subscribe();
        // the sender lives as long as the registry, so this cannot fail
        let _ = opened.wait_for(|open| *open).await;
    }
}

/// Registration handle returned by [`NotificationManager::subscribe`].
///
/// Dropping it removes exactly the listener it was created for.
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Unsubscribe>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener now; same as dropping the handle
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
