//! Current agent configuration, versioned, with change notifications
//!
//! Every replacement bumps the version and is published on the
//! configuration topic. Each connected agent's handler subscribes to that
//! topic and forwards changes as `ReceiveConfiguration`.
//!
//! Replacements are serialized: subscribers see them in version order, and
//! [`ConfigurationStore::subscribe_current`] never falls between the read
//! of the current value and the next publish.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::ConfigurationMessage;
use crate::config::ConfigError;
use crate::notifications::{NotificationManager, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionedConfiguration {
    pub version: u64,

    #[serde(flatten)]
    pub configuration: ConfigurationMessage,
}

#[derive(Clone)]
pub struct ConfigurationStore {
    current: Arc<watch::Sender<VersionedConfiguration>>,
    updates: NotificationManager<ConfigurationMessage>,
    updating: Arc<Mutex<()>>,
    // keeps the topic's gate open before any agent connects
    _audit: Arc<Subscription>,
}

impl ConfigurationStore {
    pub fn new(initial: ConfigurationMessage) -> Self {
        let updates = NotificationManager::new();
        let audit = updates.subscribe(|configuration: &ConfigurationMessage| {
            info!("configuration changed: {configuration}");
            Ok(())
        });

        let (current, _) = watch::channel(VersionedConfiguration {
            version: 0,
            configuration: initial,
        });

        Self {
            current: Arc::new(current),
            updates,
            updating: Arc::new(Mutex::new(())),
            _audit: Arc::new(audit),
        }
    }

    pub fn current(&self) -> VersionedConfiguration {
        *self.current.borrow()
    }

    /// Be told about every future replacement
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConfigurationMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.updates.subscribe(listener)
    }

    /// Subscribe and read the current configuration in one step.
    ///
    /// Every replacement not reflected in the returned value reaches
    /// `listener`.
    pub async fn subscribe_current<F>(&self, listener: F) -> (VersionedConfiguration, Subscription)
    where
        F: Fn(&ConfigurationMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let _updating = self.updating.lock().await;
        let subscription = self.updates.subscribe(listener);
        (self.current(), subscription)
    }

    /// Replace the configuration and notify subscribers.
    ///
    /// An update interval of zero is rejected.
    pub async fn replace(
        &self,
        configuration: ConfigurationMessage,
    ) -> Result<VersionedConfiguration, ConfigError> {
        if configuration.update_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "update interval must be at least one second".to_string(),
            ));
        }

        let _updating = self.updating.lock().await;

        let mut replaced = self.current();
        self.current.send_modify(|current| {
            current.version += 1;
            current.configuration = configuration;
            replaced = *current;
        });

        let delivery = self.updates.publish(&configuration).await;
        debug!(
            "configuration v{} delivered to {} subscribers",
            replaced.version, delivery.delivered
        );

        Ok(replaced)
    }
}
