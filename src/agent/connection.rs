//! ConnectionManager - keeps one live connection to the hub and drives the
//! periodic send loop
//!
//! ## Lifecycle
//!
//! 1. [`ConnectionManager::start`] walks the candidate endpoints in order
//!    until one accepts, waiting the reconnect delay after every failure and
//!    starting over from the first endpoint once the list is exhausted.
//! 2. A receive task applies configuration pushes from the hub. When the
//!    connection drops it reconnects to the same endpoint: the first retry
//!    is immediate, later ones wait the reconnect delay.
//! 3. [`ConnectionManager::run`] sends one snapshot per update interval
//!    while connected. Send errors are logged and the reading is dropped;
//!    a failed send also drops the connection, and the receive task
//!    reconnects as if the hub had closed it.
//!
//! ## Configuration
//!
//! The agent configuration lives in a `watch` channel. A push from the hub
//! replaces the whole value with a copy carrying the new update interval,
//! so the send loop always reads a consistent configuration. A new interval
//! applies from the next sleep on.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::retry::RetryPolicy;
use super::source::SnapshotSource;
use super::transport::{MessageSink, MessageStream, Transport};
use crate::config::{AgentConfig, ConfigError};
use crate::protocol::{AgentMessage, HubMessage};

/// Where the manager currently stands with the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected { endpoint: String },
    Reconnecting { endpoint: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

/// State shared between the send loop and the receive task
struct Shared<T> {
    transport: T,
    configuration: watch::Sender<AgentConfig>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
}

/// Outbound half of the live connection
struct Link {
    sink: MessageSink,
    /// Cancelled when a send fails; tells the receive task to reconnect
    broken: CancellationToken,
}

impl<T: Transport> Shared<T> {
    async fn install(&self, endpoint: &str, sink: MessageSink) -> CancellationToken {
        let broken = CancellationToken::new();
        *self.link.lock().await = Some(Link {
            sink,
            broken: broken.clone(),
        });
        self.state.send_replace(ConnectionState::Connected {
            endpoint: endpoint.to_string(),
        });
        broken
    }

    async fn connection_lost(&self, endpoint: &str) {
        self.link.lock().await.take();
        self.state.send_replace(ConnectionState::Reconnecting {
            endpoint: endpoint.to_string(),
        });
    }

    fn apply(&self, message: HubMessage) {
        let configuration = message.configuration();
        info!("received {configuration}");

        let update_interval_ms = u64::from(configuration.update_interval_seconds) * 1000;
        // only the receive task writes, so read-then-replace cannot race
        let replaced = self
            .configuration
            .borrow()
            .replace_update_interval(update_interval_ms);
        self.configuration.send_replace(replaced);
    }

    fn reconnect_delay_ms(&self) -> u64 {
        self.configuration.borrow().reconnect_delay_ms
    }
}

pub struct ConnectionManager<T, S> {
    shared: Arc<Shared<T>>,
    source: S,
    endpoints: Vec<String>,
    tasks: TaskTracker,
}

impl<T: Transport, S: SnapshotSource> ConnectionManager<T, S> {
    /// Fails when the configured port list cannot be turned into endpoints
    pub fn new(transport: T, source: S, config: AgentConfig) -> Result<Self, ConfigError> {
        let endpoints = config.connection_strings()?;
        debug!("candidate endpoints: {endpoints:?}");

        let (configuration, _) = watch::channel(config);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                configuration,
                state,
                link: Mutex::new(None),
            }),
            source,
            endpoints,
            tasks: TaskTracker::new(),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Watch the agent configuration as updated by the hub
    pub fn configuration(&self) -> watch::Receiver<AgentConfig> {
        self.shared.configuration.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// Connect to the first reachable endpoint.
    ///
    /// Returns the endpoint, or `None` if `cancel` fired first.
    #[instrument(skip_all)]
    pub async fn start(&self, cancel: &CancellationToken) -> Option<String> {
        loop {
            for endpoint in &self.endpoints {
                let attempt = tokio::select! {
                    _ = cancel.cancelled() => return None,
                    attempt = self.shared.transport.connect(endpoint) => attempt,
                };

                match attempt {
                    Ok((sink, stream)) => {
                        info!("connected to the hub at {endpoint}");
                        let broken = self.shared.install(endpoint, sink).await;
                        self.tasks.spawn(receive(
                            self.shared.clone(),
                            endpoint.clone(),
                            stream,
                            broken,
                            cancel.clone(),
                        ));
                        return Some(endpoint.clone());
                    }
                    Err(e) => {
                        let delay = self.shared.configuration.borrow().reconnect_delay();
                        error!(
                            "failed to connect to the hub at {endpoint}, trying again in {} ms: {e:#}",
                            delay.as_millis()
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return None,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    /// Connect, then send one snapshot per update interval until cancelled
    #[instrument(skip_all)]
    pub async fn run(&self, cancel: CancellationToken) {
        if self.start(&cancel).await.is_some() {
            loop {
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = self.send_snapshot() => sent,
                };

                if let Err(e) = sent {
                    error!("failed to send metrics: {e:#}");
                }

                // a pushed interval applies from here on
                let interval = self.shared.configuration.borrow().update_interval();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        self.close().await;
    }

    /// Send one snapshot if connected; returns whether anything was sent
    pub async fn send_snapshot(&self) -> anyhow::Result<bool> {
        if !self.is_connected() {
            debug!("not connected, skipping this interval");
            return Ok(false);
        }

        let snapshot = self.source.snapshot()?;
        let mut guard = self.shared.link.lock().await;
        let Some(link) = guard.as_mut() else {
            return Ok(false);
        };

        info!("sending metrics: {snapshot}");
        let sent = link.sink.send(AgentMessage::SendMetrics(snapshot)).await;
        if let Err(e) = sent {
            // a failed sink is never polled again
            if let Some(link) = guard.take() {
                link.broken.cancel();
            }
            self.shared.state.send_if_modified(|state| match state {
                ConnectionState::Connected { endpoint } => {
                    let endpoint = std::mem::take(endpoint);
                    *state = ConnectionState::Reconnecting { endpoint };
                    true
                }
                _ => false,
            });
            return Err(e.context("connection dropped"));
        }
        Ok(true)
    }

    /// Close the connection and wait for the receive task.
    ///
    /// The receive task only exits once the token passed to `start` fires.
    async fn close(&self) {
        self.tasks.close();

        let link = self.shared.link.lock().await.take();
        if let Some(mut link) = link {
            if let Err(e) = link.sink.close().await {
                debug!("error while closing the connection: {e:#}");
            }
        }
        self.shared.state.send_replace(ConnectionState::Disconnected);

        self.tasks.wait().await;
        info!("connection closed");
    }
}

/// Apply hub pushes until the connection drops, then reconnect to the same
/// endpoint; repeats until cancelled
#[instrument(skip_all, fields(endpoint = %endpoint))]
async fn receive<T: Transport>(
    shared: Arc<Shared<T>>,
    endpoint: String,
    mut stream: MessageStream,
    mut broken: CancellationToken,
    cancel: CancellationToken,
) {
    loop {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = broken.cancelled() => {
                    warn!("sending to the hub failed, dropping the connection");
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(message)) => shared.apply(message),
                Some(Err(e)) => {
                    warn!("connection failed: {e:#}");
                    break;
                }
                None => break,
            }
        }

        shared.connection_lost(&endpoint).await;
        error!(
            "connection to the hub has been lost, reconnecting every {} ms",
            shared.reconnect_delay_ms()
        );

        match reconnect(&shared, &endpoint, &cancel).await {
            Some((reconnected, link_broken)) => {
                stream = reconnected;
                broken = link_broken;
            }
            None => return,
        }
    }
}

async fn reconnect<T: Transport>(
    shared: &Shared<T>,
    endpoint: &str,
    cancel: &CancellationToken,
) -> Option<(MessageStream, CancellationToken)> {
    let policy = RetryPolicy::new(shared.configuration.borrow().reconnect_delay());
    let mut retries = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(policy.next_retry_delay(retries)) => {}
        }

        let attempt = tokio::select! {
            _ = cancel.cancelled() => return None,
            attempt = shared.transport.connect(endpoint) => attempt,
        };

        match attempt {
            Ok((sink, stream)) => {
                info!("reconnected after {} failed attempts", retries);
                let broken = shared.install(endpoint, sink).await;
                return Some((stream, broken));
            }
            Err(e) => {
                debug!("reconnect attempt {} failed: {e:#}", retries + 1);
                retries = retries.saturating_add(1);
            }
        }
    }
}
