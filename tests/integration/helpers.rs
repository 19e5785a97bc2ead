//! Helper functions for integration tests

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::SinkExt;
use futures::channel::mpsc as channel;
use server_monitor::agent::{MessageSink, MessageStream, Transport};
use server_monitor::config::AgentConfig;
use server_monitor::protocol::{AgentMessage, HubMessage};
use server_monitor::{DriveMetrics, MetricsSnapshot, ServerMetrics};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub fn create_agent_config(ports: &str, update_interval_ms: u64, reconnect_delay_ms: u64) -> AgentConfig {
    AgentConfig {
        update_interval_ms,
        reconnect_delay_ms,
        hub_name: "monitorhub".to_string(),
        host: "hub.local".to_string(),
        ports: ports.to_string(),
        scheme: "ws".to_string(),
    }
}

pub fn endpoint(port: u16) -> String {
    format!("ws://hub.local:{port}/monitorhub")
}

pub fn create_snapshot(cpu: f32) -> MetricsSnapshot {
    MetricsSnapshot::new(
        "test-host",
        cpu,
        4096,
        16384,
        vec![DriveMetrics::new("/", 100, 500).unwrap()],
    )
    .unwrap()
}

pub fn create_server_metrics(ip: &str, cpu: f32, timestamp: DateTime<Utc>) -> ServerMetrics {
    let ip: IpAddr = ip.parse().unwrap();
    create_snapshot(cpu).into_server_metrics(format!("conn-{ip}"), ip, timestamp)
}

/// Hub side of one connection opened through [`MockTransport`]
pub struct HubSide {
    pub endpoint: String,

    /// Messages the agent sent
    pub received: channel::UnboundedReceiver<AgentMessage>,

    /// Push messages to the agent; dropping it ends the agent's stream
    pub push: channel::UnboundedSender<anyhow::Result<HubMessage>>,
}

impl HubSide {
    pub async fn push(&mut self, message: HubMessage) {
        self.push.send(Ok(message)).await.unwrap();
    }
}

/// In-process transport with scripted connect failures
pub struct MockTransport {
    failures: Mutex<HashMap<String, usize>>,
    attempts: Mutex<Vec<(String, Instant)>>,
    connections: mpsc::UnboundedSender<HubSide>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HubSide>) {
        let (connections, accepted) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            failures: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            connections,
        });
        (transport, accepted)
    }

    /// Make the next `count` connects to `endpoint` fail
    pub fn fail_next(&self, endpoint: &str, count: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), count);
    }

    /// Every connect to `endpoint` fails
    pub fn fail_always(&self, endpoint: &str) {
        self.fail_next(endpoint, usize::MAX);
    }

    pub fn attempts(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &str) -> anyhow::Result<(MessageSink, MessageStream)> {
        self.attempts
            .lock()
            .unwrap()
            .push((endpoint.to_string(), Instant::now()));

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(endpoint) {
                if *remaining > 0 {
                    *remaining = remaining.saturating_sub(1);
                    anyhow::bail!("connection refused by {endpoint}");
                }
            }
        }

        let (agent_tx, hub_rx) = channel::unbounded();
        let (hub_tx, agent_rx) = channel::unbounded();

        self.connections
            .send(HubSide {
                endpoint: endpoint.to_string(),
                received: hub_rx,
                push: hub_tx,
            })
            .map_err(|_| anyhow::anyhow!("test hub is gone"))?;

        let sink: MessageSink = Box::pin(agent_tx.sink_err_into::<anyhow::Error>());
        let stream: MessageStream = Box::pin(agent_rx);
        Ok((sink, stream))
    }
}
