//! Messages exchanged over the agent/hub duplex connection
//!
//! Every frame is a JSON text message of the form
//! `{"method": "<Name>", "payload": {...}}`.
//!
//! - agent → hub: `SendMetrics`
//! - hub → agent: `SendConfiguration` (once, right after connecting) and
//!   `ReceiveConfiguration` (whenever the configuration changes)

use serde::{Deserialize, Serialize};

use crate::{ConfigurationMessage, MetricsSnapshot};

/// Messages sent by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "payload")]
pub enum AgentMessage {
    SendMetrics(MetricsSnapshot),
}

/// Messages pushed by the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "payload")]
pub enum HubMessage {
    /// Current configuration delivered to a newly connected agent
    SendConfiguration(ConfigurationMessage),

    /// Configuration change broadcast to all connected agents
    ReceiveConfiguration(ConfigurationMessage),
}

impl HubMessage {
    pub fn configuration(&self) -> ConfigurationMessage {
        match self {
            HubMessage::SendConfiguration(config) | HubMessage::ReceiveConfiguration(config) => {
                *config
            }
        }
    }
}
