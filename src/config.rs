use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use tracing::trace;

/// Errors for malformed configuration values
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A token in the port list is not a valid port number
    InvalidPort(String),

    /// Any other invalid value
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort(token) => {
                write!(f, "failed to parse port {token:?} from the configuration")
            }
            ConfigError::InvalidValue(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Agent-side settings for reaching the hub
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_hub_name")]
    pub hub_name: String,

    pub host: String,

    /// Comma separated list of candidate ports, tried in order
    pub ports: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,
}

impl AgentConfig {
    /// One endpoint per configured port, in the order given
    pub fn connection_strings(&self) -> Result<Vec<String>, ConfigError> {
        self.ports
            .split(',')
            .map(|token| {
                let port = token
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPort(token.to_string()))?;
                Ok(format!(
                    "{}://{}:{}/{}",
                    self.scheme, self.host, port, self.hub_name
                ))
            })
            .collect()
    }

    /// Copy of this configuration with only the update interval replaced
    pub fn replace_update_interval(&self, update_interval_ms: u64) -> Self {
        Self {
            update_interval_ms,
            ..self.clone()
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn default_update_interval_ms() -> u64 {
    crate::ConfigurationMessage::DEFAULT_UPDATE_INTERVAL_SECONDS as u64 * 1000
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_hub_name() -> String {
    String::from("monitorhub")
}

fn default_scheme() -> String {
    String::from("ws")
}

/// Hub-side settings
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "crate::util::get_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Initial update interval pushed to agents until changed at runtime
    #[serde(default = "default_update_interval_seconds")]
    pub update_interval_seconds: u32,

    /// PostgreSQL settings (optional - metrics are kept in memory without it)
    pub database: Option<DatabaseConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: crate::util::get_bind_addr(),
            update_interval_seconds: default_update_interval_seconds(),
            database: None,
        }
    }
}

fn default_update_interval_seconds() -> u32 {
    crate::ConfigurationMessage::DEFAULT_UPDATE_INTERVAL_SECONDS
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_host")]
    pub host: String,

    #[serde(default = "default_database_port")]
    pub port: u16,

    pub username: String,

    pub password: String,

    pub database_name: String,

    #[serde(default = "default_metrics_table_name")]
    pub metrics_table_name: String,
}

impl DatabaseConfig {
    /// Options for the server's maintenance database, used to create or drop
    /// the metrics database
    pub fn maintenance_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database("postgres")
    }

    pub fn database_options(&self) -> PgConnectOptions {
        self.maintenance_options().database(&self.database_name)
    }
}

fn default_database_host() -> String {
    String::from("localhost")
}

fn default_database_port() -> u16 {
    5432
}

fn default_metrics_table_name() -> String {
    String::from("metrics")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfigFile {
    pub server_configuration: AgentConfig,
}

pub fn read_agent_config(path: &str) -> anyhow::Result<AgentConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str::<AgentConfigFile>(&file_content)
        .map(|file| file.server_configuration)
        .map_err(|e| anyhow::anyhow!("Invalid agent configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

pub fn read_hub_config(path: &str) -> anyhow::Result<HubConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid hub configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
