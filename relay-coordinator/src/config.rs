use relay_common::{AllocationError, ChassisLayout};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub const CONFIG_ENV: &str = "RELAY_COORDINATOR_CONFIG";
pub const DEFAULT_NODE_PORT: u16 = 5001;

/// Static topology problems. Fatal at start-up.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("node {node}: {source}")]
    Allocation {
        node: String,
        #[source]
        source: AllocationError,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Seconds between two liveness sweeps.
    #[serde(default = "default_status_check_interval")]
    pub status_check_interval: f64,
    /// Seconds before a forwarded request is abandoned.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,
    /// JSON-lines history file; `null` keeps history in memory only.
    #[serde(default = "default_history_path")]
    pub history_path: Option<PathBuf>,
    #[serde(default)]
    pub layout: ChassisLayout,
    #[serde(alias = "nodes")]
    pub raspberry_pis: BTreeMap<String, NodeConfig>,
    #[serde(skip)]
    check_interval: Duration,
    #[serde(skip)]
    timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub ip_address: String,
    #[serde(default = "default_node_port")]
    pub port: u16,
    #[serde(default)]
    pub chassis: Vec<u32>,
    #[serde(default)]
    pub num_relay_hats: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub switch_mapping: BTreeMap<String, SlotConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SlotConfig {
    pub hat: u32,
    pub relay: u32,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_status_check_interval() -> f64 {
    30.0
}

fn default_request_timeout() -> f64 {
    5.0
}

fn default_history_path() -> Option<PathBuf> {
    Some(PathBuf::from("status_history.jsonl"))
}

fn default_node_port() -> u16 {
    DEFAULT_NODE_PORT
}

impl CoordinatorConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let mut cfg: CoordinatorConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        self.check_interval = seconds("status_check_interval", self.status_check_interval)?;
        self.timeout = seconds("request_timeout", self.request_timeout)?;
        if self.layout.board_capacity == 0 {
            return Err(ConfigError::Invalid("layout.board_capacity must be > 0".into()));
        }
        if self.raspberry_pis.is_empty() {
            return Err(ConfigError::Invalid("no nodes configured".into()));
        }
        Ok(())
    }

    pub fn status_check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }
}

/// A strictly positive number of seconds that fits a `Duration`.
fn seconds(key: &str, value: f64) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::Invalid(format!("{key} must be a positive number of seconds, got {value}"));
    if value <= 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(value).map_err(|_| invalid())
}

pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("coordinator.yaml"))
}

pub async fn load_config(path: &Path) -> Result<CoordinatorConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let txt = fs::read_to_string(path).await?;
    CoordinatorConfig::from_yaml(&txt)
}
