//! Node configuration
//!
//! Loaded once from YAML (`RELAY_NODE_CONFIG`, default `node.yaml`). The
//! node's switch table is derived from the shared chassis layout unless an
//! explicit `switch_mapping` is given.

use relay_common::{AllocationError, Assignment, ChassisLayout, Slot};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "RELAY_NODE_CONFIG";

/// Largest board a bitmap driver can address.
pub const MAX_BOARD_CAPACITY: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum NodeConfigError {
    #[error("config file not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    pub node_id: String,
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub chassis: Vec<u32>,
    /// Boards physically present; defaults to what the mapping needs.
    #[serde(default)]
    pub num_boards: Option<u32>,
    #[serde(default)]
    pub layout: ChassisLayout,
    #[serde(default)]
    pub switch_mapping: BTreeMap<String, SlotSetting>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SlotSetting {
    pub hat: u32,
    pub relay: u32,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5001))
}

impl NodeSettings {
    pub fn from_yaml(text: &str) -> Result<Self, NodeConfigError> {
        let settings: NodeSettings = serde_yaml::from_str(text)?;
        if settings.node_id.trim().is_empty() {
            return Err(NodeConfigError::Invalid("node_id must not be empty".into()));
        }
        let capacity = settings.layout.board_capacity;
        if !(1..=MAX_BOARD_CAPACITY).contains(&capacity) {
            return Err(NodeConfigError::Invalid(format!(
                "layout.board_capacity must be 1-{MAX_BOARD_CAPACITY}, got {capacity}"
            )));
        }
        if let Some(&bad) = settings
            .chassis
            .iter()
            .find(|&&c| !settings.layout.contains_chassis(c))
        {
            return Err(NodeConfigError::Invalid(format!(
                "chassis {bad} is outside 1-{}",
                settings.layout.chassis_count
            )));
        }
        Ok(settings)
    }

    /// Switch table served by this node.
    pub fn assignment(&self) -> Result<Assignment, NodeConfigError> {
        if self.switch_mapping.is_empty() {
            return Ok(self.layout.node_assignment(&self.chassis)?);
        }
        let slots = self
            .switch_mapping
            .iter()
            .map(|(name, s)| (name.as_str(), Slot::new(s.hat, s.relay)));
        Ok(Assignment::from_explicit(self.layout.board_capacity, slots)?)
    }

    /// Board count, checked against the boards the assignment uses.
    pub fn board_count(&self, assignment: &Assignment) -> Result<u32, NodeConfigError> {
        let needed = assignment.board_count();
        match self.num_boards {
            Some(0) => Err(NodeConfigError::Invalid("num_boards must be at least 1".into())),
            Some(n) if n < needed => Err(NodeConfigError::Invalid(format!(
                "switch mapping uses {needed} boards but num_boards is {n}"
            ))),
            Some(n) => Ok(n),
            None => Ok(needed.max(1)),
        }
    }
}

pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("node.yaml"))
}

pub async fn load_settings(path: &Path) -> Result<NodeSettings, NodeConfigError> {
    if !path.exists() {
        return Err(NodeConfigError::NotFound(path.to_path_buf()));
    }
    let txt = tokio::fs::read_to_string(path).await?;
    NodeSettings::from_yaml(&txt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn derives_local_boards_from_chassis() {
        let settings = NodeSettings::from_yaml("node_id: pi_2\nchassis: [3, 4]\n").unwrap();
        let assignment = settings.assignment().unwrap();

        assert_eq!(assignment.len(), 24);
        assert_eq!(assignment.slot("CH3"), Some(Slot::new(0, 1)));
        assert_eq!(assignment.slot("CH4K"), Some(Slot::new(2, 8)));
        assert_eq!(settings.board_count(&assignment).unwrap(), 3);
        assert_eq!(settings.listen.port(), 5001);
    }

    #[test]
    fn explicit_mapping_replaces_the_layout() {
        let settings = NodeSettings::from_yaml(
            "node_id: bench\nnum_boards: 2\nswitch_mapping:\n  psu: { hat: 1, relay: 3 }\n",
        )
        .unwrap();
        let assignment = settings.assignment().unwrap();
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.slot("PSU"), Some(Slot::new(1, 3)));
        assert_eq!(settings.board_count(&assignment).unwrap(), 2);
    }

    #[test]
    fn rejects_inconsistent_settings() {
        assert!(NodeSettings::from_yaml("node_id: ''\n").is_err());
        assert!(NodeSettings::from_yaml("node_id: a\nchassis: [5]\n").is_err());
        assert!(NodeSettings::from_yaml("node_id: a\nlayout: { board_capacity: 16 }\n").is_err());

        let settings = NodeSettings::from_yaml("node_id: a\nchassis: [1, 2]\nnum_boards: 1\n").unwrap();
        let assignment = settings.assignment().unwrap();
        assert!(matches!(
            settings.board_count(&assignment),
            Err(NodeConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "node_id: pi_1\nchassis: [1]\nlisten: 127.0.0.1:6001").unwrap();

        let settings = load_settings(file.path()).await.unwrap();
        assert_eq!(settings.node_id, "pi_1");
        assert_eq!(settings.listen.port(), 6001);

        let err = load_settings(Path::new("/no/such/node.yaml")).await.unwrap_err();
        assert!(matches!(err, NodeConfigError::NotFound(_)));
    }
}
