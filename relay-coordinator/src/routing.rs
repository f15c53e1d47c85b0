//! Static switch/chassis/node lookup tables built once from configuration.

use crate::config::{ConfigError, CoordinatorConfig, NodeConfig};
use relay_common::{canonical_name, Assignment, ChassisLayout, Slot};
use std::collections::BTreeMap;

/// Lookup miss. Recovered per request as a 400/404 response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("Invalid switch name: {0}")]
    UnknownSwitch(String),
    #[error("No Pi configured to control chassis {0}")]
    UnknownChassis(u32),
    #[error("Invalid Pi ID: {0}")]
    UnknownNode(String),
}

#[derive(Debug, Clone)]
pub struct NodeRoute {
    pub node_id: String,
    pub ip_address: String,
    pub port: u16,
    pub url: String,
    pub chassis: Vec<u32>,
    pub description: String,
    pub board_count: u32,
    pub assignment: Assignment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchRoute {
    pub name: String,
    pub node_id: String,
    pub node_url: String,
    pub board: u32,
    pub relay: u32,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    nodes: BTreeMap<String, NodeRoute>,
    switches: BTreeMap<String, SwitchRoute>,
    chassis: BTreeMap<u32, String>,
    board_capacity: u32,
    chassis_count: u32,
}

impl RoutingTable {
    pub fn from_config(cfg: &CoordinatorConfig) -> Result<Self, ConfigError> {
        Self::build(&cfg.raspberry_pis, &cfg.layout)
    }

    pub fn build(
        nodes: &BTreeMap<String, NodeConfig>,
        layout: &ChassisLayout,
    ) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::Invalid("no nodes configured".into()));
        }

        let mut table = RoutingTable {
            nodes: BTreeMap::new(),
            switches: BTreeMap::new(),
            chassis: BTreeMap::new(),
            board_capacity: layout.board_capacity,
            chassis_count: layout.chassis_count,
        };

        for (node_id, node) in nodes {
            let route = build_node_route(node_id, node, layout)?;

            for &chassis in &route.chassis {
                if let Some(owner) = table.chassis.insert(chassis, node_id.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "chassis {chassis} is owned by both {owner} and {node_id}"
                    )));
                }
            }

            for entry in route.assignment.iter() {
                let switch = SwitchRoute {
                    name: entry.name.clone(),
                    node_id: node_id.clone(),
                    node_url: route.url.clone(),
                    board: entry.slot.board,
                    relay: entry.slot.relay,
                };
                if let Some(existing) = table.switches.insert(entry.name.clone(), switch) {
                    return Err(ConfigError::Invalid(format!(
                        "switch {} is mapped on both {} and {node_id}",
                        entry.name, existing.node_id
                    )));
                }
            }

            table.nodes.insert(node_id.clone(), route);
        }

        Ok(table)
    }

    pub fn resolve_switch(&self, name: &str) -> Result<&SwitchRoute, ResolutionError> {
        self.switches
            .get(&canonical_name(name))
            .ok_or_else(|| ResolutionError::UnknownSwitch(name.to_string()))
    }

    pub fn resolve_chassis(&self, chassis: u32) -> Result<&NodeRoute, ResolutionError> {
        self.chassis
            .get(&chassis)
            .and_then(|id| self.nodes.get(id))
            .ok_or(ResolutionError::UnknownChassis(chassis))
    }

    pub fn node(&self, node_id: &str) -> Result<&NodeRoute, ResolutionError> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| ResolutionError::UnknownNode(node_id.to_string()))
    }

    /// Sorted names of every configured switch.
    pub fn all_switch_names(&self) -> Vec<String> {
        self.switches.keys().cloned().collect()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRoute> {
        self.nodes.values()
    }

    pub fn chassis_numbers(&self) -> Vec<u32> {
        self.chassis.keys().copied().collect()
    }

    pub fn board_capacity(&self) -> u32 {
        self.board_capacity
    }

    /// Highest chassis number the layout defines.
    pub fn chassis_count(&self) -> u32 {
        self.chassis_count
    }

    pub fn switch_count(&self) -> usize {
        self.switches.len()
    }

    /// Distinct owning nodes, in order of their first switch name, with the
    /// switches each one owns.
    pub fn switches_by_node(&self) -> Vec<(&NodeRoute, Vec<String>)> {
        let mut grouped: Vec<(&NodeRoute, Vec<String>)> = Vec::new();
        for switch in self.switches.values() {
            match grouped.iter_mut().find(|(n, _)| n.node_id == switch.node_id) {
                Some((_, names)) => names.push(switch.name.clone()),
                None => {
                    if let Some(node) = self.nodes.get(&switch.node_id) {
                        grouped.push((node, vec![switch.name.clone()]));
                    }
                }
            }
        }
        grouped
    }
}

fn build_node_route(
    node_id: &str,
    node: &NodeConfig,
    layout: &ChassisLayout,
) -> Result<NodeRoute, ConfigError> {
    let ip = node.ip_address.trim();
    if ip.is_empty() {
        return Err(ConfigError::Invalid(format!("node {node_id} has no ip_address")));
    }
    if node.port == 0 {
        return Err(ConfigError::Invalid(format!("node {node_id} has port 0")));
    }
    if let Some(&bad) = node.chassis.iter().find(|&&c| !layout.contains_chassis(c)) {
        return Err(ConfigError::Invalid(format!(
            "node {node_id} lists chassis {bad}, valid chassis are 1-{}",
            layout.chassis_count
        )));
    }

    let allocation_err = |source| ConfigError::Allocation {
        node: node_id.to_string(),
        source,
    };
    let assignment = if node.switch_mapping.is_empty() {
        layout.node_assignment(&node.chassis).map_err(allocation_err)?
    } else {
        let slots = node
            .switch_mapping
            .iter()
            .map(|(name, pos)| (name.as_str(), Slot::new(pos.hat, pos.relay)));
        Assignment::from_explicit(layout.board_capacity, slots).map_err(allocation_err)?
    };

    let board_count = match node.num_relay_hats {
        Some(0) => {
            return Err(ConfigError::Invalid(format!(
                "node {node_id} declares zero relay boards"
            )))
        }
        Some(n) => n,
        None => assignment.board_count().max(1),
    };
    if let Some(entry) = assignment.iter().find(|e| e.slot.board >= board_count) {
        return Err(ConfigError::Invalid(format!(
            "switch {} on node {node_id} uses board {} but the node has {board_count} boards",
            entry.name, entry.slot.board
        )));
    }

    Ok(NodeRoute {
        node_id: node_id.to_string(),
        ip_address: ip.to_string(),
        port: node.port,
        url: format!("http://{ip}:{}", node.port),
        chassis: node.chassis.clone(),
        description: node.description.clone(),
        board_count,
        assignment,
    })
}
