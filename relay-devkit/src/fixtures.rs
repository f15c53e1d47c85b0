/*!
Coordinator configuration fixtures

Builds the YAML the coordinator reads at start-up, pointing nodes at stub
servers or at dead loopback addresses.
*/

use std::fmt::Write;

#[derive(Debug, Clone)]
pub struct NodeFixture {
    pub id: String,
    /// `host:port`
    pub addr: String,
    pub chassis: Vec<u32>,
    pub num_relay_hats: Option<u32>,
    /// `(switch, hat, relay)`
    pub switch_mapping: Vec<(String, u32, u32)>,
}

impl NodeFixture {
    pub fn new(id: &str, addr: impl ToString, chassis: &[u32]) -> Self {
        Self {
            id: id.to_string(),
            addr: addr.to_string(),
            chassis: chassis.to_vec(),
            num_relay_hats: None,
            switch_mapping: Vec::new(),
        }
    }

    pub fn hats(mut self, count: u32) -> Self {
        self.num_relay_hats = Some(count);
        self
    }

    pub fn map(mut self, switch: &str, hat: u32, relay: u32) -> Self {
        self.switch_mapping.push((switch.to_string(), hat, relay));
        self
    }
}

/// Coordinator config with in-memory history and short timings.
#[derive(Debug, Clone)]
pub struct CoordinatorFixture {
    pub status_check_interval: f64,
    pub request_timeout: f64,
    pub nodes: Vec<NodeFixture>,
}

impl Default for CoordinatorFixture {
    fn default() -> Self {
        Self {
            status_check_interval: 0.2,
            request_timeout: 1.0,
            nodes: Vec::new(),
        }
    }
}

impl CoordinatorFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: NodeFixture) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn request_timeout(mut self, secs: f64) -> Self {
        self.request_timeout = secs;
        self
    }

    pub fn to_yaml(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "status_check_interval: {}", self.status_check_interval);
        let _ = writeln!(out, "request_timeout: {}", self.request_timeout);
        let _ = writeln!(out, "history_path: null");
        let _ = writeln!(out, "raspberry_pis:");
        for node in &self.nodes {
            let (ip, port) = node.addr.rsplit_once(':').unwrap_or((node.addr.as_str(), "5001"));
            let chassis: Vec<String> = node.chassis.iter().map(u32::to_string).collect();
            let _ = writeln!(out, "  {}:", node.id);
            let _ = writeln!(out, "    ip_address: \"{ip}\"");
            let _ = writeln!(out, "    port: {port}");
            let _ = writeln!(out, "    chassis: [{}]", chassis.join(", "));
            let _ = writeln!(out, "    description: \"{} fixture\"", node.id);
            if let Some(hats) = node.num_relay_hats {
                let _ = writeln!(out, "    num_relay_hats: {hats}");
            }
            if !node.switch_mapping.is_empty() {
                let _ = writeln!(out, "    switch_mapping:");
                for (name, hat, relay) in &node.switch_mapping {
                    let _ = writeln!(out, "      {name}: {{ hat: {hat}, relay: {relay} }}");
                }
            }
        }
        out
    }
}
