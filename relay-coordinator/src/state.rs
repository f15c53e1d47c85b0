use crate::models::{NodeState, NodeStatus};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type Shared<T> = Arc<RwLock<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}

/// Latest status per node. The liveness monitor is the only writer; every
/// write replaces a whole entry so readers never see a half-updated status.
#[derive(Clone, Default)]
pub struct StatusCache {
    entries: Shared<BTreeMap<String, NodeStatus>>,
}

impl StatusCache {
    /// Cache with every node in the `unknown` state.
    pub fn new<I, S>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = node_ids
            .into_iter()
            .map(|id| (id.into(), NodeStatus::default()))
            .collect();
        Self {
            entries: new_state(entries),
        }
    }

    pub fn get(&self, node_id: &str) -> Option<NodeStatus> {
        self.entries.read().get(node_id).cloned()
    }

    pub fn set(&self, node_id: &str, status: NodeStatus) {
        self.entries.write().insert(node_id.to_string(), status);
    }

    pub fn snapshot(&self) -> BTreeMap<String, NodeStatus> {
        self.entries.read().clone()
    }

    pub fn state_of(&self, node_id: &str) -> NodeState {
        self.entries
            .read()
            .get(node_id)
            .map_or(NodeState::Unknown, |s| s.state)
    }

    pub fn all_online(&self) -> bool {
        self.entries
            .read()
            .values()
            .all(|s| s.state == NodeState::Online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_unknown_and_replaces_entries() {
        let cache = StatusCache::new(["pi_1", "pi_2"]);
        assert_eq!(cache.state_of("pi_1"), NodeState::Unknown);
        assert!(!cache.all_online());

        cache.set(
            "pi_1",
            NodeStatus {
                state: NodeState::Online,
                ..NodeStatus::default()
            },
        );
        assert_eq!(cache.state_of("pi_1"), NodeState::Online);
        assert_eq!(cache.state_of("pi_2"), NodeState::Unknown);
        assert_eq!(cache.state_of("nope"), NodeState::Unknown);
    }

    #[test]
    fn readers_never_observe_mixed_entries() {
        let cache = StatusCache::new(["pi_1"]);
        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..2000u32 {
                    let (state, ms) = if i % 2 == 0 {
                        (NodeState::Online, 1.0)
                    } else {
                        (NodeState::Offline, 2.0)
                    };
                    cache.set(
                        "pi_1",
                        NodeStatus {
                            state,
                            last_check: Some(f64::from(i)),
                            response_time_ms: Some(ms),
                            last_error: (state == NodeState::Offline).then(|| "down".to_string()),
                            response: None,
                        },
                    );
                }
            })
        };

        for _ in 0..2000 {
            let Some(s) = cache.get("pi_1") else { continue };
            match s.state {
                NodeState::Online => {
                    assert_eq!(s.response_time_ms, Some(1.0));
                    assert!(s.last_error.is_none());
                }
                NodeState::Offline => {
                    assert_eq!(s.response_time_ms, Some(2.0));
                    assert_eq!(s.last_error.as_deref(), Some("down"));
                }
                _ => assert!(s.last_check.is_none()),
            }
        }
        writer.join().unwrap();
    }
}
