use serde::{Deserialize, Serialize};

use crate::allocator::{allocate, AllocationError, Assignment, ChassisGroup};

/// Deployment-wide description of the standard chassis topology.
///
/// Chassis `n` owns `CHn` followed by `CHn<letter>` for every letter of
/// `sequence`, all placed over boards of `board_capacity` relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChassisLayout {
    pub board_capacity: u32,
    pub chassis_count: u32,
    pub sequence: String,
}

impl Default for ChassisLayout {
    fn default() -> Self {
        Self {
            board_capacity: 8,
            chassis_count: 4,
            sequence: "ABCDEFGHIJK".to_string(),
        }
    }
}

impl ChassisLayout {
    pub fn groups(&self) -> Vec<ChassisGroup> {
        (1..=self.chassis_count)
            .map(|id| ChassisGroup::standard(id, &self.sequence))
            .collect()
    }

    pub fn contains_chassis(&self, chassis: u32) -> bool {
        (1..=self.chassis_count).contains(&chassis)
    }

    /// Assignment of every chassis across one sequential board run.
    pub fn global_assignment(&self) -> Result<Assignment, AllocationError> {
        allocate(self.board_capacity, &self.groups())
    }

    /// Local assignment for a node controlling `chassis`.
    pub fn node_assignment(&self, chassis: &[u32]) -> Result<Assignment, AllocationError> {
        Ok(self.global_assignment()?.for_chassis(chassis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Slot;

    #[test]
    fn default_layout_fills_six_boards() {
        let layout = ChassisLayout::default();
        let global = layout.global_assignment().unwrap();
        assert_eq!(global.len(), 48);
        assert_eq!(global.board_count(), 6);
        assert_eq!(global.slot("CH4K"), Some(Slot::new(5, 8)));
    }

    #[test]
    fn node_assignment_starts_at_board_zero() {
        let layout = ChassisLayout::default();
        let local = layout.node_assignment(&[3, 4]).unwrap();
        assert_eq!(local.len(), 24);
        assert_eq!(local.slot("CH3"), Some(Slot::new(0, 1)));
        assert_eq!(local.slot("CH4K"), Some(Slot::new(2, 8)));
    }

    #[test]
    fn layout_deserializes_with_defaults() {
        let layout: ChassisLayout = serde_json::from_str(r#"{"board_capacity": 16}"#).unwrap();
        assert_eq!(layout.board_capacity, 16);
        assert_eq!(layout.chassis_count, 4);
        assert_eq!(layout.sequence, "ABCDEFGHIJK");
    }
}
