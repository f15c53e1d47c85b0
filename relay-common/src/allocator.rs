//! Switch-to-relay address allocation.
//!
//! Logical switches are grouped per chassis and laid out sequentially over
//! fixed-capacity relay boards: board 0 relay 1 first, then the next relay,
//! rolling to the next board exactly when the current one is full. A node
//! that controls only some chassis gets a local [`Assignment`] whose board
//! indices are renumbered densely from 0.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Errors raised while building an [`Assignment`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("board capacity must be greater than zero")]
    InvalidCapacity,
    #[error("switch {switch} has no defined position in chassis {chassis}")]
    UnknownPosition { chassis: u32, switch: String },
    #[error("switch {0} is assigned more than once")]
    DuplicateSwitch(String),
    #[error("chassis {0} is listed more than once")]
    DuplicateChassis(u32),
    #[error("switches {first} and {second} share board {board} relay {relay}")]
    SlotConflict {
        first: String,
        second: String,
        board: u32,
        relay: u32,
    },
    #[error("switch {switch} uses relay {relay}, valid relays are 1-{capacity}")]
    InvalidRelay {
        switch: String,
        relay: u32,
        capacity: u32,
    },
}

/// Physical position of a relay: 0-based board, 1-based relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    pub board: u32,
    pub relay: u32,
}

impl Slot {
    pub fn new(board: u32, relay: u32) -> Self {
        Self { board, relay }
    }
}

/// Canonical form of a switch name.
pub fn canonical_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Name of the switch that powers the chassis itself (`CH3` for chassis 3).
pub fn chassis_switch_name(chassis: u32) -> String {
    format!("CH{chassis}")
}

/// Extracts the chassis number from names such as `CH2` or `CH2F`.
pub fn chassis_of_name(name: &str) -> Option<u32> {
    let name = canonical_name(name);
    let rest = name.strip_prefix("CH")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// An ordered run of switches belonging to one chassis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChassisGroup {
    id: u32,
    switches: Vec<String>,
}

impl ChassisGroup {
    /// Group with a caller-supplied switch order.
    pub fn new<S: AsRef<str>>(id: u32, switches: &[S]) -> Self {
        Self {
            id,
            switches: switches.iter().map(|s| canonical_name(s.as_ref())).collect(),
        }
    }

    /// The full standard group: chassis switch then one switch per letter.
    pub fn standard(id: u32, sequence: &str) -> Self {
        let mut switches = vec![chassis_switch_name(id)];
        switches.extend(
            sequence
                .chars()
                .map(|letter| format!("CH{id}{}", letter.to_ascii_uppercase())),
        );
        Self { id, switches }
    }

    /// Sorts arbitrary members into canonical order (chassis switch first,
    /// then by position of their letter in `sequence`).
    pub fn ordered<S: AsRef<str>>(
        id: u32,
        members: &[S],
        sequence: &str,
    ) -> Result<Self, AllocationError> {
        let prefix = chassis_switch_name(id);
        let letters: Vec<char> = sequence.chars().map(|c| c.to_ascii_uppercase()).collect();

        let mut positioned: Vec<(usize, String)> = Vec::with_capacity(members.len());
        let mut taken = HashSet::new();

        for member in members {
            let name = canonical_name(member.as_ref());
            let position = match name.strip_prefix(&prefix) {
                Some("") => Some(0),
                Some(suffix) => {
                    let mut chars = suffix.chars();
                    match (chars.next(), chars.next()) {
                        (Some(letter), None) => letters
                            .iter()
                            .position(|l| *l == letter)
                            .map(|p| p + 1),
                        _ => None,
                    }
                }
                None => None,
            };

            let Some(position) = position else {
                return Err(AllocationError::UnknownPosition {
                    chassis: id,
                    switch: name,
                });
            };
            if !taken.insert(position) {
                return Err(AllocationError::DuplicateSwitch(name));
            }
            positioned.push((position, name));
        }

        positioned.sort_by_key(|(position, _)| *position);
        Ok(Self {
            id,
            switches: positioned.into_iter().map(|(_, name)| name).collect(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn switches(&self) -> &[String] {
        &self.switches
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }
}

/// One switch and the slot it occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignedSwitch {
    pub name: String,
    pub chassis: Option<u32>,
    pub slot: Slot,
}

/// Bijective switch <-> slot mapping, in placement order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    entries: Vec<AssignedSwitch>,
    index: HashMap<String, usize>,
}

/// Lays out `groups` in order over boards of `capacity` relays.
pub fn allocate(capacity: u32, groups: &[ChassisGroup]) -> Result<Assignment, AllocationError> {
    if capacity == 0 {
        return Err(AllocationError::InvalidCapacity);
    }

    let mut seen_chassis = HashSet::new();
    let mut entries = Vec::new();
    let mut position: u32 = 0;

    for group in groups {
        if !seen_chassis.insert(group.id) {
            return Err(AllocationError::DuplicateChassis(group.id));
        }
        for name in &group.switches {
            entries.push(AssignedSwitch {
                name: name.clone(),
                chassis: Some(group.id),
                slot: Slot::new(position / capacity, position % capacity + 1),
            });
            position += 1;
        }
    }

    Assignment::from_entries(entries)
}

impl Assignment {
    fn from_entries(entries: Vec<AssignedSwitch>) -> Result<Self, AllocationError> {
        let mut index = HashMap::with_capacity(entries.len());
        let mut slots: HashMap<Slot, usize> = HashMap::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.name.clone(), i).is_some() {
                return Err(AllocationError::DuplicateSwitch(entry.name.clone()));
            }
            if let Some(prev) = slots.insert(entry.slot, i) {
                return Err(AllocationError::SlotConflict {
                    first: entries[prev].name.clone(),
                    second: entry.name.clone(),
                    board: entry.slot.board,
                    relay: entry.slot.relay,
                });
            }
        }

        Ok(Self { entries, index })
    }

    /// Builds an assignment from explicitly configured slots. Entries are
    /// kept in (board, relay) order and the chassis is inferred from the name.
    pub fn from_explicit<I, S>(capacity: u32, slots: I) -> Result<Self, AllocationError>
    where
        I: IntoIterator<Item = (S, Slot)>,
        S: AsRef<str>,
    {
        if capacity == 0 {
            return Err(AllocationError::InvalidCapacity);
        }

        let mut entries = Vec::new();
        for (name, slot) in slots {
            let name = canonical_name(name.as_ref());
            if slot.relay == 0 || slot.relay > capacity {
                return Err(AllocationError::InvalidRelay {
                    switch: name,
                    relay: slot.relay,
                    capacity,
                });
            }
            entries.push(AssignedSwitch {
                chassis: chassis_of_name(&name),
                name,
                slot,
            });
        }
        entries.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.name.cmp(&b.name)));

        Self::from_entries(entries)
    }

    /// Node-local view containing only switches of the requested chassis,
    /// with board indices renumbered from 0 in order of first appearance.
    pub fn for_chassis(&self, subset: &[u32]) -> Assignment {
        let wanted: HashSet<u32> = subset.iter().copied().collect();
        let mut boards: HashMap<u32, u32> = HashMap::new();
        let mut entries = Vec::new();

        for entry in &self.entries {
            if !entry.chassis.is_some_and(|c| wanted.contains(&c)) {
                continue;
            }
            let next = boards.len() as u32;
            let board = *boards.entry(entry.slot.board).or_insert(next);
            entries.push(AssignedSwitch {
                name: entry.name.clone(),
                chassis: entry.chassis,
                slot: Slot::new(board, entry.slot.relay),
            });
        }

        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Assignment { entries, index }
    }

    pub fn get(&self, name: &str) -> Option<&AssignedSwitch> {
        self.index
            .get(&canonical_name(name))
            .map(|&i| &self.entries[i])
    }

    pub fn slot(&self, name: &str) -> Option<Slot> {
        self.get(name).map(|e| e.slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssignedSwitch> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of boards spanned (highest board index + 1).
    pub fn board_count(&self) -> u32 {
        self.entries
            .iter()
            .map(|e| e.slot.board + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn switches_on_board(&self, board: u32) -> Vec<&AssignedSwitch> {
        self.entries
            .iter()
            .filter(|e| e.slot.board == board)
            .collect()
    }

    pub fn switches_in_chassis(&self, chassis: u32) -> Vec<&AssignedSwitch> {
        self.entries
            .iter()
            .filter(|e| e.chassis == Some(chassis))
            .collect()
    }

    pub fn chassis(&self) -> BTreeSet<u32> {
        self.entries.iter().filter_map(|e| e.chassis).collect()
    }

    /// Reverse lookup: which switch sits on `slot`.
    pub fn switch_at(&self, slot: Slot) -> Option<&AssignedSwitch> {
        self.entries.iter().find(|e| e.slot == slot)
    }
}
