//! Shared building blocks for the relay coordinator and relay nodes.
//!
//! - [`allocator`]: switch name -> (board, relay) allocation and chassis subsets
//! - [`layout`]: the standard chassis topology used when no explicit mapping is configured
//! - [`schemas`]: JSON bodies exchanged over HTTP

pub mod allocator;
pub mod layout;
pub mod schemas;

pub use allocator::{
    allocate, canonical_name, chassis_of_name, chassis_switch_name, AllocationError,
    AssignedSwitch, Assignment, ChassisGroup, Slot,
};
pub use layout::ChassisLayout;
