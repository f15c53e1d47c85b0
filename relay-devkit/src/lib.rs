/*!
# Relay DevKit

Test tooling for the relay coordinator:
- [`StubNode`]: scripted relay node over real HTTP, with request capture
- [`unused_local_addr`]: an address that refuses connections
- [`wait_until`]: polling wait for background effects
- [`CoordinatorFixture`]: coordinator YAML built around stub nodes
*/

pub mod fixtures;
pub mod harness;
pub mod stub_node;

pub use fixtures::{CoordinatorFixture, NodeFixture};
pub use harness::{init_logging, wait_until};
pub use stub_node::{unused_local_addr, RecordedRequest, StubNode, StubResponse};
