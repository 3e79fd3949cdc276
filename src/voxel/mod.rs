//! Shadow octree data structures

pub mod node;
pub mod store;
pub mod lookup;

pub use node::{ChildStatus, NodeAddress, ShadowNode};
pub use store::NodeStore;
