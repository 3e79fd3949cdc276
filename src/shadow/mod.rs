//! Tiled shadow octree construction
//!
//! The light-space domain is split into `T x T` tiles. Each frame at most
//! one tile is captured and handed to a background builder; a merger thread
//! appends finished tile trees into one shared node store, and the
//! publisher pushes the merged tree to the renderer whenever it grows.

pub mod config;
pub mod geometry;
pub mod capture;
pub mod octree_builder;
pub mod worker;
pub mod registry;
pub mod merged;
pub mod merger;
pub mod publisher;
pub mod tree;

pub use config::ShadowTreeConfig;
pub use geometry::{MeshInstance, ShadowScene, TileGrid};
pub use capture::{DepthCapture, DualDepth, OccluderCapture};
pub use octree_builder::{TileOctree, TileOctreeBuilder};
pub use worker::{BuildState, TileBuilder};
pub use registry::TileRegistry;
pub use merged::{MergedTree, RootTable};
pub use merger::TileMerger;
pub use publisher::{Publisher, ShadowConsumer, VoxelsUniform};
pub use tree::{BuildStats, VoxelShadowTree};
