//! Publishing merged shadow tree snapshots to the renderer

use bytemuck::{Pod, Zeroable};

use crate::core::types::Mat4;
use crate::voxel::node::NodeAddress;
use super::config::MAX_TILES;
use super::merged::MergedTree;
use super::registry::TileRegistry;

/// Uniform block describing the shadow tree (std140 layout, matches the
/// `VoxelShadows` block in the shading pass)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VoxelsUniform {
    /// World space to voxel coordinates, column-major (64 bytes, offset 0)
    pub world_to_voxels: [[f32; 4]; 4],
    /// Octree depth of each tile (4 bytes, offset 64)
    pub tree_height: u32,
    /// Tiles per axis (4 bytes, offset 68)
    pub tile_subdivisions: u32,
    /// Padding to align the root table to 16 bytes (8 bytes, offset 72)
    _padding: [u32; 2],
    /// Root node address per tile; only `x` is used (16-byte array stride, offset 80)
    pub root_addresses: [[u32; 4]; MAX_TILES],
}

impl VoxelsUniform {
    pub fn new(world_to_voxels: Mat4, tree_height: u32, tile_subdivisions: u32, roots: &[NodeAddress]) -> Self {
        let mut uniform = Self::zeroed();
        uniform.world_to_voxels = world_to_voxels.to_cols_array_2d();
        uniform.tree_height = tree_height;
        uniform.tile_subdivisions = tile_subdivisions;
        for (slot, &root) in uniform.root_addresses.iter_mut().zip(roots) {
            slot[0] = root;
        }
        if roots.len() > MAX_TILES {
            log::warn!("{} tile roots exceed the uniform table of {}", roots.len(), MAX_TILES);
        }
        uniform
    }

    /// Root address of a tile
    pub fn root_address(&self, tile_index: usize) -> Option<NodeAddress> {
        self.root_addresses.get(tile_index).map(|slot| slot[0])
    }
}

/// Receiver of published shadow tree snapshots (normally GPU buffers)
pub trait ShadowConsumer {
    /// Replace the uniform block
    fn upload_uniforms(&mut self, uniforms: &VoxelsUniform);
    /// Replace the node buffer contents
    fn upload_nodes(&mut self, nodes: &[u8]);
}

/// Pushes a fresh snapshot whenever more tiles have merged than were last published
#[derive(Debug, Default)]
pub struct Publisher {
    tiles_on_gpu: usize,
}

impl Publisher {
    pub fn new() -> Self {
        Self { tiles_on_gpu: 0 }
    }

    /// Number of merged tiles covered by the last publish
    pub fn tiles_on_gpu(&self) -> usize {
        self.tiles_on_gpu
    }

    /// Publish if new tiles merged since the last publish. Returns whether it did.
    pub fn tick<C: ShadowConsumer>(
        &mut self,
        registry: &TileRegistry,
        tree: &MergedTree,
        world_to_voxels: Mat4,
        tile_subdivisions: u32,
        consumer: &mut C,
    ) -> bool {
        let merged = registry.merged();
        if self.tiles_on_gpu >= merged {
            return false;
        }
        self.tiles_on_gpu = merged;
        self.publish(tree, world_to_voxels, tile_subdivisions, consumer);
        true
    }

    /// Push the current root table and node store unconditionally
    pub fn publish<C: ShadowConsumer>(
        &self,
        tree: &MergedTree,
        world_to_voxels: Mat4,
        tile_subdivisions: u32,
        consumer: &mut C,
    ) {
        // Roots first: any root read here was stored after its append
        // released the store, so the store read below already holds it
        let roots = tree.roots().snapshot();
        let tree_height = tree.tile_resolution().max(1).ilog2();
        consumer.upload_uniforms(&VoxelsUniform::new(world_to_voxels, tree_height, tile_subdivisions, &roots));

        let store = tree.store();
        log::debug!(
            "Publishing shadow tree: {} tiles merged, {} nodes ({} KB)",
            self.tiles_on_gpu,
            store.node_count(),
            store.data_size_bytes() / 1024
        );
        consumer.upload_nodes(store.data());
    }
}
