//! Tiled shadow octree driven from the render loop
//!
//! `update_build` is called once per frame. It starts at most one tile
//! (depth capture runs synchronously here) and republishes the merged tree
//! when more tiles have finished. Merging happens on a dedicated thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::core::types::{Mat4, Vec3};
use crate::core::{Error, Result};
use crate::math::Aabb;
use crate::voxel::lookup;
use crate::voxel::node::{NodeAddress, ShadowNode};
use crate::voxel::store::NodeStore;
use super::capture::DepthCapture;
use super::config::ShadowTreeConfig;
use super::geometry::{ShadowScene, TileGrid};
use super::merged::MergedTree;
use super::merger::TileMerger;
use super::publisher::{Publisher, ShadowConsumer};
use super::registry::TileRegistry;
use super::worker::TileBuilder;

/// Snapshot of build progress
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Tiles handed to a builder
    pub started: usize,
    /// Tiles merged into the shared store
    pub merged: usize,
    /// Merged tiles covered by the last publish
    pub on_gpu: usize,
    /// Builders started but not yet merged
    pub in_flight: usize,
    /// Nodes in the shared store
    pub node_count: usize,
    /// Total number of tiles
    pub tile_count: usize,
}

/// Shadow octree built tile by tile in the background
pub struct VoxelShadowTree<D: DepthCapture, C: ShadowConsumer> {
    config: ShadowTreeConfig,
    grid: TileGrid,
    scene: ShadowScene,
    capture: D,
    consumer: C,
    registry: Arc<TileRegistry>,
    tree: Arc<MergedTree>,
    publisher: Publisher,
    merger: Option<JoinHandle<()>>,
}

impl<D: DepthCapture, C: ShadowConsumer> VoxelShadowTree<D, C> {
    /// Validate the config, publish the placeholder tree, and start the merger
    pub fn new(config: ShadowTreeConfig, scene: ShadowScene, capture: D, consumer: C) -> Result<Self> {
        config.validate()?;
        let tile_count = config.tile_count();
        let tile_resolution = config.tile_resolution();

        // Every tile starts out pointing at a single fully lit node
        let mut store = NodeStore::with_capacity(1024);
        let placeholder = store.write_node(ShadowNode::unshadowed(), 0, 0);

        let registry = Arc::new(TileRegistry::new(tile_count, config.concurrent_builds));
        let tree = Arc::new(MergedTree::new(store, placeholder, tile_count, tile_resolution));

        let mut shadow_tree = Self {
            grid: TileGrid::new(config.tile_subdivisions),
            config,
            scene,
            capture,
            consumer,
            registry: Arc::clone(&registry),
            tree: Arc::clone(&tree),
            publisher: Publisher::new(),
            merger: None,
        };
        let world_to_voxels = shadow_tree.world_to_voxels();
        shadow_tree.publisher.publish(
            &shadow_tree.tree,
            world_to_voxels,
            shadow_tree.config.tile_subdivisions,
            &mut shadow_tree.consumer,
        );
        shadow_tree.merger = Some(TileMerger::new(registry, tree).spawn()?);

        log::info!(
            "Shadow tree: {}x{} tiles of {}^3 voxels, {} concurrent builds",
            shadow_tree.config.tile_subdivisions,
            shadow_tree.config.tile_subdivisions,
            tile_resolution,
            shadow_tree.config.concurrent_builds
        );
        Ok(shadow_tree)
    }

    /// Per-frame entry point: maybe start a tile, then publish if tiles merged.
    ///
    /// A failed depth capture leaves the tile queued; it is retried next call.
    pub fn update_build(&mut self) -> Result<()> {
        let started = self.start_next_tile();

        let world_to_voxels = self.world_to_voxels();
        self.publisher.tick(
            &self.registry,
            &self.tree,
            world_to_voxels,
            self.config.tile_subdivisions,
            &mut self.consumer,
        );

        started.map(|_| ())
    }

    /// Start the next queued tile if a builder slot is free. Returns the tile started.
    fn start_next_tile(&mut self) -> Result<Option<usize>> {
        let Some(tile) = self.registry.next_tile() else {
            return Ok(None);
        };

        let bounds = self.tile_bounds(tile);
        let resolution = self.config.tile_resolution();
        let depth = self.capture.capture_dual_depth(&bounds, resolution)?;
        if depth.resolution() != resolution {
            return Err(Error::Capture(format!(
                "tile {} captured at {} instead of {}",
                tile,
                depth.resolution(),
                resolution
            )));
        }

        let registry = Arc::clone(&self.registry);
        let builder = TileBuilder::spawn(tile, depth, move || registry.notify_completion())?;
        self.registry.submit(builder);

        log::info!("Started shadow tile {} ({}/{})", tile, tile + 1, self.registry.tile_count());
        Ok(Some(tile))
    }

    /// Light-space bounds of the whole scene
    pub fn domain_bounds(&self) -> Aabb {
        self.scene.light_space_bounds()
    }

    /// Light-space bounds of one tile, from the current scene
    pub fn tile_bounds(&self, tile_index: usize) -> Aabb {
        self.grid.tile_bounds(&self.domain_bounds(), tile_index)
    }

    /// World space to voxel coordinates for the whole tiled domain
    pub fn world_to_voxels(&self) -> Mat4 {
        let tile_resolution = self.config.tile_resolution() as f32;
        let tiled = tile_resolution * self.config.tile_subdivisions as f32;
        // Only x and y are tiled
        self.scene.world_to_voxels(Vec3::new(tiled, tiled, tile_resolution))
    }

    /// Whether every tile is merged and the full tree has been published
    pub fn is_complete(&self) -> bool {
        let tile_count = self.registry.tile_count();
        self.registry.merged() == tile_count && self.publisher.tiles_on_gpu() == tile_count
    }

    /// Build progress
    pub fn stats(&self) -> BuildStats {
        BuildStats {
            started: self.registry.started(),
            merged: self.registry.merged(),
            on_gpu: self.publisher.tiles_on_gpu(),
            in_flight: self.registry.in_flight(),
            node_count: self.tree.store().node_count(),
            tile_count: self.registry.tile_count(),
        }
    }

    /// Current root address of every tile
    pub fn root_addresses(&self) -> Vec<NodeAddress> {
        self.tree.roots().snapshot()
    }

    /// Address of the fully lit placeholder root
    pub fn placeholder_address(&self) -> NodeAddress {
        self.tree.placeholder()
    }

    /// Tile indices in the order they were merged
    pub fn merge_order(&self) -> Vec<usize> {
        self.registry.merge_order()
    }

    /// Whether voxel `(x, y, z)` of a tile is shadowed, per the merged tree
    pub fn is_voxel_shadowed(&self, tile_index: usize, x: u32, y: u32, z: u32) -> Option<bool> {
        let root = self.tree.roots().get(tile_index)?;
        let store = self.tree.store();
        lookup::is_shadowed(store.nodes(), root, self.config.tree_depth(), x, y, z)
    }

    /// Build configuration
    pub fn config(&self) -> &ShadowTreeConfig {
        &self.config
    }

    /// The snapshot consumer
    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Mutable access to the snapshot consumer
    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }
}

impl<D: DepthCapture, C: ShadowConsumer> Drop for VoxelShadowTree<D, C> {
    fn drop(&mut self) {
        self.registry.shutdown();
        if let Some(merger) = self.merger.take() {
            if merger.join().is_err() {
                log::error!("Shadow merger thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    use crate::shadow::capture::{DualDepth, OccluderCapture};
    use crate::shadow::geometry::MeshInstance;
    use crate::shadow::octree_builder::TileOctreeBuilder;
    use crate::shadow::publisher::VoxelsUniform;
    use crate::voxel::lookup::reachable_nodes;

    #[derive(Default)]
    struct Recorder {
        uniforms: Vec<VoxelsUniform>,
        node_uploads: Vec<Vec<u8>>,
    }

    impl ShadowConsumer for Recorder {
        fn upload_uniforms(&mut self, uniforms: &VoxelsUniform) {
            self.uniforms.push(*uniforms);
        }

        fn upload_nodes(&mut self, nodes: &[u8]) {
            self.node_uploads.push(nodes.to_vec());
        }
    }

    /// Unit cube scene spanning [0, 8]^3 in light space
    fn scene() -> ShadowScene {
        let corners = vec![Vec3::ZERO, Vec3::splat(8.0)];
        ShadowScene::new(Mat4::IDENTITY, vec![MeshInstance::new(Arc::new(corners), Mat4::IDENTITY)])
    }

    fn occluders() -> OccluderCapture {
        OccluderCapture::new(vec![
            Aabb::new(Vec3::new(1.0, 1.0, 2.0), Vec3::new(3.0, 6.5, 3.0)),
            Aabb::new(Vec3::new(5.0, 0.0, 5.0), Vec3::new(8.0, 3.0, 6.0)),
        ])
    }

    fn config(resolution: u32, subdivisions: u32, concurrent: usize) -> ShadowTreeConfig {
        ShadowTreeConfig {
            resolution,
            tile_subdivisions: subdivisions,
            concurrent_builds: concurrent,
        }
    }

    /// Every root in the live table and in the last published snapshot
    /// must reach only written nodes
    fn assert_roots_resolve<D: DepthCapture>(tree: &VoxelShadowTree<D, Recorder>) {
        // Roots before the store lock, matching the publisher
        let roots = tree.root_addresses();
        {
            let store = tree.tree.store();
            for (tile, &root) in roots.iter().enumerate() {
                assert!(
                    reachable_nodes(store.nodes(), root).is_some(),
                    "tile {} root {} not fully written", tile, root
                );
            }
        }

        let (Some(uniform), Some(bytes)) = (tree.consumer().uniforms.last(), tree.consumer().node_uploads.last()) else {
            return;
        };
        let nodes: Vec<ShadowNode> = bytes
            .chunks_exact(ShadowNode::SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        for tile in 0..roots.len() {
            let root = uniform.root_address(tile).unwrap();
            assert!(
                reachable_nodes(&nodes, root).is_some(),
                "published tile {} root {} outside snapshot of {} nodes", tile, root, nodes.len()
            );
        }
    }

    /// Drive the build to completion, checking scheduling invariants every frame
    fn run_to_completion<D: DepthCapture>(tree: &mut VoxelShadowTree<D, Recorder>) {
        let deadline = Instant::now() + Duration::from_secs(30);
        let mut last = tree.stats();
        while !tree.is_complete() {
            assert!(Instant::now() < deadline, "build did not finish: {:?}", tree.stats());
            tree.update_build().unwrap();

            let stats = tree.stats();
            assert!(stats.started >= last.started && stats.merged >= last.merged);
            assert!(stats.started <= last.started + 1, "more than one tile started per frame");
            assert!(stats.merged <= stats.started && stats.started <= stats.tile_count);
            assert!(stats.in_flight <= tree.config().concurrent_builds);
            assert!(stats.on_gpu <= stats.merged);
            assert_roots_resolve(tree);
            last = stats;
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = VoxelShadowTree::new(config(24, 2, 1), scene(), occluders(), Recorder::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_initial_placeholder_published() {
        let tree = VoxelShadowTree::new(config(16, 2, 1), scene(), occluders(), Recorder::default()).unwrap();

        let placeholder = tree.placeholder_address();
        assert_eq!(tree.root_addresses(), vec![placeholder; 4]);
        assert_eq!(tree.consumer().uniforms.len(), 1);
        let uniform = &tree.consumer().uniforms[0];
        assert_eq!(uniform.tree_height, 3);
        assert_eq!(uniform.tile_subdivisions, 2);
        for tile in 0..4 {
            assert_eq!(uniform.root_address(tile), Some(placeholder));
        }
        assert_eq!(tree.consumer().node_uploads[0].len(), ShadowNode::SIZE);
        assert_eq!(tree.is_voxel_shadowed(2, 7, 7, 7), Some(false));
    }

    #[test]
    fn test_end_to_end_single_builder() {
        let mut tree = VoxelShadowTree::new(config(16, 2, 1), scene(), occluders(), Recorder::default()).unwrap();
        let placeholder = tree.placeholder_address();

        // First frame starts tile 0 only
        tree.update_build().unwrap();
        assert_eq!(tree.stats().started, 1);

        // With one slot, tile 1 cannot start until the merger takes tile 0
        let deadline = Instant::now() + Duration::from_secs(10);
        while tree.stats().merged < 1 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(tree.stats().started, 1);
        let roots = tree.root_addresses();
        assert_ne!(roots[0], placeholder);
        assert_eq!(&roots[1..], &[placeholder; 3]);

        run_to_completion(&mut tree);

        let stats = tree.stats();
        assert_eq!(stats.merged, 4);
        assert_eq!(stats.on_gpu, 4);
        assert_eq!(tree.merge_order(), vec![0, 1, 2, 3]);

        // One more frame does not republish
        let publishes = tree.consumer().uniforms.len();
        tree.update_build().unwrap();
        assert_eq!(tree.consumer().uniforms.len(), publishes);

        // Final snapshot is internally consistent
        let uniform = tree.consumer().uniforms.last().unwrap();
        let bytes = tree.consumer().node_uploads.last().unwrap();
        let nodes: Vec<ShadowNode> = bytes
            .chunks_exact(ShadowNode::SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        for tile in 0..4 {
            let root = uniform.root_address(tile).unwrap();
            assert_ne!(root, placeholder);
            assert!(reachable_nodes(&nodes, root).is_some());
        }
    }

    #[test]
    fn test_merged_tree_matches_tile_builds() {
        let mut tree = VoxelShadowTree::new(config(32, 2, 3), scene(), occluders(), Recorder::default()).unwrap();
        run_to_completion(&mut tree);

        let resolution = tree.config().tile_resolution();
        let mut capture = occluders();
        for tile in 0..4 {
            let depth = capture.capture_dual_depth(&tree.tile_bounds(tile), resolution).unwrap();
            let expected = TileOctreeBuilder::new(&depth);
            for z in 0..resolution {
                for y in 0..resolution {
                    for x in 0..resolution {
                        assert_eq!(
                            tree.is_voxel_shadowed(tile, x, y, z),
                            Some(expected.voxel_shadowed(x, y, z)),
                            "tile {} voxel ({}, {}, {})", tile, x, y, z
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_many_tiles_merged_exactly_once() {
        let mut tree = VoxelShadowTree::new(config(64, 8, 4), scene(), occluders(), Recorder::default()).unwrap();
        run_to_completion(&mut tree);

        let order = tree.merge_order();
        assert_eq!(order.len(), 64);
        let unique: HashSet<usize> = order.into_iter().collect();
        assert_eq!(unique.len(), 64);

        let roots: HashSet<NodeAddress> = tree.root_addresses().into_iter().collect();
        assert!(!roots.contains(&tree.placeholder_address()));
    }

    #[test]
    fn test_capture_failure_retries_tile() {
        let mut fail_next = true;
        let capture = move |_: &Aabb, resolution: u32| -> Result<DualDepth> {
            if std::mem::take(&mut fail_next) {
                Err(Error::Capture("device lost".into()))
            } else {
                Ok(DualDepth::cleared(resolution))
            }
        };
        let mut tree = VoxelShadowTree::new(config(16, 2, 2), scene(), capture, Recorder::default()).unwrap();

        assert!(matches!(tree.update_build(), Err(Error::Capture(_))));
        assert_eq!(tree.stats().started, 0);

        run_to_completion(&mut tree);
        assert_eq!(tree.stats().merged, 4);
    }

    #[test]
    fn test_wrong_capture_resolution_rejected() {
        let capture = |_: &Aabb, _: u32| -> Result<DualDepth> { Ok(DualDepth::cleared(4)) };
        let mut tree = VoxelShadowTree::new(config(16, 2, 1), scene(), capture, Recorder::default()).unwrap();
        assert!(tree.update_build().is_err());
        assert_eq!(tree.stats().started, 0);
    }

    #[test]
    fn test_drop_mid_build() {
        let mut tree = VoxelShadowTree::new(config(64, 4, 4), scene(), occluders(), Recorder::default()).unwrap();
        for _ in 0..3 {
            tree.update_build().unwrap();
        }
        // Must shut down the merger without waiting for the remaining tiles
        drop(tree);
    }
}
