//! Shadow octree construction from a tile's dual depth capture

use crate::voxel::node::{ChildStatus, NodeAddress, ShadowNode};
use super::capture::DualDepth;

/// Standalone octree for one tile, addressed locally
#[derive(Clone, Debug)]
pub struct TileOctree {
    /// Local node buffer; the root is the last node
    pub nodes: Vec<ShadowNode>,
    /// Local address of the root node
    pub root: NodeAddress,
}

impl TileOctree {
    /// Raw bytes of the local node buffer
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }
}

/// Classification of a cubic voxel region
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Region {
    Unshadowed,
    Shadowed,
    Mixed,
}

/// Min/max occluder depth pyramid over the tile's texels.
///
/// Level `l` has `(resolution >> l)^2` cells, each the min/max of the
/// 2x2 block below it.
struct DepthPyramid {
    levels: Vec<Vec<(f32, f32)>>,
    resolution: u32,
}

impl DepthPyramid {
    fn new(depth: &DualDepth) -> Self {
        let resolution = depth.resolution();
        let mut base = Vec::with_capacity((resolution * resolution) as usize);
        for y in 0..resolution {
            for x in 0..resolution {
                let d = depth.occluder_depth(x, y);
                base.push((d, d));
            }
        }

        let mut levels = vec![base];
        let mut size = resolution;
        while size > 1 {
            let half = size / 2;
            let prev = &levels[levels.len() - 1];
            let mut next = Vec::with_capacity((half * half) as usize);
            for y in 0..half {
                for x in 0..half {
                    let mut lo = f32::INFINITY;
                    let mut hi = f32::NEG_INFINITY;
                    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        let (cell_lo, cell_hi) = prev[((2 * y + dy) * size + 2 * x + dx) as usize];
                        lo = lo.min(cell_lo);
                        hi = hi.max(cell_hi);
                    }
                    next.push((lo, hi));
                }
            }
            levels.push(next);
            size = half;
        }

        Self { levels, resolution }
    }

    /// Min/max occluder depth over the `size`-wide texel square at (x, y)
    fn range(&self, x: u32, y: u32, size: u32) -> (f32, f32) {
        let level = size.ilog2() as usize;
        let width = self.resolution >> level;
        self.levels[level][((y >> level) * width + (x >> level)) as usize]
    }
}

/// Builds a tile's shadow octree from its dual depth images.
///
/// Voxel `(x, y, z)` of a tile with resolution `r` is shadowed when its
/// center depth `(z + 0.5) / r` lies behind the occluder depth of texel
/// `(x, y)`. Children are written before parents, so the root is the
/// last node of the output.
pub struct TileOctreeBuilder {
    resolution: u32,
    pyramid: DepthPyramid,
}

impl TileOctreeBuilder {
    /// Create a builder for a capture. Resolution must be a power of 2 and at least 2
    pub fn new(depth: &DualDepth) -> Self {
        let resolution = depth.resolution();
        assert!(resolution.is_power_of_two() && resolution >= 2, "Tile resolution must be a power of 2 >= 2");
        Self {
            resolution,
            pyramid: DepthPyramid::new(depth),
        }
    }

    /// Octree depth (levels below the root down to single voxels)
    pub fn depth(&self) -> u32 {
        self.resolution.ilog2()
    }

    /// Build the tile's octree
    pub fn build(&self) -> TileOctree {
        let mut nodes = Vec::with_capacity(64);
        let root = self.build_node(&mut nodes, 0, 0, 0, self.resolution);
        TileOctree { nodes, root }
    }

    /// Whether a single voxel is shadowed
    pub fn voxel_shadowed(&self, x: u32, y: u32, z: u32) -> bool {
        self.classify(x, y, z, 1) == Region::Shadowed
    }

    fn classify(&self, x: u32, y: u32, z: u32, size: u32) -> Region {
        let (lo, hi) = self.pyramid.range(x, y, size);
        let r = self.resolution as f32;
        let nearest = (z as f32 + 0.5) / r;
        let farthest = ((z + size) as f32 - 0.5) / r;

        if farthest <= lo {
            Region::Unshadowed
        } else if nearest > hi {
            Region::Shadowed
        } else {
            Region::Mixed
        }
    }

    fn build_node(&self, nodes: &mut Vec<ShadowNode>, x: u32, y: u32, z: u32, size: u32) -> NodeAddress {
        let half = size / 2;
        let mut node = ShadowNode::unshadowed();

        for child_idx in 0..8u8 {
            let cx = x + if child_idx & 1 != 0 { half } else { 0 };
            let cy = y + if child_idx & 2 != 0 { half } else { 0 };
            let cz = z + if child_idx & 4 != 0 { half } else { 0 };

            let status = match self.classify(cx, cy, cz, half) {
                Region::Unshadowed => ChildStatus::Unshadowed,
                Region::Shadowed => ChildStatus::Shadowed,
                Region::Mixed => ChildStatus::Mixed(self.build_node(nodes, cx, cy, cz, half)),
            };
            node.set_child(child_idx, status);
        }

        // meta[0]: log2 of the node's extent in voxels
        node.meta = [size.ilog2(), 0];
        let address = nodes.len() as NodeAddress;
        nodes.push(node);
        address
    }
}
