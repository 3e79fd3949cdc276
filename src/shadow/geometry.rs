//! Light-space domain bounds and tile partitioning

use std::sync::Arc;

use crate::core::types::{Mat4, Vec3, Vec4};
use crate::math::Aabb;

/// A mesh placed in the world
#[derive(Clone, Debug)]
pub struct MeshInstance {
    /// Model-space vertex positions
    pub vertices: Arc<Vec<Vec3>>,
    /// Model to world transform
    pub local_to_world: Mat4,
}

impl MeshInstance {
    pub fn new(vertices: Arc<Vec<Vec3>>, local_to_world: Mat4) -> Self {
        Self { vertices, local_to_world }
    }
}

/// Shadow-casting geometry and the light's reference frame
#[derive(Clone, Debug)]
pub struct ShadowScene {
    world_to_light: Mat4,
    instances: Vec<MeshInstance>,
}

impl ShadowScene {
    /// Create a scene. Only the rotation of `world_to_light` is used.
    pub fn new(world_to_light: Mat4, instances: Vec<MeshInstance>) -> Self {
        Self {
            world_to_light: strip_translation(world_to_light),
            instances,
        }
    }

    /// Add a mesh instance
    pub fn add_instance(&mut self, instance: MeshInstance) {
        self.instances.push(instance);
    }

    /// World to light rotation (translation removed)
    pub fn world_to_light(&self) -> Mat4 {
        self.world_to_light
    }

    /// Mesh instances
    pub fn instances(&self) -> &[MeshInstance] {
        &self.instances
    }

    /// Light-space bounds of every vertex in the scene, always including
    /// the light-space origin.
    ///
    /// With no geometry the bounds degenerate to the origin.
    pub fn light_space_bounds(&self) -> Aabb {
        let mut bounds = Aabb::from_point(Vec3::ZERO);
        let points = self.instances.iter().flat_map(|instance| {
            let model_to_light = self.world_to_light * instance.local_to_world;
            instance
                .vertices
                .iter()
                .map(move |&v| model_to_light.transform_point3(v))
        });
        for p in points {
            bounds.expand(p);
        }
        bounds
    }

    /// World space to voxel coordinates.
    ///
    /// Maps the light-space bounds onto `[0, voxels.x] x [0, voxels.y] x [0, voxels.z]`.
    pub fn world_to_voxels(&self, voxels: Vec3) -> Mat4 {
        Mat4::from_scale(voxels) * self.light_space_bounds().unit_transform() * self.world_to_light
    }
}

fn strip_translation(m: Mat4) -> Mat4 {
    let mut m = m;
    m.w_axis = Vec4::new(0.0, 0.0, 0.0, m.w_axis.w);
    m
}

/// Even `T x T` split of a domain over its x and y axes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    subdivisions: u32,
}

impl TileGrid {
    pub fn new(subdivisions: u32) -> Self {
        assert!(subdivisions > 0, "Tile grid needs at least one subdivision");
        Self { subdivisions }
    }

    /// Tiles per axis
    pub fn subdivisions(&self) -> u32 {
        self.subdivisions
    }

    /// Total tile count
    pub fn tile_count(&self) -> usize {
        (self.subdivisions * self.subdivisions) as usize
    }

    /// Grid cell `(x, y)` of a tile index
    pub fn tile_coords(&self, tile_index: usize) -> (u32, u32) {
        let index = tile_index as u32;
        (index / self.subdivisions, index % self.subdivisions)
    }

    /// Bounds of a tile within `domain`.
    ///
    /// x and y cover one grid cell; z spans the whole domain.
    pub fn tile_bounds(&self, domain: &Aabb, tile_index: usize) -> Aabb {
        debug_assert!(tile_index < self.tile_count());
        let (x, y) = self.tile_coords(tile_index);
        let n = self.subdivisions as f32;

        // Edges are computed per grid line so neighbours share them exactly
        let edge = |cell: u32, min: f32, max: f32| {
            if cell == self.subdivisions {
                max
            } else {
                min + (max - min) * cell as f32 / n
            }
        };
        let min = Vec3::new(
            edge(x, domain.min.x, domain.max.x),
            edge(y, domain.min.y, domain.max.y),
            domain.min.z,
        );
        let max = Vec3::new(
            edge(x + 1, domain.min.x, domain.max.x),
            edge(y + 1, domain.min.y, domain.max.y),
            domain.max.z,
        );
        Aabb::new(min, max)
    }
}
