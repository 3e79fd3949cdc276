//! Shadow tree build configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Largest supported per-axis tile count; bounds the GPU root address table
pub const MAX_TILE_SUBDIVISIONS: u32 = 8;

/// Maximum number of tiles (`MAX_TILE_SUBDIVISIONS^2`)
pub const MAX_TILES: usize = (MAX_TILE_SUBDIVISIONS * MAX_TILE_SUBDIVISIONS) as usize;

/// Smallest per-tile resolution (leaf masks need at least 8x8)
pub const MIN_TILE_RESOLUTION: u32 = 8;

/// Largest per-tile resolution (maximum depth texture size)
pub const MAX_TILE_RESOLUTION: u32 = 16384;

/// Configuration for building the tiled shadow octree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowTreeConfig {
    /// Overall voxel resolution across the domain on each tiled axis
    pub resolution: u32,
    /// Tiles per axis (`T`); the domain is split into `T x T` tiles
    pub tile_subdivisions: u32,
    /// Maximum number of tile builders in flight (`K`)
    pub concurrent_builds: usize,
}

impl Default for ShadowTreeConfig {
    fn default() -> Self {
        Self {
            resolution: 1024,
            tile_subdivisions: 4,
            concurrent_builds: 4,
        }
    }
}

impl ShadowTreeConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check every constraint on the configuration
    pub fn validate(&self) -> Result<()> {
        if self.tile_subdivisions == 0 || self.tile_subdivisions > MAX_TILE_SUBDIVISIONS {
            return Err(Error::Config(format!(
                "tile_subdivisions must be in 1..={}, got {}",
                MAX_TILE_SUBDIVISIONS, self.tile_subdivisions
            )));
        }
        if self.resolution % self.tile_subdivisions != 0 {
            return Err(Error::Config(format!(
                "resolution {} is not divisible by tile_subdivisions {}",
                self.resolution, self.tile_subdivisions
            )));
        }
        let tile_resolution = self.tile_resolution();
        if !(MIN_TILE_RESOLUTION..=MAX_TILE_RESOLUTION).contains(&tile_resolution) {
            return Err(Error::Config(format!(
                "tile resolution {} outside {}..={}",
                tile_resolution, MIN_TILE_RESOLUTION, MAX_TILE_RESOLUTION
            )));
        }
        if !tile_resolution.is_power_of_two() {
            return Err(Error::Config(format!(
                "tile resolution {} is not a power of 2",
                tile_resolution
            )));
        }
        if self.concurrent_builds == 0 {
            return Err(Error::Config("concurrent_builds must be at least 1".into()));
        }
        Ok(())
    }

    /// Per-tile resolution (voxels per axis within one tile)
    pub fn tile_resolution(&self) -> u32 {
        self.resolution / self.tile_subdivisions.max(1)
    }

    /// Number of tiles (`T * T`)
    pub fn tile_count(&self) -> usize {
        (self.tile_subdivisions * self.tile_subdivisions) as usize
    }

    /// Octree depth of each tile (`log2(tile_resolution)`)
    pub fn tree_depth(&self) -> u32 {
        self.tile_resolution().max(1).ilog2()
    }
}
