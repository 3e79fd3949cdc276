//! Dual depth capture for tiles
//!
//! A tile is rasterized twice from the light: once keeping front faces
//! (entry depths) and once keeping back faces (exit depths). Depths are
//! normalized to `[0, 1]` across the tile's extent on the depth axis, with
//! 1.0 meaning nothing was hit.

use rayon::prelude::*;

use crate::core::{Error, Result};
use crate::math::Aabb;

/// Paired entry/exit depth images for one tile, row-major (`y * resolution + x`)
#[derive(Clone, Debug)]
pub struct DualDepth {
    resolution: u32,
    entry: Vec<f32>,
    exit: Vec<f32>,
}

impl DualDepth {
    /// Wrap captured images, checking both are `resolution x resolution`
    pub fn new(resolution: u32, entry: Vec<f32>, exit: Vec<f32>) -> Result<Self> {
        let expected = resolution as usize * resolution as usize;
        if entry.len() != expected || exit.len() != expected {
            return Err(Error::Capture(format!(
                "expected {}x{} depth images, got {} entry and {} exit samples",
                resolution,
                resolution,
                entry.len(),
                exit.len()
            )));
        }
        Ok(Self { resolution, entry, exit })
    }

    /// Images with no geometry in view
    pub fn cleared(resolution: u32) -> Self {
        let len = resolution as usize * resolution as usize;
        Self {
            resolution,
            entry: vec![1.0; len],
            exit: vec![1.0; len],
        }
    }

    /// Width and height of both images
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Front-face depths
    pub fn entry(&self) -> &[f32] {
        &self.entry
    }

    /// Back-face depths
    pub fn exit(&self) -> &[f32] {
        &self.exit
    }

    /// Depth of the first caster surface at a texel.
    ///
    /// Single-sided casters only show up in one of the two passes, so the
    /// nearer of the two is used. Missing or invalid samples read as 1.0.
    pub fn occluder_depth(&self, x: u32, y: u32) -> f32 {
        let i = (y * self.resolution + x) as usize;
        let depth = self.entry[i].min(self.exit[i]);
        if depth.is_nan() { 1.0 } else { depth.clamp(0.0, 1.0) }
    }
}

/// Source of per-tile dual depth images
///
/// Called synchronously on the orchestration thread right before a tile's
/// builder is started.
pub trait DepthCapture {
    /// Render entry/exit depths covering `bounds` (light space) at `resolution`
    fn capture_dual_depth(&mut self, bounds: &Aabb, resolution: u32) -> Result<DualDepth>;
}

impl<F> DepthCapture for F
where
    F: FnMut(&Aabb, u32) -> Result<DualDepth>,
{
    fn capture_dual_depth(&mut self, bounds: &Aabb, resolution: u32) -> Result<DualDepth> {
        self(bounds, resolution)
    }
}

/// CPU depth capture over a set of light-space box casters.
///
/// The depth axis is light-space z; a box's near face gives the entry depth
/// and its far face the exit depth.
#[derive(Clone, Debug, Default)]
pub struct OccluderCapture {
    occluders: Vec<Aabb>,
}

impl OccluderCapture {
    /// Create a capture over the given light-space boxes
    pub fn new(occluders: Vec<Aabb>) -> Self {
        Self { occluders }
    }

    /// Add a caster
    pub fn add_occluder(&mut self, occluder: Aabb) {
        self.occluders.push(occluder);
    }

    /// Light-space casters
    pub fn occluders(&self) -> &[Aabb] {
        &self.occluders
    }

    /// Rasterize one row of both images
    fn capture_row(&self, bounds: &Aabb, resolution: u32, y: u32, entry: &mut [f32], exit: &mut [f32]) {
        let size = bounds.size();
        let depth_range = size.z.max(f32::EPSILON);
        let py = bounds.min.y + (y as f32 + 0.5) / resolution as f32 * size.y;

        for x in 0..resolution {
            let px = bounds.min.x + (x as f32 + 0.5) / resolution as f32 * size.x;
            let mut near = 1.0f32;
            let mut far = 1.0f32;

            // Nearest caster along the light direction wins
            for occluder in &self.occluders {
                if px < occluder.min.x || px > occluder.max.x || py < occluder.min.y || py > occluder.max.y {
                    continue;
                }
                let enter = ((occluder.min.z - bounds.min.z) / depth_range).clamp(0.0, 1.0);
                if enter < near {
                    near = enter;
                    far = ((occluder.max.z - bounds.min.z) / depth_range).clamp(0.0, 1.0);
                }
            }

            entry[x as usize] = near;
            exit[x as usize] = far;
        }
    }
}

impl DepthCapture for OccluderCapture {
    fn capture_dual_depth(&mut self, bounds: &Aabb, resolution: u32) -> Result<DualDepth> {
        if resolution == 0 {
            return Err(Error::Capture("zero capture resolution".into()));
        }
        let row = resolution as usize;
        let mut entry = vec![1.0f32; row * row];
        let mut exit = vec![1.0f32; row * row];

        entry
            .par_chunks_mut(row)
            .zip(exit.par_chunks_mut(row))
            .enumerate()
            .for_each(|(y, (entry_row, exit_row))| {
                self.capture_row(bounds, resolution, y as u32, entry_row, exit_row);
            });

        DualDepth::new(resolution, entry, exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_dual_depth_rejects_wrong_size() {
        assert!(DualDepth::new(4, vec![1.0; 16], vec![1.0; 15]).is_err());
        assert!(DualDepth::new(4, vec![1.0; 16], vec![1.0; 16]).is_ok());
    }

    #[test]
    fn test_occluder_depth_uses_nearer_pass() {
        let depth = DualDepth::new(2, vec![0.8, 1.0, f32::NAN, 0.2], vec![0.3, 1.0, f32::NAN, 0.9]).unwrap();
        assert_eq!(depth.occluder_depth(0, 0), 0.3);
        assert_eq!(depth.occluder_depth(1, 0), 1.0);
        assert_eq!(depth.occluder_depth(0, 1), 1.0);
        assert_eq!(depth.occluder_depth(1, 1), 0.2);
    }

    #[test]
    fn test_occluder_capture_half_covered() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(8.0));
        // Box covering the left half of the tile, from depth 2 to 4
        let mut capture = OccluderCapture::new(vec![Aabb::new(
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(4.0, 8.0, 4.0),
        )]);

        let depth = capture.capture_dual_depth(&bounds, 8).unwrap();
        assert_eq!(depth.resolution(), 8);
        for y in 0..8 {
            for x in 0..8 {
                let i = (y * 8 + x) as usize;
                if x < 4 {
                    assert_eq!(depth.entry()[i], 0.25);
                    assert_eq!(depth.exit()[i], 0.5);
                } else {
                    assert_eq!(depth.entry()[i], 1.0);
                    assert_eq!(depth.exit()[i], 1.0);
                }
            }
        }
    }

    #[test]
    fn test_closure_capture() {
        let mut capture = |_: &Aabb, resolution: u32| -> Result<DualDepth> {
            Ok(DualDepth::cleared(resolution))
        };
        let depth = capture.capture_dual_depth(&Aabb::default(), 8).unwrap();
        assert!(depth.entry().iter().all(|&d| d == 1.0));
    }
}
