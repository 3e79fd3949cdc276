//! Axis-aligned bounding box

use crate::core::types::{Mat4, Vec3};

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Degenerate AABB containing a single point
    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    /// Smallest AABB covering every point, or `None` if the iterator is empty
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let mut aabb = Self::from_point(points.next()?);
        for p in points {
            aabb.expand(p);
        }
        Some(aabb)
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Expand AABB to include point
    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Volume of the overlap with another box (0 if they only touch)
    pub fn overlap_volume(&self, other: &Aabb) -> f32 {
        let extent = (self.max.min(other.max) - self.min.max(other.min)).max(Vec3::ZERO);
        extent.x * extent.y * extent.z
    }

    /// Transform mapping this box onto the unit cube `[0,1]^3`.
    ///
    /// Degenerate (zero-width) axes are mapped with unit extent.
    pub fn unit_transform(&self) -> Mat4 {
        let size = self.size();
        let extent = Vec3::select(size.cmpgt(Vec3::ZERO), size, Vec3::ONE);
        Mat4::from_scale(extent.recip()) * Mat4::from_translation(-self.min)
    }
}
