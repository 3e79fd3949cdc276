//! Shadow SVO - tiled, incrementally built shadow octrees for GPU shading

pub mod core;
pub mod math;
pub mod voxel;
pub mod shadow;
pub mod render;
