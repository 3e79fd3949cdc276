//! GPU side of the shadow tree

pub mod context;
pub mod shadow_buffers;

pub use context::HeadlessContext;
pub use shadow_buffers::GpuShadowBuffers;
