//! GPU buffers holding the published shadow tree

use crate::shadow::publisher::{ShadowConsumer, VoxelsUniform};
use crate::voxel::node::ShadowNode;

/// Smallest node buffer; a bound storage buffer cannot be empty
const MIN_NODE_CAPACITY: u64 = 64;

/// Uniform block plus node storage buffer, bound together for the shading pass.
///
/// The node buffer grows to the next power of two when a snapshot no longer
/// fits; the bind group is rebuilt whenever that happens, so callers should
/// fetch it with [`GpuShadowBuffers::bind_group`] each frame.
pub struct GpuShadowBuffers {
    device: wgpu::Device,
    queue: wgpu::Queue,
    uniform_buffer: wgpu::Buffer,
    node_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    /// Bytes the node buffer can hold
    node_capacity: u64,
    /// Bytes written by the last node upload
    used_bytes: u64,
}

impl GpuShadowBuffers {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("voxel_shadow_uniforms"),
            size: std::mem::size_of::<VoxelsUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let node_capacity = MIN_NODE_CAPACITY * ShadowNode::SIZE as u64;
        let node_buffer = create_node_buffer(device, node_capacity);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxel_shadow_bind_group_layout"),
            entries: &[
                // binding 0: VoxelsUniform
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // binding 1: shadow nodes
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = create_bind_group(device, &bind_group_layout, &uniform_buffer, &node_buffer);

        Self {
            device: device.clone(),
            queue: queue.clone(),
            uniform_buffer,
            node_buffer,
            bind_group_layout,
            bind_group,
            node_capacity,
            used_bytes: 0,
        }
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// Node buffer capacity in bytes
    pub fn node_capacity(&self) -> u64 {
        self.node_capacity
    }

    /// Bytes of node data currently on the GPU
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    fn ensure_node_capacity(&mut self, bytes: u64) {
        if bytes <= self.node_capacity {
            return;
        }
        let capacity = bytes.next_power_of_two();
        if capacity > 512 * 1024 * 1024 {
            log::warn!("Shadow node buffer size: {}MB - ensure device limits are sufficient", capacity / 1024 / 1024);
        }
        log::debug!("Growing shadow node buffer {} KB -> {} KB", self.node_capacity / 1024, capacity / 1024);

        self.node_buffer = create_node_buffer(&self.device, capacity);
        self.bind_group = create_bind_group(&self.device, &self.bind_group_layout, &self.uniform_buffer, &self.node_buffer);
        self.node_capacity = capacity;
    }
}

impl ShadowConsumer for GpuShadowBuffers {
    fn upload_uniforms(&mut self, uniforms: &VoxelsUniform) {
        self.queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
    }

    fn upload_nodes(&mut self, nodes: &[u8]) {
        let bytes = nodes.len() as u64;
        self.ensure_node_capacity(bytes);
        if bytes > 0 {
            self.queue.write_buffer(&self.node_buffer, 0, nodes);
        }
        self.used_bytes = bytes;
    }
}

fn create_node_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("voxel_shadow_nodes"),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniform_buffer: &wgpu::Buffer,
    node_buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("voxel_shadow_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: node_buffer.as_entire_binding(),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::context::HeadlessContext;

    fn context() -> HeadlessContext {
        HeadlessContext::new().expect("Failed to create headless GPU context")
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_node_buffer_grows_to_power_of_two() {
        let ctx = context();
        let mut buffers = GpuShadowBuffers::new(&ctx.device, &ctx.queue);
        assert_eq!(buffers.node_capacity(), MIN_NODE_CAPACITY * ShadowNode::SIZE as u64);

        let nodes = vec![ShadowNode::unshadowed(); 100];
        buffers.upload_nodes(bytemuck::cast_slice(&nodes));
        assert_eq!(buffers.used_bytes(), 100 * ShadowNode::SIZE as u64);
        assert_eq!(buffers.node_capacity(), (100 * ShadowNode::SIZE as u64).next_power_of_two());

        // Shrinking snapshots keep the larger buffer
        buffers.upload_nodes(bytemuck::cast_slice(&nodes[..1]));
        assert_eq!(buffers.used_bytes(), ShadowNode::SIZE as u64);
        assert_eq!(buffers.node_capacity(), (100 * ShadowNode::SIZE as u64).next_power_of_two());
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_uniform_upload() {
        let ctx = context();
        let mut buffers = GpuShadowBuffers::new(&ctx.device, &ctx.queue);
        buffers.upload_uniforms(&VoxelsUniform::new(glam::Mat4::IDENTITY, 4, 2, &[0; 4]));
        ctx.queue.submit(std::iter::empty());
    }
}
