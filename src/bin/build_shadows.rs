//! Headless shadow tree builder.
//!
//! Usage: cargo run --release --bin build_shadows -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>      JSON build config (default: built-in defaults)
//!   --resolution <N>     Override the overall voxel resolution
//!   --subdivisions <T>   Override tiles per axis
//!   --jobs <K>           Override concurrent tile builds
//!   --frame-ms <MS>      Frame interval between build ticks (default: 16)
//!   --gpu                Upload snapshots to a headless wgpu device

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{Mat4, Quat, Vec3};

use shadow_svo::core::Result;
use shadow_svo::math::Aabb;
use shadow_svo::render::{GpuShadowBuffers, HeadlessContext};
use shadow_svo::shadow::{
    MeshInstance, OccluderCapture, ShadowConsumer, ShadowScene, ShadowTreeConfig, VoxelShadowTree, VoxelsUniform,
};

/// Consumer that only logs what would be uploaded
#[derive(Default)]
struct LogConsumer {
    uploads: usize,
    bytes: usize,
}

impl ShadowConsumer for LogConsumer {
    fn upload_uniforms(&mut self, uniforms: &VoxelsUniform) {
        log::debug!(
            "Uniforms: tree height {}, {} tiles per axis",
            uniforms.tree_height,
            uniforms.tile_subdivisions
        );
    }

    fn upload_nodes(&mut self, nodes: &[u8]) {
        self.uploads += 1;
        self.bytes = nodes.len();
    }
}

fn main() {
    shadow_svo::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args) {
        log::error!("Shadow build failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let mut config = match parse_str_arg(args, "--config") {
        Some(path) => ShadowTreeConfig::load(&PathBuf::from(path))?,
        None => ShadowTreeConfig::default(),
    };
    if let Some(resolution) = parse_u32_arg(args, "--resolution") {
        config.resolution = resolution;
    }
    if let Some(subdivisions) = parse_u32_arg(args, "--subdivisions") {
        config.tile_subdivisions = subdivisions;
    }
    if let Some(jobs) = parse_usize_arg(args, "--jobs") {
        config.concurrent_builds = jobs;
    }
    let frame = Duration::from_millis(parse_u32_arg(args, "--frame-ms").unwrap_or(16) as u64);

    println!("=== Shadow SVO Builder ===");
    println!("Resolution:   {}", config.resolution);
    println!("Tiles:        {0} x {0}", config.tile_subdivisions);
    println!("Concurrency:  {}", config.concurrent_builds);
    println!();

    let (scene, occluders) = demo_scene();

    if args.iter().any(|a| a == "--gpu") {
        let ctx = HeadlessContext::new()?;
        let buffers = GpuShadowBuffers::new(&ctx.device, &ctx.queue);
        let tree = drive(VoxelShadowTree::new(config, scene, occluders, buffers)?, frame)?;
        println!(
            "GPU node buffer: {} KB used of {} KB",
            tree.consumer().used_bytes() / 1024,
            tree.consumer().node_capacity() / 1024
        );
    } else {
        let tree = drive(VoxelShadowTree::new(config, scene, occluders, LogConsumer::default())?, frame)?;
        println!(
            "Published {} snapshots, final node data {} KB",
            tree.consumer().uploads,
            tree.consumer().bytes / 1024
        );
    }
    Ok(())
}

/// Tick the build at a fixed frame interval until every tile is merged and on the GPU
fn drive<C: ShadowConsumer>(
    mut tree: VoxelShadowTree<OccluderCapture, C>,
    frame: Duration,
) -> Result<VoxelShadowTree<OccluderCapture, C>> {
    let start = Instant::now();
    let mut frames = 0u64;
    let mut last_merged = 0;

    loop {
        tree.update_build()?;
        frames += 1;

        let stats = tree.stats();
        if stats.merged != last_merged {
            last_merged = stats.merged;
            log::info!(
                "Frame {}: {}/{} tiles merged, {} in flight, {} nodes",
                frames,
                stats.merged,
                stats.tile_count,
                stats.in_flight,
                stats.node_count
            );
        }
        if tree.is_complete() && stats.on_gpu == stats.tile_count {
            break;
        }
        std::thread::sleep(frame);
    }

    let stats = tree.stats();
    println!();
    println!("Done in {:.2}s over {} frames", start.elapsed().as_secs_f64(), frames);
    println!("Merge order: {:?}", tree.merge_order());
    println!("Nodes:       {}", stats.node_count);
    Ok(tree)
}

/// A ground slab with a few boxes standing on it, lit from above at an angle.
///
/// Occluders are handed to the capture in light space, matching the scene's
/// light frame.
fn demo_scene() -> (ShadowScene, OccluderCapture) {
    let cube = Arc::new(unit_cube());
    let world_boxes = [
        (Vec3::new(0.0, -0.5, 0.0), Vec3::new(40.0, 1.0, 40.0)),
        (Vec3::new(-8.0, 3.0, -6.0), Vec3::new(4.0, 6.0, 4.0)),
        (Vec3::new(6.0, 5.0, 4.0), Vec3::new(3.0, 10.0, 3.0)),
        (Vec3::new(2.0, 1.5, -10.0), Vec3::new(8.0, 3.0, 2.0)),
        (Vec3::new(-10.0, 8.0, 10.0), Vec3::new(2.0, 2.0, 2.0)),
    ];

    let light_rotation = Quat::from_rotation_x(-std::f32::consts::FRAC_PI_3) * Quat::from_rotation_y(0.4);
    let world_to_light = Mat4::from_quat(light_rotation);

    let instances: Vec<MeshInstance> = world_boxes
        .iter()
        .map(|&(center, size)| {
            MeshInstance::new(Arc::clone(&cube), Mat4::from_scale_rotation_translation(size, Quat::IDENTITY, center))
        })
        .collect();

    let occluders = instances
        .iter()
        .filter_map(|instance| {
            let model_to_light = world_to_light * instance.local_to_world;
            Aabb::from_points(instance.vertices.iter().map(|&v| model_to_light.transform_point3(v)))
        })
        .collect();

    (ShadowScene::new(world_to_light, instances), OccluderCapture::new(occluders))
}

fn unit_cube() -> Vec<Vec3> {
    (0..8)
        .map(|i| {
            Vec3::new(
                if i & 1 != 0 { 0.5 } else { -0.5 },
                if i & 2 != 0 { 0.5 } else { -0.5 },
                if i & 4 != 0 { 0.5 } else { -0.5 },
            )
        })
        .collect()
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
