use criterion::{criterion_group, criterion_main, Criterion, black_box};

use shadow_svo::math::Aabb;
use shadow_svo::shadow::{DepthCapture, DualDepth, OccluderCapture, TileOctreeBuilder};
use shadow_svo::voxel::NodeStore;

use glam::Vec3;

/// Depth capture of a few staggered boxes over a unit tile
fn staggered_boxes(resolution: u32) -> DualDepth {
    let mut capture = OccluderCapture::new(vec![
        Aabb::new(Vec3::new(0.1, 0.1, 0.2), Vec3::new(0.4, 0.6, 0.3)),
        Aabb::new(Vec3::new(0.5, 0.2, 0.5), Vec3::new(0.9, 0.5, 0.7)),
        Aabb::new(Vec3::new(0.3, 0.7, 0.05), Vec3::new(0.8, 0.95, 0.1)),
    ]);
    let bounds = Aabb::new(Vec3::ZERO, Vec3::ONE);
    capture
        .capture_dual_depth(&bounds, resolution)
        .expect("capture of a non-zero resolution")
}

fn bench_tile_build(c: &mut Criterion) {
    for resolution in [32u32, 64, 128] {
        let depth = staggered_boxes(resolution);
        c.bench_function(&format!("tile_build_{}", resolution), |b| {
            b.iter(|| TileOctreeBuilder::new(black_box(&depth)).build());
        });
    }
}

fn bench_capture(c: &mut Criterion) {
    c.bench_function("occluder_capture_128", |b| {
        b.iter(|| staggered_boxes(black_box(128)));
    });
}

fn bench_append_subtree(c: &mut Criterion) {
    let resolution = 64u32;
    let tile = TileOctreeBuilder::new(&staggered_boxes(resolution)).build();

    c.bench_function("append_subtree_64", |b| {
        b.iter(|| {
            let mut store = NodeStore::with_capacity(tile.nodes.len() * 16);
            for _ in 0..16 {
                store
                    .append_subtree(black_box(&tile.nodes), tile.root, resolution)
                    .expect("well-formed tile");
            }
            store
        });
    });
}

criterion_group!(benches, bench_tile_build, bench_capture, bench_append_subtree);
criterion_main!(benches);
