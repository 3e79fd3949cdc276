//! Background tile builder handle
//!
//! Each started tile gets its own thread running [`TileOctreeBuilder`].
//! The handle exposes the build state as an atomic tag; the local tree may
//! only be read once the state is [`BuildState::Done`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use crate::core::Result;
use crate::voxel::node::{NodeAddress, ShadowNode};
use super::capture::DualDepth;
use super::octree_builder::{TileOctree, TileOctreeBuilder};

/// Build state of a tile builder. Moves from `Building` to `Done` exactly once.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Building = 0,
    Done = 1,
}

/// State shared between the handle and its thread
struct BuildShared {
    state: AtomicU8,
    output: OnceLock<TileOctree>,
}

/// Handle to a tile octree being built on a background thread.
///
/// Dropping a finished handle joins its thread. Dropping an unfinished one
/// detaches the thread, which frees its depth images and output when done.
pub struct TileBuilder {
    tile_index: usize,
    resolution: u32,
    shared: Arc<BuildShared>,
    thread: Option<JoinHandle<()>>,
}

impl TileBuilder {
    /// Start building a tile from its depth capture.
    ///
    /// `on_done` runs on the builder thread right after the state flips to `Done`.
    pub fn spawn<F>(tile_index: usize, depth: DualDepth, on_done: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let resolution = depth.resolution();
        Self::spawn_with(tile_index, resolution, move || TileOctreeBuilder::new(&depth).build(), on_done)
    }

    /// Start a builder running an arbitrary construction job
    pub fn spawn_with<J, F>(tile_index: usize, resolution: u32, job: J, on_done: F) -> Result<Self>
    where
        J: FnOnce() -> TileOctree + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(BuildShared {
            state: AtomicU8::new(BuildState::Building as u8),
            output: OnceLock::new(),
        });
        let worker = Arc::clone(&shared);

        let thread = std::thread::Builder::new()
            .name(format!("shadow-tile-{}", tile_index))
            .spawn(move || {
                let tree = job();
                // Output is written before the state is released as Done
                let _ = worker.output.set(tree);
                worker.state.store(BuildState::Done as u8, Ordering::Release);
                on_done();
            })?;

        Ok(Self {
            tile_index,
            resolution,
            shared,
            thread: Some(thread),
        })
    }

    /// Current build state
    pub fn state(&self) -> BuildState {
        match self.shared.state.load(Ordering::Acquire) {
            0 => BuildState::Building,
            _ => BuildState::Done,
        }
    }

    /// Whether the local tree is ready
    pub fn is_done(&self) -> bool {
        self.state() == BuildState::Done
    }

    /// Tile this builder is working on
    pub fn tile_index(&self) -> usize {
        self.tile_index
    }

    /// Tile resolution
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    fn output(&self) -> Option<&TileOctree> {
        if self.is_done() {
            self.shared.output.get()
        } else {
            None
        }
    }

    /// Local node buffer, once done
    pub fn local_nodes(&self) -> Option<&[ShadowNode]> {
        self.output().map(|tree| tree.nodes.as_slice())
    }

    /// Local node buffer as raw bytes, once done
    pub fn local_node_bytes(&self) -> Option<&[u8]> {
        self.output().map(TileOctree::as_bytes)
    }

    /// Local address of the tile's root node, once done
    pub fn local_root_address(&self) -> Option<NodeAddress> {
        self.output().map(|tree| tree.root)
    }
}

impl Drop for TileBuilder {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            if self.is_done() && thread.join().is_err() {
                log::warn!("Shadow tile {} builder thread panicked", self.tile_index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn wait_done(builder: &TileBuilder) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !builder.is_done() {
            assert!(std::time::Instant::now() < deadline, "builder never finished");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_builds_cleared_tile() {
        let (tx, rx) = mpsc::channel();
        let builder = TileBuilder::spawn(3, DualDepth::cleared(8), move || {
            let _ = tx.send(());
        })
        .unwrap();

        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        wait_done(&builder);

        assert_eq!(builder.tile_index(), 3);
        assert_eq!(builder.resolution(), 8);
        assert_eq!(builder.local_nodes().unwrap().len(), 1);
        assert_eq!(builder.local_root_address(), Some(0));
        assert_eq!(builder.local_node_bytes().unwrap().len(), ShadowNode::SIZE);
    }

    #[test]
    fn test_output_hidden_until_done() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let builder = TileBuilder::spawn_with(
            0,
            8,
            move || {
                let _ = gate_rx.recv();
                TileOctree { nodes: vec![ShadowNode::shadowed()], root: 0 }
            },
            || {},
        )
        .unwrap();

        assert_eq!(builder.state(), BuildState::Building);
        assert!(builder.local_nodes().is_none());
        assert!(builder.local_root_address().is_none());

        gate_tx.send(()).unwrap();
        wait_done(&builder);
        assert_eq!(builder.local_nodes().unwrap()[0], ShadowNode::shadowed());
    }

    #[test]
    fn test_drop_unfinished_detaches() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let builder = TileBuilder::spawn_with(
            0,
            8,
            move || {
                let _ = gate_rx.recv();
                TileOctree { nodes: vec![ShadowNode::unshadowed()], root: 0 }
            },
            || {},
        )
        .unwrap();

        // Must not block on the gated thread
        drop(builder);
        drop(gate_tx);
    }
}
