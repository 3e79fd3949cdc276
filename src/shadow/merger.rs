//! Merger thread: appends finished tile octrees into the shared store

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::core::{Error, Result};
use crate::voxel::node::NodeAddress;
use super::merged::MergedTree;
use super::registry::TileRegistry;
use super::worker::TileBuilder;

/// Sole writer of the merged tree.
///
/// Waits for finished builders, copies each local tree into the store,
/// points the tile's root entry at the copy, and retires the builder.
pub struct TileMerger {
    registry: Arc<TileRegistry>,
    tree: Arc<MergedTree>,
}

impl TileMerger {
    pub fn new(registry: Arc<TileRegistry>, tree: Arc<MergedTree>) -> Self {
        Self { registry, tree }
    }

    /// Run the merge loop on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name("shadow-merger".into())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Merge until every tile is in or the registry shuts down
    pub fn run(self) {
        while !self.registry.is_complete() {
            let Some(builder) = self.registry.take_finished() else {
                log::debug!("Shadow merger stopping with {} tiles merged", self.registry.merged());
                return;
            };
            self.merge(builder);
        }
        log::info!("All {} shadow tiles merged", self.registry.tile_count());
    }

    /// Merge one finished builder. Each tile is counted exactly once; a tile
    /// whose tree cannot be appended keeps the placeholder root.
    fn merge(&self, builder: TileBuilder) {
        let tile = builder.tile_index();
        let root = match self.append(&builder) {
            Ok(root) => root,
            Err(e) => {
                log::warn!("Shadow tile {} kept placeholder root: {}", tile, e);
                self.tree.placeholder()
            }
        };

        if let Err(e) = self.tree.roots().set(tile, root) {
            log::error!("Shadow tile {} root not stored: {}", tile, e);
        }
        drop(builder);

        self.registry.record_merge(tile);
        log::info!(
            "Merged shadow tile {} ({}/{}), root at {}",
            tile,
            self.registry.merged(),
            self.registry.tile_count(),
            root
        );
    }

    fn append(&self, builder: &TileBuilder) -> Result<NodeAddress> {
        let (Some(nodes), Some(local_root)) = (builder.local_nodes(), builder.local_root_address()) else {
            return Err(Error::Tile("builder finished without output".into()));
        };
        let mut store = self.tree.store_mut();
        store.append_subtree(nodes, local_root, self.tree.tile_resolution())
    }
}
