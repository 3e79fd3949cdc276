//! Merged shadow tree state shared by the merger and the publisher

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::{Error, Result};
use crate::voxel::node::NodeAddress;
use crate::voxel::store::NodeStore;

/// Fixed-size table of per-tile root addresses.
///
/// Entries are written by the merger with release ordering and read with
/// acquire ordering, so a reader that sees a root also sees the append
/// that produced it.
pub struct RootTable {
    roots: Box<[AtomicU32]>,
}

impl RootTable {
    /// Table of `tile_count` entries, all pointing at `placeholder`
    pub fn new(tile_count: usize, placeholder: NodeAddress) -> Self {
        Self {
            roots: (0..tile_count).map(|_| AtomicU32::new(placeholder)).collect(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Root address of a tile
    pub fn get(&self, tile_index: usize) -> Option<NodeAddress> {
        self.roots.get(tile_index).map(|root| root.load(Ordering::Acquire))
    }

    /// Point a tile at a new root
    pub fn set(&self, tile_index: usize, root: NodeAddress) -> Result<()> {
        let entry = self.roots.get(tile_index).ok_or_else(|| {
            Error::Tile(format!(
                "tile index {} outside root table of {} entries",
                tile_index,
                self.roots.len()
            ))
        })?;
        entry.store(root, Ordering::Release);
        Ok(())
    }

    /// Copy of every entry
    pub fn snapshot(&self) -> Vec<NodeAddress> {
        self.roots.iter().map(|root| root.load(Ordering::Acquire)).collect()
    }
}

/// The shared node store plus the per-tile root table
pub struct MergedTree {
    store: RwLock<NodeStore>,
    roots: RootTable,
    placeholder: NodeAddress,
    tile_resolution: u32,
}

impl MergedTree {
    /// Wrap a store that already holds the placeholder node
    pub fn new(store: NodeStore, placeholder: NodeAddress, tile_count: usize, tile_resolution: u32) -> Self {
        debug_assert!(store.node(placeholder).is_some());
        Self {
            store: RwLock::new(store),
            roots: RootTable::new(tile_count, placeholder),
            placeholder,
            tile_resolution,
        }
    }

    /// Read access to the node store
    pub fn store(&self) -> RwLockReadGuard<'_, NodeStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the node store (merger thread only)
    pub(crate) fn store_mut(&self) -> RwLockWriteGuard<'_, NodeStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Per-tile root addresses
    pub fn roots(&self) -> &RootTable {
        &self.roots
    }

    /// Address of the fully unshadowed placeholder root
    pub fn placeholder(&self) -> NodeAddress {
        self.placeholder
    }

    /// Per-tile resolution
    pub fn tile_resolution(&self) -> u32 {
        self.tile_resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::node::ShadowNode;

    #[test]
    fn test_root_table_defaults_to_placeholder() {
        let table = RootTable::new(4, 7);
        assert_eq!(table.len(), 4);
        assert_eq!(table.snapshot(), vec![7; 4]);
    }

    #[test]
    fn test_root_table_bounds_checked() {
        let table = RootTable::new(4, 0);
        assert!(table.set(3, 9).is_ok());
        assert_eq!(table.get(3), Some(9));
        assert!(matches!(table.set(4, 9), Err(Error::Tile(_))));
        assert_eq!(table.get(4), None);
    }

    #[test]
    fn test_merged_tree_store_access() {
        let mut store = NodeStore::new();
        let placeholder = store.write_node(ShadowNode::unshadowed(), 0, 0);
        let tree = MergedTree::new(store, placeholder, 4, 8);

        tree.store_mut().write_node(ShadowNode::shadowed(), 0, 0);
        assert_eq!(tree.store().node_count(), 2);
        assert_eq!(tree.roots().get(0), Some(placeholder));
        assert_eq!(tree.tile_resolution(), 8);
    }
}
