//! Append-only node store backing the merged shadow tree

use crate::core::{Error, Result};
use super::node::{ChildStatus, NodeAddress, ShadowNode};

/// Shared, append-only buffer of shadow octree nodes.
///
/// Nodes are never moved or rewritten once appended, so an address handed
/// out by [`NodeStore::write_node`] or [`NodeStore::append_subtree`] stays
/// valid for the lifetime of the store.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: Vec<ShadowNode>,
}

impl NodeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Create a store with pre-allocated capacity (in nodes)
    pub fn with_capacity(capacity: usize) -> Self {
        Self { nodes: Vec::with_capacity(capacity) }
    }

    /// Append a single node with the given metadata words and return its address
    pub fn write_node(&mut self, node: ShadowNode, meta_a: u32, meta_b: u32) -> NodeAddress {
        let address = self.nodes.len() as NodeAddress;
        let mut node = node;
        node.meta = [meta_a, meta_b];
        self.nodes.push(node);
        address
    }

    /// Copy a tile's local tree into the store.
    ///
    /// Every node reachable from `local_root` is appended and each mixed
    /// child address is rewritten into the store's address space. Nodes in
    /// `local` that are not reachable are skipped. Children are appended
    /// before their parents, so the returned root address is the last node
    /// written.
    ///
    /// `resolution` is the tile resolution; a tree deeper than
    /// `log2(resolution)` is rejected. On error the store is left unchanged.
    pub fn append_subtree(
        &mut self,
        local: &[ShadowNode],
        local_root: NodeAddress,
        resolution: u32,
    ) -> Result<NodeAddress> {
        if local_root as usize >= local.len() {
            return Err(Error::Tile(format!(
                "local root {} outside buffer of {} nodes",
                local_root,
                local.len()
            )));
        }
        let max_depth = resolution.max(1).ilog2();

        // Post-order walk: (local address, depth, children visited)
        let base = self.nodes.len();
        let mut translated: Vec<Option<NodeAddress>> = vec![None; local.len()];
        // Levels from each translated node down to its deepest descendant.
        // Shared nodes are translated once, so depth is bounded via heights.
        let mut heights: Vec<u32> = vec![0; local.len()];
        let mut stack: Vec<(NodeAddress, u32, bool)> = vec![(local_root, 0, false)];

        while let Some((address, depth, expanded)) = stack.pop() {
            if translated[address as usize].is_some() {
                continue;
            }
            let node = &local[address as usize];

            if !expanded {
                if depth >= max_depth {
                    self.nodes.truncate(base);
                    return Err(Error::Tile(format!(
                        "tree deeper than {} levels at local node {}",
                        max_depth, address
                    )));
                }
                stack.push((address, depth, true));
                for (_, child) in node.mixed_children() {
                    if child as usize >= local.len() {
                        self.nodes.truncate(base);
                        return Err(Error::Tile(format!(
                            "local node {} references child {} outside buffer of {} nodes",
                            address,
                            child,
                            local.len()
                        )));
                    }
                    if translated[child as usize].is_none() {
                        stack.push((child, depth + 1, false));
                    }
                }
                continue;
            }

            let mut copy = *node;
            let mut height = 1;
            for index in 0..8u8 {
                if let Some(ChildStatus::Mixed(child)) = node.child(index) {
                    // Only an ancestor still waiting on its own second visit
                    // can be untranslated here
                    let Some(global) = translated[child as usize] else {
                        self.nodes.truncate(base);
                        return Err(Error::Tile(format!(
                            "cycle through local node {}",
                            child
                        )));
                    };
                    copy.set_child(index, ChildStatus::Mixed(global));
                    height = height.max(heights[child as usize] + 1);
                }
            }
            if depth + height > max_depth {
                self.nodes.truncate(base);
                return Err(Error::Tile(format!(
                    "tree deeper than {} levels below local node {}",
                    max_depth, address
                )));
            }
            heights[address as usize] = height;
            translated[address as usize] = Some(self.nodes.len() as NodeAddress);
            self.nodes.push(copy);
        }

        Ok(translated[local_root as usize].unwrap_or(base as NodeAddress))
    }

    /// Get node by address
    pub fn node(&self, address: NodeAddress) -> Option<&ShadowNode> {
        self.nodes.get(address as usize)
    }

    /// All nodes (for CPU-side traversal)
    pub fn nodes(&self) -> &[ShadowNode] {
        &self.nodes
    }

    /// Raw bytes of the whole store (for GPU upload)
    pub fn data(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    /// Size of [`NodeStore::data`] in bytes
    pub fn data_size_bytes(&self) -> usize {
        self.nodes.len() * ShadowNode::SIZE
    }

    /// Number of nodes written so far
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
