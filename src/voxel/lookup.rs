//! CPU-side traversal of shadow octrees
//!
//! Mirrors the lookup the shading pass performs against the uploaded node
//! buffer; used for verification and CPU queries.

use super::node::{ChildStatus, NodeAddress, ShadowNode};

/// Whether voxel `(x, y, z)` of the tree rooted at `root` is shadowed.
///
/// `depth` is the tree depth, so the tree spans `2^depth` voxels per axis.
/// Returns `None` for out-of-range coordinates or a malformed tree.
pub fn is_shadowed(
    nodes: &[ShadowNode],
    root: NodeAddress,
    depth: u32,
    x: u32,
    y: u32,
    z: u32,
) -> Option<bool> {
    let extent = 1u32.checked_shl(depth)?;
    if x >= extent || y >= extent || z >= extent {
        return None;
    }

    let mut node = nodes.get(root as usize)?;
    for level in (0..depth).rev() {
        let child_idx = (((x >> level) & 1) | (((y >> level) & 1) << 1) | (((z >> level) & 1) << 2)) as u8;
        match node.child(child_idx)? {
            ChildStatus::Unshadowed => return Some(false),
            ChildStatus::Shadowed => return Some(true),
            ChildStatus::Mixed(address) => node = nodes.get(address as usize)?,
        }
    }

    // A mixed child below voxel resolution
    None
}

/// Count the nodes reachable from `root`, or `None` if an address is out of range
pub fn reachable_nodes(nodes: &[ShadowNode], root: NodeAddress) -> Option<usize> {
    let mut count = 0;
    let mut stack = vec![root];
    while let Some(address) = stack.pop() {
        let node = nodes.get(address as usize)?;
        count += 1;
        stack.extend(node.mixed_children().map(|(_, child)| child));
    }
    Some(count)
}
