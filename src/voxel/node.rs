//! Shadow octree node

use bytemuck::{Pod, Zeroable};

/// Address of a node in a node buffer, in units of whole nodes.
///
/// Addresses produced by a tile builder are local to that builder's buffer
/// and only become meaningful in the shared store once the merger has
/// translated them.
pub type NodeAddress = u32;

/// Child mask with all eight children fully unshadowed (`01` per child)
pub const UNSHADOWED_MASK: u32 = 0x5555;

/// Child mask with all eight children fully shadowed (`10` per child)
pub const SHADOWED_MASK: u32 = 0xAAAA;

/// Shadow status of one octant of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChildStatus {
    /// Every voxel in the octant is lit
    Unshadowed,
    /// Every voxel in the octant is in shadow
    Shadowed,
    /// Partially shadowed; the octant is described by the node at this address
    Mixed(NodeAddress),
}

impl ChildStatus {
    const BITS_UNSHADOWED: u32 = 0b01;
    const BITS_SHADOWED: u32 = 0b10;
    const BITS_MIXED: u32 = 0b11;

    fn bits(self) -> u32 {
        match self {
            ChildStatus::Unshadowed => Self::BITS_UNSHADOWED,
            ChildStatus::Shadowed => Self::BITS_SHADOWED,
            ChildStatus::Mixed(_) => Self::BITS_MIXED,
        }
    }
}

/// Octree node - 48 bytes, read as a flat array of `u32` words on the GPU
///
/// Layout:
/// - child_mask (4 bytes): 2 bits per child, child `i` at bits `2i..2i+2`
///   (`01` unshadowed, `10` shadowed, `11` mixed, `00` unused)
/// - meta (8 bytes): two free metadata words supplied when the node is written
/// - padding (4 bytes)
/// - children (32 bytes): address of each mixed child, 0 otherwise
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ShadowNode {
    /// Packed 2-bit status per child
    pub child_mask: u32,
    /// Metadata words
    pub meta: [u32; 2],
    _padding: u32,
    /// Child node addresses, only valid for mixed children
    pub children: [NodeAddress; 8],
}

impl ShadowNode {
    /// Size of one node in bytes
    pub const SIZE: usize = std::mem::size_of::<ShadowNode>();

    /// Node whose eight children are all fully unshadowed
    pub const fn unshadowed() -> Self {
        Self {
            child_mask: UNSHADOWED_MASK,
            meta: [0; 2],
            _padding: 0,
            children: [0; 8],
        }
    }

    /// Node whose eight children are all fully shadowed
    pub const fn shadowed() -> Self {
        Self {
            child_mask: SHADOWED_MASK,
            meta: [0; 2],
            _padding: 0,
            children: [0; 8],
        }
    }

    /// Build a node from per-child statuses
    pub fn from_children(statuses: [ChildStatus; 8]) -> Self {
        let mut node = Self::zeroed();
        for (index, status) in statuses.into_iter().enumerate() {
            node.set_child(index as u8, status);
        }
        node
    }

    /// Raw 2-bit field of a child
    fn child_bits(&self, index: u8) -> u32 {
        debug_assert!(index < 8);
        (self.child_mask >> (index * 2)) & 0b11
    }

    /// Status of child at index, or `None` if the field holds the unused `00` code
    pub fn child(&self, index: u8) -> Option<ChildStatus> {
        match self.child_bits(index) {
            ChildStatus::BITS_UNSHADOWED => Some(ChildStatus::Unshadowed),
            ChildStatus::BITS_SHADOWED => Some(ChildStatus::Shadowed),
            ChildStatus::BITS_MIXED => Some(ChildStatus::Mixed(self.children[index as usize])),
            _ => None,
        }
    }

    /// Set status of child at index
    pub fn set_child(&mut self, index: u8, status: ChildStatus) {
        debug_assert!(index < 8);
        let shift = index * 2;
        self.child_mask = (self.child_mask & !(0b11u32 << shift)) | (status.bits() << shift);
        self.children[index as usize] = match status {
            ChildStatus::Mixed(address) => address,
            _ => 0,
        };
    }

    /// Whether child at index points at a subtree
    pub fn is_child_mixed(&self, index: u8) -> bool {
        self.child_bits(index) == ChildStatus::BITS_MIXED
    }

    /// Iterate over `(child index, address)` of every mixed child
    pub fn mixed_children(&self) -> impl Iterator<Item = (u8, NodeAddress)> + '_ {
        (0..8u8)
            .filter(|&i| self.is_child_mixed(i))
            .map(|i| (i, self.children[i as usize]))
    }

    /// Number of mixed children
    pub fn mixed_count(&self) -> u32 {
        (0..8u8).filter(|&i| self.is_child_mixed(i)).count() as u32
    }

    /// Whether all eight child fields hold a valid status
    pub fn is_well_formed(&self) -> bool {
        (0..8u8).all(|i| self.child_bits(i) != 0)
    }
}

impl Default for ShadowNode {
    fn default() -> Self {
        Self::unshadowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size() {
        assert_eq!(ShadowNode::SIZE, 48);
        assert_eq!(ShadowNode::SIZE % 16, 0);
    }

    #[test]
    fn test_unshadowed_mask() {
        let node = ShadowNode::unshadowed();
        assert_eq!(node.child_mask, 21845);
        for i in 0..8 {
            assert_eq!(node.child(i), Some(ChildStatus::Unshadowed));
        }
        assert!(node.is_well_formed());
    }

    #[test]
    fn test_set_child() {
        let mut node = ShadowNode::unshadowed();
        node.set_child(2, ChildStatus::Shadowed);
        node.set_child(5, ChildStatus::Mixed(42));

        assert_eq!(node.child(0), Some(ChildStatus::Unshadowed));
        assert_eq!(node.child(2), Some(ChildStatus::Shadowed));
        assert_eq!(node.child(5), Some(ChildStatus::Mixed(42)));
        assert_eq!(node.mixed_count(), 1);
        assert_eq!(node.mixed_children().collect::<Vec<_>>(), vec![(5, 42)]);

        // Overwriting a mixed child clears its address
        node.set_child(5, ChildStatus::Unshadowed);
        assert_eq!(node.children[5], 0);
        assert_eq!(node.mixed_count(), 0);
    }

    #[test]
    fn test_zeroed_is_not_well_formed() {
        let node = ShadowNode::zeroed();
        assert!(!node.is_well_formed());
        assert_eq!(node.child(0), None);
    }
}
