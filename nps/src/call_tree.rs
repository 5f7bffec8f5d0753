//! The compact call tree format.
//!
//! Each thread of a CPU snapshot stores its call tree in a buffer of its own.
//! Nodes do not nest inline: a node lists the absolute offsets of its children
//! within that buffer, and the root is at offset 0.
//!
//! Each node consists of:
//!
//! ```ignore
//!    method id      u16        Index into the method table of the snapshot
//!    calls          u32        Number of invocations
//!    time 0         u40        Total time (wall clock)
//!    self time 0    u40        Time excluding children (wall clock)
//!    time 1         u40        Total time (thread CPU). Only if collecting two time stamps
//!    self time 1    u40        Time excluding children (thread CPU). Only if collecting two time stamps
//!    child count    u16
//!    children       [u24]      Or [u32] for buffers larger than 0xFFFFFF bytes
//! ```
//!
//! Integers are big endian, and `u40` is a high byte followed by a `u32`, see [`crate::packed`].

use crate::{Error, MethodId, Result, packed};
use byteorder::{BigEndian as BE, ByteOrder as _};
use std::collections::HashSet;

/// Size of a node up to its child count, when collecting one time stamp.
const NODE_HEADER_LEN: usize = 16;

/// Size of a node up to its child count, when collecting two time stamps.
const NODE_HEADER_LEN_TWO_TIME_STAMPS: usize = 26;

/// Call tree buffers up to this size use 3 byte child pointers.
const MAX_LEN_FOR_U24_POINTERS: usize = 0xFF_FFFF;

/// Size of the child offsets stored in a call tree buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerWidth {
    U24,
    U32,
}

impl PointerWidth {
    /// The width used for a call tree buffer of `len` bytes.
    ///
    /// Only large buffers pay for 4 byte offsets.
    pub fn for_tree_len(len: usize) -> Self {
        if len <= MAX_LEN_FOR_U24_POINTERS {
            Self::U24
        } else {
            Self::U32
        }
    }

    /// Number of bytes in one pointer.
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Self::U24 => 3,
            Self::U32 => 4,
        }
    }
}

/// Index of a node in a [`CallTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct NodeId(usize);

impl NodeId {
    /// The root of every decoded tree.
    pub const ROOT: Self = Self(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Total and self time of a node, in the unit of the profiler's timer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TimePair {
    /// Time spent in the method, including children.
    pub time: u64,

    /// Time spent in the method itself.
    pub self_time: u64,
}

/// One method invocation site in a call tree.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CallTreeNode {
    pub method_id: MethodId,

    /// How many times this call path was taken.
    pub n_calls: u32,

    /// Wall clock times.
    pub time0: TimePair,

    /// Thread CPU times. [`None`] unless the snapshot collects two time stamps.
    pub time1: Option<TimePair>,

    /// In call order.
    pub children: Vec<NodeId>,
}

/// The call tree of one thread, stored as an arena.
///
/// The root is [`NodeId::ROOT`] and nodes are numbered in depth-first pre-order,
/// so a parent always has a lower index than its children.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
}

impl CallTree {
    /// Decode a whole call tree buffer.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if any node or child pointer lies outside `bytes`,
    /// [`Error::OffsetCycle`] if a node is reachable more than once.
    pub fn decode(
        bytes: &[u8],
        two_time_stamps: bool,
        pointer_width: PointerWidth,
    ) -> Result<Self> {
        Self::decode_node(bytes, 0, two_time_stamps, pointer_width)
    }

    /// Decode the subtree rooted at `offset`.
    ///
    /// Walks the tree with an explicit stack, so deep call stacks can not overflow ours.
    ///
    /// # Errors
    /// See [`Self::decode`].
    pub fn decode_node(
        bytes: &[u8],
        offset: usize,
        two_time_stamps: bool,
        pointer_width: PointerWidth,
    ) -> Result<Self> {
        let reader = TreeReader::new(bytes);
        let mut nodes: Vec<CallTreeNode> = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(usize, Option<NodeId>)> = vec![(offset, None)];

        while let Some((offset, parent)) = stack.pop() {
            if !visited.insert(offset) {
                return Err(Error::OffsetCycle { offset });
            }

            let (node, child_offsets) = reader.node_at(offset, two_time_stamps, pointer_width)?;
            let id = NodeId(nodes.len());
            nodes.push(node);
            if let Some(parent) = parent {
                nodes[parent.0].children.push(id);
            }

            // Reversed, so the first child is popped (and numbered) first:
            stack.extend(child_offsets.into_iter().rev().map(|child| (child, Some(id))));
        }

        Ok(Self { nodes })
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&CallTreeNode> {
        self.nodes.first()
    }

    pub fn node(&self, id: NodeId) -> Option<&CallTreeNode> {
        self.nodes.get(id.0)
    }

    /// All nodes, in depth-first pre-order.
    pub fn nodes(&self) -> &[CallTreeNode] {
        &self.nodes
    }

    /// The children of `id`, in call order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &CallTreeNode)> + '_ {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&child| (child, &self.nodes[child.0]))
    }

    /// The depth of the deepest node.
    /// `0` means an empty tree, `1` a lone root, etc.
    pub fn depth(&self) -> usize {
        let mut depths = vec![0_usize; self.nodes.len()];
        if let Some(root_depth) = depths.first_mut() {
            *root_depth = 1;
        }
        let mut max_depth = 0;
        for (index, node) in self.nodes.iter().enumerate() {
            let depth = depths[index];
            max_depth = max_depth.max(depth);
            for child in &node.children {
                depths[child.0] = depth + 1;
            }
        }
        max_depth
    }

    /// Visit every node depth-first, in call order, together with its depth (the root has depth 0).
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            tree: self,
            stack: if self.nodes.is_empty() {
                vec![]
            } else {
                vec![(0, NodeId::ROOT)]
            },
        }
    }
}

/// Depth-first iterator over a [`CallTree`], see [`CallTree::walk`].
pub struct Walk<'t> {
    tree: &'t CallTree,
    stack: Vec<(usize, NodeId)>,
}

impl<'t> Iterator for Walk<'t> {
    type Item = (usize, NodeId, &'t CallTreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        let (depth, id) = self.stack.pop()?;
        let node = tree.node(id)?;
        self.stack
            .extend(node.children.iter().rev().map(|&child| (depth + 1, child)));
        Some((depth, id, node))
    }
}

/// Random access reads into a call tree buffer.
///
/// Unlike [`crate::Reader`] there is no cursor: every read names its offset.
#[derive(Clone, Copy, Debug)]
pub struct TreeReader<'a> {
    bytes: &'a [u8],
}

impl<'a> TreeReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn slice_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(Error::OutOfBounds {
                offset,
                len,
                available: self.bytes.len(),
            })
    }

    /// # Errors
    /// [`Error::OutOfBounds`] if the value does not fit in the buffer.
    pub fn u16_at(&self, offset: usize) -> Result<u16> {
        Ok(BE::read_u16(self.slice_at(offset, 2)?))
    }

    /// # Errors
    /// [`Error::OutOfBounds`] if the value does not fit in the buffer.
    pub fn u32_at(&self, offset: usize) -> Result<u32> {
        Ok(BE::read_u32(self.slice_at(offset, 4)?))
    }

    /// A packed 40-bit time: one high byte followed by a `u32`.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the value does not fit in the buffer.
    pub fn u40_at(&self, offset: usize) -> Result<u64> {
        let bytes = self.slice_at(offset, 5)?;
        Ok(packed::u40(bytes[0], BE::read_u32(&bytes[1..])))
    }

    /// A child offset of the given width.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the value does not fit in the buffer.
    pub fn pointer_at(&self, offset: usize, width: PointerWidth) -> Result<usize> {
        let bytes = self.slice_at(offset, width.bytes())?;
        let pointer = match width {
            PointerWidth::U24 => BE::read_u24(bytes),
            PointerWidth::U32 => BE::read_u32(bytes),
        };
        usize::try_from(pointer).map_err(|_err| Error::OutOfBounds {
            offset,
            len: width.bytes(),
            available: self.bytes.len(),
        })
    }

    fn time_pair_at(&self, offset: usize) -> Result<TimePair> {
        Ok(TimePair {
            time: self.u40_at(offset)?,
            self_time: self.u40_at(offset + 5)?,
        })
    }

    /// Decode the node at `offset`, returning it (without children) and the offsets of its children.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the node or its child pointers do not fit in the buffer.
    pub fn node_at(
        &self,
        offset: usize,
        two_time_stamps: bool,
        pointer_width: PointerWidth,
    ) -> Result<(CallTreeNode, Vec<usize>)> {
        let header_len = if two_time_stamps {
            NODE_HEADER_LEN_TWO_TIME_STAMPS
        } else {
            NODE_HEADER_LEN
        };
        // Bounds check the whole header (and the child count) at once,
        // which also makes the offset arithmetic below overflow free.
        self.slice_at(offset, header_len + 2)?;

        let method_id = MethodId(self.u16_at(offset)?);
        let n_calls = self.u32_at(offset + 2)?;
        let time0 = self.time_pair_at(offset + 6)?;
        let time1 = if two_time_stamps {
            Some(self.time_pair_at(offset + NODE_HEADER_LEN)?)
        } else {
            None
        };

        let child_count = usize::from(self.u16_at(offset + header_len)?);
        let pointers_offset = offset + header_len + 2;
        let width = pointer_width.bytes();
        self.slice_at(pointers_offset, child_count * width)?;
        let child_offsets = (0..child_count)
            .map(|i| self.pointer_at(pointers_offset + i * width, pointer_width))
            .collect::<Result<Vec<_>>>()?;

        Ok((
            CallTreeNode {
                method_id,
                n_calls,
                time0,
                time1,
                children: Vec::with_capacity(child_count),
            },
            child_offsets,
        ))
    }
}

#[cfg(test)]
fn write_node(
    bytes: &mut Vec<u8>,
    method_id: u16,
    n_calls: u32,
    times: &[u64],
    child_offsets: &[u32],
    pointer_width: PointerWidth,
) {
    use byteorder::WriteBytesExt as _;

    bytes.write_u16::<BE>(method_id).unwrap();
    bytes.write_u32::<BE>(n_calls).unwrap();
    for &time in times {
        bytes.write_u8((time >> 32) as u8).unwrap();
        bytes.write_u32::<BE>(time as u32).unwrap();
    }
    bytes.write_u16::<BE>(child_offsets.len() as u16).unwrap();
    for &child in child_offsets {
        match pointer_width {
            PointerWidth::U24 => bytes.write_u24::<BE>(child).unwrap(),
            PointerWidth::U32 => bytes.write_u32::<BE>(child).unwrap(),
        }
    }
}

#[test]
fn pointer_width_threshold() {
    assert_eq!(PointerWidth::for_tree_len(0), PointerWidth::U24);
    assert_eq!(PointerWidth::for_tree_len(0xFF_FFFF), PointerWidth::U24);
    assert_eq!(PointerWidth::for_tree_len(0x100_0000), PointerWidth::U32);
}

#[test]
fn node_fields_at_their_offsets() {
    let mut bytes = vec![0xAA; 3]; // node does not start at 0
    write_node(
        &mut bytes,
        7,
        42,
        &[1 << 32, 5, 0x12_3456_789A, 9],
        &[],
        PointerWidth::U24,
    );

    let reader = TreeReader::new(&bytes);
    let (node, children) = reader.node_at(3, true, PointerWidth::U24).unwrap();
    assert_eq!(node.method_id, MethodId(7));
    assert_eq!(node.n_calls, 42);
    assert_eq!(
        node.time0,
        TimePair {
            time: 1 << 32,
            self_time: 5
        }
    );
    assert_eq!(
        node.time1,
        Some(TimePair {
            time: 0x12_3456_789A,
            self_time: 9
        })
    );
    assert!(children.is_empty());

    // Read as a single time stamp node, the child count lands in the second time pair
    // and claims far more child pointers than the buffer holds:
    assert!(matches!(
        reader.node_at(3, false, PointerWidth::U24),
        Err(Error::OutOfBounds { offset: 21, .. })
    ));
}

#[test]
fn decodes_offset_addressed_children() {
    let width = PointerWidth::U32;
    let mut bytes = vec![];
    // root: 16 + 2 + 2 * 4 = 26 bytes
    write_node(&mut bytes, 0, 1, &[30, 10], &[44, 26], width);
    // second child at 26: 18 bytes
    write_node(&mut bytes, 2, 3, &[5, 5], &[], width);
    // first child at 44
    write_node(&mut bytes, 1, 2, &[15, 15], &[], width);

    let tree = CallTree::decode(&bytes, false, width).unwrap();
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.depth(), 2);
    let methods: Vec<u16> = tree
        .children(NodeId::ROOT)
        .map(|(_, node)| node.method_id.0)
        .collect();
    assert_eq!(methods, vec![1, 2]);
}

#[test]
fn walk_is_pre_order() {
    let width = PointerWidth::U24;
    let mut bytes = vec![];
    // 0: root -> [24, 63]
    write_node(&mut bytes, 0, 1, &[0, 0], &[24, 63], width);
    // 24: a -> [45]
    write_node(&mut bytes, 1, 1, &[0, 0], &[45], width);
    // 45: a.b
    write_node(&mut bytes, 2, 1, &[0, 0], &[], width);
    // 63: c
    write_node(&mut bytes, 3, 1, &[0, 0], &[], width);

    let tree = CallTree::decode(&bytes, false, width).unwrap();
    let walked: Vec<(usize, u16)> = tree
        .walk()
        .map(|(depth, _, node)| (depth, node.method_id.0))
        .collect();
    assert_eq!(walked, vec![(0, 0), (1, 1), (2, 2), (1, 3)]);
    assert_eq!(tree.depth(), 3);

    // Pre-order numbering:
    let ids: Vec<usize> = tree.walk().map(|(_, id, _)| id.index()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}

#[test]
fn subtree_at_offset() {
    let width = PointerWidth::U24;
    let mut bytes = vec![];
    write_node(&mut bytes, 0, 1, &[0, 0], &[21], width);
    write_node(&mut bytes, 5, 6, &[7, 8], &[], width);

    let subtree = CallTree::decode_node(&bytes, 21, false, width).unwrap();
    assert_eq!(subtree.len(), 1);
    assert_eq!(subtree.root().unwrap().method_id, MethodId(5));
}

#[test]
fn child_pointer_out_of_bounds() {
    let width = PointerWidth::U24;
    let mut bytes = vec![];
    write_node(&mut bytes, 0, 1, &[0, 0], &[1000], width);
    assert!(matches!(
        CallTree::decode(&bytes, false, width),
        Err(Error::OutOfBounds { offset: 1000, .. })
    ));
}

#[test]
fn truncated_child_pointers() {
    let width = PointerWidth::U32;
    let mut bytes = vec![];
    write_node(&mut bytes, 0, 1, &[0, 0], &[26, 26], width);
    bytes.truncate(bytes.len() - 1);
    assert!(matches!(
        CallTree::decode(&bytes, false, width),
        Err(Error::OutOfBounds { offset: 18, len: 8, .. })
    ));
}

#[test]
fn offset_cycle_is_rejected() {
    let width = PointerWidth::U24;
    let mut bytes = vec![];
    // root -> child -> root
    write_node(&mut bytes, 0, 1, &[0, 0], &[21], width);
    write_node(&mut bytes, 1, 1, &[0, 0], &[0], width);
    assert!(matches!(
        CallTree::decode(&bytes, false, width),
        Err(Error::OffsetCycle { offset: 0 })
    ));
}

#[test]
fn empty_buffer_is_out_of_bounds() {
    assert!(matches!(
        CallTree::decode(&[], false, PointerWidth::U24),
        Err(Error::OutOfBounds { offset: 0, .. })
    ));
}
