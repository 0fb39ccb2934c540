//! PtNode and PtNode-array codec.
//!
//! ```text
//! array:  count u16 | node * count | forward link u32
//! node:   flags u8 | parent u32 | label (code points + 0x1F) | terminal id u32 | children u32
//! ```
//!
//! A forward link continues the sibling array in another segment; a chain
//! of segments is one logical array. Every fixed-width field can be patched
//! in place.

use bitflags::bitflags;

use crate::buffer::{DictPos, ExtendableBuffer};
use crate::encoding::{code_points_size, decode_code_points, encode_code_points, CodePoints};
use crate::error::{DictError, Result};
use crate::{TerminalId, NOT_A_TERMINAL_ID};

/// The root array always starts at the beginning of the trie buffer.
pub const ROOT_POS: DictPos = DictPos::new(0);

/// Segments followed in one chain before it is treated as cyclic.
pub const MAX_ARRAY_CHAIN_SEGMENTS: usize = 0x1_0000;

const ARRAY_COUNT_SIZE: usize = 2;
const FORWARD_LINK_SIZE: usize = 4;
const FLAGS_SIZE: usize = 1;
const POS_SIZE: usize = 4;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PtNodeFlags: u8 {
        const IS_TERMINAL = 0x01;
        const IS_BLACKLISTED = 0x02;
        /// Terminal scheduled to lose its word at the next compaction.
        const WILL_BECOME_NON_TERMINAL = 0x04;
        const HAS_BIGRAMS = 0x08;
        const HAS_SHORTCUTS = 0x10;
        const IS_DELETED = 0x20;
    }
}

// =============================================================================
// Decoded node
// =============================================================================

/// A decoded node with the positions of its patchable fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PtNodeParams {
    pub pos: DictPos,
    pub flags: PtNodeFlags,
    pub parent_pos: DictPos,
    pub code_points: CodePoints,
    pub terminal_id: TerminalId,
    pub children_pos: DictPos,
    terminal_id_field_pos: usize,
    children_pos_field_pos: usize,
    /// Position right after this node (next sibling or the array tail).
    pub end_pos: usize,
}

impl PtNodeParams {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.flags.contains(PtNodeFlags::IS_TERMINAL)
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(PtNodeFlags::IS_DELETED)
    }

    #[inline]
    pub fn is_blacklisted(&self) -> bool {
        self.flags.contains(PtNodeFlags::IS_BLACKLISTED)
    }

    #[inline]
    pub fn will_become_non_terminal(&self) -> bool {
        self.flags.contains(PtNodeFlags::WILL_BECOME_NON_TERMINAL)
    }

    /// Terminal, live, and not scheduled for removal.
    #[inline]
    pub fn represents_word(&self) -> bool {
        self.is_terminal() && !self.is_deleted() && !self.will_become_non_terminal()
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        !self.children_pos.is_null()
    }
}

/// Fields of a node about to be written.
#[derive(Clone, Copy, Debug)]
pub struct NewPtNode<'a> {
    pub flags: PtNodeFlags,
    pub parent_pos: DictPos,
    pub code_points: &'a [u32],
    pub terminal_id: TerminalId,
    pub children_pos: DictPos,
}

impl<'a> NewPtNode<'a> {
    /// Copy of `node` with its own label and links.
    pub fn from_params(node: &'a PtNodeParams) -> Self {
        Self {
            flags: node.flags,
            parent_pos: node.parent_pos,
            code_points: &node.code_points,
            terminal_id: node.terminal_id,
            children_pos: node.children_pos,
        }
    }

    pub fn encoded_size(&self) -> usize {
        FLAGS_SIZE + POS_SIZE + code_points_size(self.code_points) + 4 + POS_SIZE
    }
}

// =============================================================================
// Reading
// =============================================================================

pub fn read_pt_node(buffer: &ExtendableBuffer, pos: DictPos) -> Result<PtNodeParams> {
    let mut p = pos.as_usize();
    let flags = PtNodeFlags::from_bits(buffer.read_uint_and_advance(1, &mut p)? as u8)
        .ok_or_else(|| DictError::corrupt(format!("unknown node flags at {}", pos.raw())))?;
    let parent_pos = DictPos::new(buffer.read_uint_and_advance(4, &mut p)?);
    let code_points = decode_code_points(buffer, &mut p)?;
    if code_points.is_empty() {
        return Err(DictError::corrupt(format!("empty edge label at {}", pos.raw())));
    }
    let terminal_id_field_pos = p;
    let terminal_id = buffer.read_uint_and_advance(4, &mut p)?;
    let children_pos_field_pos = p;
    let children_pos = DictPos::new(buffer.read_uint_and_advance(4, &mut p)?);

    if flags.contains(PtNodeFlags::IS_TERMINAL) != (terminal_id != NOT_A_TERMINAL_ID) {
        return Err(DictError::corrupt(format!(
            "terminal flag disagrees with terminal id {terminal_id} at {}",
            pos.raw()
        )));
    }

    Ok(PtNodeParams {
        pos,
        flags,
        parent_pos,
        code_points,
        terminal_id,
        children_pos,
        terminal_id_field_pos,
        children_pos_field_pos,
        end_pos: p,
    })
}

/// One logical sibling array: every node of every segment, in order.
#[derive(Clone, Debug)]
pub struct PtNodeArrayChain {
    pub head: DictPos,
    /// Deleted nodes included.
    pub nodes: Vec<PtNodeParams>,
    /// Forward-link field of the last segment.
    pub last_forward_link_pos: usize,
    pub segments: usize,
}

impl PtNodeArrayChain {
    pub fn live_nodes(&self) -> impl Iterator<Item = &PtNodeParams> {
        self.nodes.iter().filter(|n| !n.is_deleted())
    }

    pub fn live_node_count(&self) -> usize {
        self.live_nodes().count()
    }
}

/// Read the array at `head` and every segment forward-linked from it.
pub fn read_array_chain(buffer: &ExtendableBuffer, head: DictPos) -> Result<PtNodeArrayChain> {
    let mut nodes = Vec::new();
    let mut segment = head;
    let mut segments = 0;
    loop {
        segments += 1;
        if segments > MAX_ARRAY_CHAIN_SEGMENTS {
            return Err(DictError::corrupt(format!(
                "array chain at {} exceeds {MAX_ARRAY_CHAIN_SEGMENTS} segments",
                head.raw()
            )));
        }
        let mut p = segment.as_usize();
        let count = buffer.read_uint_and_advance(ARRAY_COUNT_SIZE, &mut p)?;
        for _ in 0..count {
            let node = read_pt_node(buffer, DictPos::from_usize(p))?;
            p = node.end_pos;
            nodes.push(node);
        }
        let forward = buffer.read_pos(p)?;
        if forward.is_null() {
            return Ok(PtNodeArrayChain {
                head,
                nodes,
                last_forward_link_pos: p,
                segments,
            });
        }
        segment = forward;
    }
}

// =============================================================================
// Writing
// =============================================================================

pub fn encode_pt_node(node: &NewPtNode<'_>, out: &mut Vec<u8>) -> Result<()> {
    debug_assert_eq!(
        node.flags.contains(PtNodeFlags::IS_TERMINAL),
        node.terminal_id != NOT_A_TERMINAL_ID
    );
    if node.code_points.is_empty() {
        return Err(DictError::InvalidWord("empty edge label".to_owned()));
    }
    out.push(node.flags.bits());
    out.extend_from_slice(&node.parent_pos.raw().to_be_bytes());
    encode_code_points(node.code_points, out)?;
    out.extend_from_slice(&node.terminal_id.to_be_bytes());
    out.extend_from_slice(&node.children_pos.raw().to_be_bytes());
    Ok(())
}

/// Append a terminated array of `nodes`. Returns the array position and the
/// position of every node in it.
pub fn append_array(buffer: &mut ExtendableBuffer, nodes: &[NewPtNode<'_>]) -> Result<(DictPos, Vec<DictPos>)> {
    let count = u16::try_from(nodes.len())
        .map_err(|_| DictError::corrupt(format!("array of {} nodes is too large", nodes.len())))?;
    let array_pos = buffer.tail_position();
    let mut bytes = Vec::with_capacity(
        ARRAY_COUNT_SIZE + FORWARD_LINK_SIZE + nodes.iter().map(NewPtNode::encoded_size).sum::<usize>(),
    );
    bytes.extend_from_slice(&count.to_be_bytes());
    let mut node_positions = Vec::with_capacity(nodes.len());
    for node in nodes {
        node_positions.push(DictPos::from_usize(array_pos + bytes.len()));
        encode_pt_node(node, &mut bytes)?;
    }
    bytes.extend_from_slice(&DictPos::NULL.raw().to_be_bytes());
    let pos = buffer.append(&bytes)?;
    Ok((pos, node_positions))
}

/// Append an array with no nodes.
pub fn append_empty_array(buffer: &mut ExtendableBuffer) -> Result<DictPos> {
    append_array(buffer, &[]).map(|(pos, _)| pos)
}

// =============================================================================
// In-place patching
// =============================================================================

pub fn update_flags(buffer: &mut ExtendableBuffer, node_pos: DictPos, flags: PtNodeFlags) -> Result<()> {
    buffer.write_uint(node_pos.as_usize(), u32::from(flags.bits()), FLAGS_SIZE)
}

pub fn update_parent_pos(buffer: &mut ExtendableBuffer, node_pos: DictPos, parent_pos: DictPos) -> Result<()> {
    buffer.write_pos(node_pos.as_usize() + FLAGS_SIZE, parent_pos)
}

pub fn update_children_pos(buffer: &mut ExtendableBuffer, node: &PtNodeParams, children_pos: DictPos) -> Result<()> {
    buffer.write_pos(node.children_pos_field_pos, children_pos)
}

/// Set the terminal id and keep IS_TERMINAL in agreement with it.
pub fn update_terminal_id(buffer: &mut ExtendableBuffer, node: &PtNodeParams, terminal_id: TerminalId) -> Result<()> {
    let mut flags = node.flags;
    flags.set(PtNodeFlags::IS_TERMINAL, terminal_id != NOT_A_TERMINAL_ID);
    buffer.write_pos(node.terminal_id_field_pos, DictPos::new(terminal_id))?;
    update_flags(buffer, node.pos, flags)
}

pub fn update_forward_link(buffer: &mut ExtendableBuffer, link_field_pos: usize, target: DictPos) -> Result<()> {
    buffer.write_pos(link_field_pos, target)
}
