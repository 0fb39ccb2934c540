//! Traversal drivers and the listener protocol they call into.
//!
//! Both drivers keep an explicit stack, skip deleted nodes (and therefore
//! their subtrees), treat a forward-linked chain as one array, and bound
//! the depth by [`MAX_WORD_LENGTH`]. A listener error stops the walk and is
//! returned as is.

use crate::buffer::DictPos;
use crate::dict_buffers::DictBuffers;
use crate::error::{DictError, Result};
use crate::trie::node::{read_array_chain, read_pt_node, PtNodeParams, ROOT_POS};
use crate::MAX_WORD_LENGTH;

/// Callbacks of a trie walk. All default to doing nothing.
pub trait TraversalListener {
    /// Entering the array at `array_pos`, which has `live_nodes` non-deleted nodes.
    fn on_descend(&mut self, _dict: &mut DictBuffers, _array_pos: DictPos, _live_nodes: usize) -> Result<()> {
        Ok(())
    }

    /// Leaving an array after all of its descendants.
    fn on_ascend(&mut self, _dict: &mut DictBuffers) -> Result<()> {
        Ok(())
    }

    /// Every live node of the array at `array_pos` has been visited.
    fn on_reading_array_tail(&mut self, _dict: &mut DictBuffers, _array_pos: DictPos) -> Result<()> {
        Ok(())
    }

    fn on_visiting_pt_node(&mut self, _dict: &mut DictBuffers, _node: &PtNodeParams) -> Result<()> {
        Ok(())
    }
}

struct Frame {
    array_pos: DictPos,
    nodes: Vec<PtNodeParams>,
    next: usize,
    /// Children of `nodes[next]` were already walked.
    children_done: bool,
}

fn enter_array(
    dict: &mut DictBuffers,
    listener: &mut impl TraversalListener,
    array_pos: DictPos,
    depth: usize,
) -> Result<Frame> {
    if depth > MAX_WORD_LENGTH {
        return Err(DictError::corrupt(format!(
            "trie deeper than {MAX_WORD_LENGTH} at array {}",
            array_pos.raw()
        )));
    }
    let chain = read_array_chain(&dict.trie, array_pos)?;
    listener.on_descend(dict, array_pos, chain.live_node_count())?;
    Ok(Frame {
        array_pos,
        nodes: chain.nodes.into_iter().filter(|n| !n.is_deleted()).collect(),
        next: 0,
        children_done: false,
    })
}

/// Node-level post-order: every node is visited after all of its descendants.
pub fn traverse_post_order(dict: &mut DictBuffers, listener: &mut impl TraversalListener) -> Result<()> {
    let mut stack = vec![enter_array(dict, listener, ROOT_POS, 1)?];
    while let Some(frame) = stack.last_mut() {
        if frame.next == frame.nodes.len() {
            let array_pos = frame.array_pos;
            stack.pop();
            listener.on_reading_array_tail(dict, array_pos)?;
            listener.on_ascend(dict)?;
            continue;
        }

        let node = &frame.nodes[frame.next];
        if !frame.children_done && node.has_children() {
            frame.children_done = true;
            let children = node.children_pos;
            let depth = stack.len() + 1;
            let child = enter_array(dict, listener, children, depth)?;
            stack.push(child);
            continue;
        }

        // Re-read: descendants' callbacks may have patched this node.
        let pos = node.pos;
        frame.next += 1;
        frame.children_done = false;
        let node = read_pt_node(&dict.trie, pos)?;
        listener.on_visiting_pt_node(dict, &node)?;
    }
    Ok(())
}

enum Step {
    Array { pos: DictPos, depth: usize },
    Ascend,
}

/// Array-level pre-order: an array's nodes are all visited before any of its
/// children's arrays. Child positions are read after the visit, so a
/// listener may patch them and the walk follows the patched value.
pub fn traverse_array_level_pre_order(dict: &mut DictBuffers, listener: &mut impl TraversalListener) -> Result<()> {
    let mut steps = vec![Step::Array {
        pos: ROOT_POS,
        depth: 1,
    }];
    while let Some(step) = steps.pop() {
        let (array_pos, depth) = match step {
            Step::Ascend => {
                listener.on_ascend(dict)?;
                continue;
            }
            Step::Array { pos, depth } => (pos, depth),
        };

        let frame = enter_array(dict, listener, array_pos, depth)?;
        for node in &frame.nodes {
            listener.on_visiting_pt_node(dict, node)?;
        }
        listener.on_reading_array_tail(dict, array_pos)?;

        steps.push(Step::Ascend);
        let mut children = Vec::new();
        for node in &frame.nodes {
            let node = read_pt_node(&dict.trie, node.pos)?;
            if !node.is_deleted() && node.has_children() {
                children.push(node.children_pos);
            }
        }
        for pos in children.into_iter().rev() {
            steps.push(Step::Array { pos, depth: depth + 1 });
        }
    }
    Ok(())
}
