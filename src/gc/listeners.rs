//! Traversal listeners driving the compaction passes.

use std::collections::HashMap;

use crate::buffer::DictPos;
use crate::content::TerminalIdMap;
use crate::decay::DecayFunction;
use crate::dict_buffers::DictBuffers;
use crate::error::{DictError, Result};
use crate::trie::node::{
    encode_pt_node, read_pt_node, update_children_pos, update_flags, update_parent_pos, update_terminal_id,
    NewPtNode, PtNodeFlags, PtNodeParams, ROOT_POS,
};
use crate::trie::traverse::TraversalListener;
use crate::NOT_A_TERMINAL_ID;

/// Old-to-new positions recorded while relocating into a fresh trie.
#[derive(Debug, Default)]
pub struct DictPositionRelocationMap {
    /// Node positions.
    pub nodes: HashMap<DictPos, DictPos>,
    /// Array (chain head) positions. An array with no live node maps to NULL.
    pub arrays: HashMap<DictPos, DictPos>,
}

// =============================================================================
// Pass 1: unigram probabilities and useless nodes
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnigramPassMode {
    /// Apply elapsed decay to every unigram, then mark.
    UpdateAndMark,
    /// Only mark; used after truncation so evicted leaves disappear.
    MarkOnly,
}

/// Post-order listener that decays unigrams, drops forgotten words, and
/// marks deleted every node left with neither a word nor a live child.
///
/// A word that is dropped but still has live children keeps its node and is
/// flagged WILL_BECOME_NON_TERMINAL.
pub struct UpdateUnigramProbabilityAndMarkUseless<'a> {
    decay: &'a dyn DecayFunction,
    now: u32,
    mode: UnigramPassMode,
    /// Kept-node count of each array on the current path.
    value_stack: Vec<usize>,
    /// Kept children of the node about to be visited.
    children_value: usize,
    valid_unigram_count: u32,
    deleted_node_count: u32,
}

impl<'a> UpdateUnigramProbabilityAndMarkUseless<'a> {
    pub fn new(decay: &'a dyn DecayFunction, now: u32, mode: UnigramPassMode) -> Self {
        Self {
            decay,
            now,
            mode,
            value_stack: Vec::new(),
            children_value: 0,
            valid_unigram_count: 0,
            deleted_node_count: 0,
        }
    }

    pub fn valid_unigram_count(&self) -> u32 {
        self.valid_unigram_count
    }

    pub fn deleted_node_count(&self) -> u32 {
        self.deleted_node_count
    }

    fn keeps_word(&self, dict: &mut DictBuffers, node: &PtNodeParams) -> Result<bool> {
        if !node.represents_word() {
            return Ok(false);
        }
        if self.mode == UnigramPassMode::MarkOnly || !dict.has_historical_info() {
            return Ok(true);
        }
        let Some(mut entry) = dict.probabilities.get(node.terminal_id)? else {
            return Ok(false);
        };
        let Some(info) = entry.historical_info else {
            return Ok(true);
        };
        let params = dict.header.decay;
        let saved = self.decay.info_to_save(&info, &params, self.now);
        if !self.decay.needs_to_keep(&saved, &params) {
            return Ok(false);
        }
        entry.historical_info = Some(saved);
        dict.probabilities.set(node.terminal_id, &entry)?;
        Ok(true)
    }
}

impl TraversalListener for UpdateUnigramProbabilityAndMarkUseless<'_> {
    fn on_descend(&mut self, _dict: &mut DictBuffers, _array_pos: DictPos, _live_nodes: usize) -> Result<()> {
        self.value_stack.push(0);
        Ok(())
    }

    fn on_ascend(&mut self, _dict: &mut DictBuffers) -> Result<()> {
        self.children_value = self
            .value_stack
            .pop()
            .ok_or_else(|| DictError::corrupt("ascend without descend"))?;
        Ok(())
    }

    fn on_visiting_pt_node(&mut self, dict: &mut DictBuffers, node: &PtNodeParams) -> Result<()> {
        let has_live_children = self.children_value > 0;
        self.children_value = 0;

        let keeps_word = self.keeps_word(dict, node)?;
        let kept = if keeps_word {
            self.valid_unigram_count += 1;
            true
        } else if has_live_children {
            if node.is_terminal() && !node.will_become_non_terminal() {
                update_flags(&mut dict.trie, node.pos, node.flags | PtNodeFlags::WILL_BECOME_NON_TERMINAL)?;
            }
            true
        } else {
            update_flags(&mut dict.trie, node.pos, node.flags | PtNodeFlags::IS_DELETED)?;
            self.deleted_node_count += 1;
            false
        };

        if kept {
            if let Some(top) = self.value_stack.last_mut() {
                *top += 1;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Pass 3: bigram probabilities
// =============================================================================

/// Post-order listener that decays bigram entries and invalidates entries
/// that were forgotten or whose target no longer represents a word.
pub struct UpdateBigramProbability<'a> {
    decay: &'a dyn DecayFunction,
    now: u32,
    valid_bigram_count: u32,
    invalidated_count: u32,
}

impl<'a> UpdateBigramProbability<'a> {
    pub fn new(decay: &'a dyn DecayFunction, now: u32) -> Self {
        Self {
            decay,
            now,
            valid_bigram_count: 0,
            invalidated_count: 0,
        }
    }

    pub fn valid_bigram_count(&self) -> u32 {
        self.valid_bigram_count
    }

    pub fn invalidated_count(&self) -> u32 {
        self.invalidated_count
    }

    fn target_represents_word(dict: &DictBuffers, target: u32) -> Result<bool> {
        match dict.terminals.position_of(target)? {
            Some(pos) => Ok(read_pt_node(&dict.trie, pos)?.represents_word()),
            None => Ok(false),
        }
    }
}

impl TraversalListener for UpdateBigramProbability<'_> {
    fn on_visiting_pt_node(&mut self, dict: &mut DictBuffers, node: &PtNodeParams) -> Result<()> {
        if !node.represents_word() {
            return Ok(());
        }
        let params = dict.header.decay;
        for (pos, mut entry) in dict.bigrams.valid_entries(node.terminal_id)? {
            if !Self::target_represents_word(dict, entry.target)? {
                dict.bigrams.invalidate_entry_at(pos)?;
                self.invalidated_count += 1;
                continue;
            }
            if let Some(info) = entry.historical_info {
                let saved = self.decay.info_to_save(&info, &params, self.now);
                if !self.decay.needs_to_keep(&saved, &params) {
                    dict.bigrams.invalidate_entry_at(pos)?;
                    self.invalidated_count += 1;
                    continue;
                }
                entry.historical_info = Some(saved);
                dict.bigrams.write_entry_at(pos, &entry)?;
            }
            self.valid_bigram_count += 1;
        }
        Ok(())
    }
}

// =============================================================================
// Pass 5: relocation into the new trie
// =============================================================================

/// Array-level pre-order listener that copies every live node of the source
/// trie into `target`, merging each forward-linked chain into one array.
///
/// Parent and child fields are copied unchanged; they are rewritten through
/// the relocation map by [`UpdateAllPositionFields`]. Nodes flagged
/// WILL_BECOME_NON_TERMINAL are written as plain branch nodes. Each
/// surviving terminal is recorded in the target terminal table under its
/// old id.
pub struct PlaceAndWriteValidNodes<'a> {
    target: &'a mut DictBuffers,
    relocation: &'a mut DictPositionRelocationMap,
    writing_array: bool,
    written_nodes: u32,
}

impl<'a> PlaceAndWriteValidNodes<'a> {
    pub fn new(target: &'a mut DictBuffers, relocation: &'a mut DictPositionRelocationMap) -> Self {
        Self {
            target,
            relocation,
            writing_array: false,
            written_nodes: 0,
        }
    }

    pub fn written_nodes(&self) -> u32 {
        self.written_nodes
    }
}

impl TraversalListener for PlaceAndWriteValidNodes<'_> {
    fn on_descend(&mut self, _dict: &mut DictBuffers, array_pos: DictPos, live_nodes: usize) -> Result<()> {
        if live_nodes == 0 && array_pos != ROOT_POS {
            self.relocation.arrays.insert(array_pos, DictPos::NULL);
            self.writing_array = false;
            return Ok(());
        }
        let count = u16::try_from(live_nodes)
            .map_err(|_| DictError::corrupt(format!("array of {live_nodes} live nodes is too large")))?;
        let new_pos = self.target.trie.append(&count.to_be_bytes())?;
        self.relocation.arrays.insert(array_pos, new_pos);
        self.writing_array = true;
        Ok(())
    }

    fn on_reading_array_tail(&mut self, _dict: &mut DictBuffers, _array_pos: DictPos) -> Result<()> {
        if self.writing_array {
            self.target.trie.append(&DictPos::NULL.raw().to_be_bytes())?;
            self.writing_array = false;
        }
        Ok(())
    }

    fn on_visiting_pt_node(&mut self, _dict: &mut DictBuffers, node: &PtNodeParams) -> Result<()> {
        debug_assert!(self.writing_array);
        let mut new_node = NewPtNode::from_params(node);
        if node.will_become_non_terminal() {
            new_node.flags -= PtNodeFlags::IS_TERMINAL
                | PtNodeFlags::WILL_BECOME_NON_TERMINAL
                | PtNodeFlags::HAS_BIGRAMS
                | PtNodeFlags::HAS_SHORTCUTS
                | PtNodeFlags::IS_BLACKLISTED;
            new_node.terminal_id = NOT_A_TERMINAL_ID;
        }
        let mut bytes = Vec::with_capacity(new_node.encoded_size());
        encode_pt_node(&new_node, &mut bytes)?;
        let new_pos = self.target.trie.append(&bytes)?;
        self.relocation.nodes.insert(node.pos, new_pos);
        if new_node.terminal_id != NOT_A_TERMINAL_ID {
            self.target.terminals.set_position(new_node.terminal_id, new_pos)?;
        }
        self.written_nodes += 1;
        Ok(())
    }
}

// =============================================================================
// Pass 7: position fields of the new trie
// =============================================================================

/// Array-level pre-order listener over the new trie that maps every parent
/// and child field from source positions to new positions.
pub struct UpdateAllPositionFields<'a> {
    relocation: &'a DictPositionRelocationMap,
}

impl<'a> UpdateAllPositionFields<'a> {
    pub fn new(relocation: &'a DictPositionRelocationMap) -> Self {
        Self { relocation }
    }
}

impl TraversalListener for UpdateAllPositionFields<'_> {
    fn on_visiting_pt_node(&mut self, dict: &mut DictBuffers, node: &PtNodeParams) -> Result<()> {
        if !node.parent_pos.is_null() {
            let parent = self.relocation.nodes.get(&node.parent_pos).ok_or_else(|| {
                DictError::corrupt(format!("no relocation for parent node {}", node.parent_pos.raw()))
            })?;
            update_parent_pos(&mut dict.trie, node.pos, *parent)?;
        }
        if node.has_children() {
            let children = self.relocation.arrays.get(&node.children_pos).ok_or_else(|| {
                DictError::corrupt(format!("no relocation for child array {}", node.children_pos.raw()))
            })?;
            update_children_pos(&mut dict.trie, node, *children)?;
        }
        Ok(())
    }
}

// =============================================================================
// Pass 8: terminal ids and content flags of the new trie
// =============================================================================

/// Post-order listener over the new trie that renumbers terminal ids and
/// derives HAS_BIGRAMS and HAS_SHORTCUTS from the new stores.
pub struct UpdateFlagsAndTerminalIds<'a> {
    id_map: &'a TerminalIdMap,
    unigram_count: u32,
}

impl<'a> UpdateFlagsAndTerminalIds<'a> {
    pub fn new(id_map: &'a TerminalIdMap) -> Self {
        Self {
            id_map,
            unigram_count: 0,
        }
    }

    pub fn unigram_count(&self) -> u32 {
        self.unigram_count
    }
}

impl TraversalListener for UpdateFlagsAndTerminalIds<'_> {
    fn on_visiting_pt_node(&mut self, dict: &mut DictBuffers, node: &PtNodeParams) -> Result<()> {
        let mut flags = node.flags;
        if node.is_terminal() {
            let new_id = *self.id_map.get(&node.terminal_id).ok_or_else(|| {
                DictError::corrupt(format!("no new terminal id for {}", node.terminal_id))
            })?;
            update_terminal_id(&mut dict.trie, node, new_id)?;
            flags.set(PtNodeFlags::HAS_BIGRAMS, dict.bigrams.get_list_head_pos(new_id)?.is_some());
            flags.set(PtNodeFlags::HAS_SHORTCUTS, dict.shortcuts.get_list_head_pos(new_id)?.is_some());
            self.unigram_count += 1;
        } else {
            flags -= PtNodeFlags::HAS_BIGRAMS | PtNodeFlags::HAS_SHORTCUTS;
        }
        if flags != node.flags {
            update_flags(&mut dict.trie, node.pos, flags)?;
        }
        Ok(())
    }
}
