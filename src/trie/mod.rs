//! Patricia trie stored in a byte buffer.

pub mod node;
pub mod traverse;
pub mod update;

use crate::buffer::{DictPos, ExtendableBuffer};
use crate::encoding::CodePoints;
use crate::error::{DictError, Result};
use crate::MAX_WORD_LENGTH;

use node::{read_array_chain, read_pt_node, PtNodeParams, ROOT_POS};

/// The live node whose path spells exactly `word`, terminal or not.
pub fn find_word_node(trie: &ExtendableBuffer, word: &[u32]) -> Result<Option<PtNodeParams>> {
    if word.is_empty() || word.len() > MAX_WORD_LENGTH {
        return Ok(None);
    }
    let mut head = ROOT_POS;
    let mut i = 0;
    loop {
        let chain = read_array_chain(trie, head)?;
        let rest = &word[i..];
        let Some(node) = chain.live_nodes().find(|n| n.code_points[0] == rest[0]) else {
            return Ok(None);
        };
        if !rest.starts_with(&node.code_points) {
            return Ok(None);
        }
        i += node.code_points.len();
        if i == word.len() {
            return Ok(Some(node.clone()));
        }
        if !node.has_children() {
            return Ok(None);
        }
        head = node.children_pos;
    }
}

/// Full word of the node at `pos`, rebuilt by climbing parent links.
pub fn read_word_at(trie: &ExtendableBuffer, pos: DictPos) -> Result<CodePoints> {
    let mut labels = Vec::new();
    let mut len = 0;
    let mut current = pos;
    while !current.is_null() {
        let node = read_pt_node(trie, current)?;
        len += node.code_points.len();
        if len > MAX_WORD_LENGTH {
            return Err(DictError::corrupt(format!(
                "parent chain of {} spells more than {MAX_WORD_LENGTH} code points",
                pos.raw()
            )));
        }
        current = node.parent_pos;
        labels.push(node.code_points);
    }
    Ok(labels.into_iter().rev().flatten().collect())
}
