//! Word insertion into a live trie.
//!
//! The trie only grows at the tail of its buffer; existing nodes are never
//! moved, only patched. A new sibling becomes a one-node array forward-linked
//! from the end of the sibling chain. Splitting an edge appends the shared
//! head as a new sibling and marks the original node deleted.

use tracing::warn;

use crate::buffer::{DictPos, ExtendableBuffer};
use crate::content::TerminalPositionLookupTable;
use crate::encoding::common_prefix_len;
use crate::error::{DictError, Result};
use crate::trie::node::{
    append_array, read_array_chain, read_pt_node, update_children_pos, update_flags, update_forward_link,
    update_parent_pos, update_terminal_id, NewPtNode, PtNodeFlags, ROOT_POS,
};
use crate::{TerminalId, MAX_WORD_LENGTH, NOT_A_TERMINAL_ID};

/// Result of [`insert_word`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertedWord {
    pub pos: DictPos,
    pub terminal_id: TerminalId,
    /// The node already represented a word before the call.
    pub was_word: bool,
}

pub(crate) fn check_word(word: &[u32]) -> Result<()> {
    if word.is_empty() {
        return Err(DictError::InvalidWord("empty word".to_owned()));
    }
    if word.len() > MAX_WORD_LENGTH {
        return Err(DictError::InvalidWord(format!(
            "word of {} code points exceeds {MAX_WORD_LENGTH}",
            word.len()
        )));
    }
    Ok(())
}

fn terminal_node<'a>(label: &'a [u32], parent_pos: DictPos, terminal_id: TerminalId) -> NewPtNode<'a> {
    NewPtNode {
        flags: PtNodeFlags::IS_TERMINAL,
        parent_pos,
        code_points: label,
        terminal_id,
        children_pos: DictPos::NULL,
    }
}

/// Allocate the id already written into the linked node at `pos`. If the
/// table cannot grow, `undo` takes the node back out of the word set.
fn allocate(
    trie: &mut ExtendableBuffer,
    terminals: &mut TerminalPositionLookupTable,
    expected: TerminalId,
    pos: DictPos,
    undo: impl FnOnce(&mut ExtendableBuffer) -> Result<()>,
) -> Result<TerminalId> {
    match terminals.allocate_id(pos) {
        Ok(id) => {
            debug_assert_eq!(id, expected);
            Ok(id)
        }
        Err(err) => {
            if let Err(undo_err) = undo(trie) {
                warn!(pos = pos.raw(), error = %undo_err, "could not unlink node after failed id allocation");
            }
            Err(err)
        }
    }
}

fn delete_new_node(pos: DictPos) -> impl FnOnce(&mut ExtendableBuffer) -> Result<()> {
    move |trie| update_flags(trie, pos, PtNodeFlags::IS_TERMINAL | PtNodeFlags::IS_DELETED)
}

/// Make `word` a terminal of the trie rooted at [`ROOT_POS`], creating and
/// splitting nodes as needed. A word scheduled for removal is revived with
/// its old terminal id.
pub fn insert_word(
    trie: &mut ExtendableBuffer,
    terminals: &mut TerminalPositionLookupTable,
    word: &[u32],
) -> Result<InsertedWord> {
    check_word(word)?;
    let mut head = ROOT_POS;
    let mut parent_pos = DictPos::NULL;
    let mut i = 0;

    loop {
        let chain = read_array_chain(trie, head)?;
        let rest = &word[i..];
        let Some(node) = chain.live_nodes().find(|n| n.code_points[0] == rest[0]).cloned() else {
            // New sibling at the end of the chain.
            let id = terminals.next_terminal_id();
            let (array, nodes) = append_array(trie, &[terminal_node(rest, parent_pos, id)])?;
            update_forward_link(trie, chain.last_forward_link_pos, array)?;
            let id = allocate(trie, terminals, id, nodes[0], delete_new_node(nodes[0]))?;
            return Ok(InsertedWord {
                pos: nodes[0],
                terminal_id: id,
                was_word: false,
            });
        };

        let k = common_prefix_len(&node.code_points, rest);
        if k == node.code_points.len() {
            if k == rest.len() {
                // Exact node.
                if node.is_terminal() {
                    if node.will_become_non_terminal() {
                        update_flags(trie, node.pos, node.flags - PtNodeFlags::WILL_BECOME_NON_TERMINAL)?;
                    }
                    return Ok(InsertedWord {
                        pos: node.pos,
                        terminal_id: node.terminal_id,
                        was_word: !node.will_become_non_terminal(),
                    });
                }
                let id = terminals.next_terminal_id();
                update_terminal_id(trie, &node, id)?;
                let id = allocate(trie, terminals, id, node.pos, |trie| {
                    update_terminal_id(trie, &node, NOT_A_TERMINAL_ID)
                })?;
                return Ok(InsertedWord {
                    pos: node.pos,
                    terminal_id: id,
                    was_word: false,
                });
            }

            i += k;
            if node.has_children() {
                parent_pos = node.pos;
                head = node.children_pos;
                continue;
            }

            // Leaf extension.
            let id = terminals.next_terminal_id();
            let (array, nodes) = append_array(trie, &[terminal_node(&word[i..], node.pos, id)])?;
            update_children_pos(trie, &node, array)?;
            let id = allocate(trie, terminals, id, nodes[0], delete_new_node(nodes[0]))?;
            return Ok(InsertedWord {
                pos: nodes[0],
                terminal_id: id,
                was_word: false,
            });
        }

        // Split `node` after k code points.
        let ends_at_split = k == rest.len();
        let head_id = if ends_at_split {
            terminals.next_terminal_id()
        } else {
            NOT_A_TERMINAL_ID
        };
        let head_flags = if ends_at_split {
            PtNodeFlags::IS_TERMINAL
        } else {
            PtNodeFlags::empty()
        };
        let (split_array, split_nodes) = append_array(
            trie,
            &[NewPtNode {
                flags: head_flags,
                parent_pos,
                code_points: &node.code_points[..k],
                terminal_id: head_id,
                children_pos: DictPos::NULL,
            }],
        )?;
        let split_pos = split_nodes[0];

        let moved = NewPtNode {
            parent_pos: split_pos,
            code_points: &node.code_points[k..],
            ..NewPtNode::from_params(&node)
        };
        let branch_id = terminals.next_terminal_id();
        let mut children = vec![moved];
        if !ends_at_split {
            children.push(terminal_node(&rest[k..], split_pos, branch_id));
        }
        let (children_array, children_pos) = append_array(trie, &children)?;
        let moved_pos = children_pos[0];

        let split_node = read_pt_node(trie, split_pos)?;
        update_children_pos(trie, &split_node, children_array)?;
        update_forward_link(trie, chain.last_forward_link_pos, split_array)?;

        if node.has_children() {
            let grandchildren = read_array_chain(trie, node.children_pos)?;
            for child in &grandchildren.nodes {
                update_parent_pos(trie, child.pos, moved_pos)?;
            }
        }
        if node.is_terminal() {
            terminals.set_position(node.terminal_id, moved_pos)?;
        }
        update_flags(trie, node.pos, node.flags | PtNodeFlags::IS_DELETED)?;

        // The split is structurally complete; only the new word's id remains.
        let (pos, terminal_id) = if ends_at_split {
            let id = allocate(trie, terminals, head_id, split_pos, |trie| {
                let split_node = read_pt_node(trie, split_pos)?;
                update_terminal_id(trie, &split_node, NOT_A_TERMINAL_ID)
            })?;
            (split_pos, id)
        } else {
            let branch_pos = children_pos[1];
            let id = allocate(trie, terminals, branch_id, branch_pos, delete_new_node(branch_pos))?;
            (branch_pos, id)
        };
        return Ok(InsertedWord {
            pos,
            terminal_id,
            was_word: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::word_to_code_points;
    use crate::trie::{find_word_node, read_word_at};

    fn empty() -> (ExtendableBuffer, TerminalPositionLookupTable) {
        let mut trie = ExtendableBuffer::new(1 << 16);
        crate::trie::node::append_empty_array(&mut trie).unwrap();
        (trie, TerminalPositionLookupTable::new(ExtendableBuffer::new(1 << 16), 1 << 16))
    }

    fn insert(trie: &mut ExtendableBuffer, terminals: &mut TerminalPositionLookupTable, w: &str) -> InsertedWord {
        insert_word(trie, terminals, &word_to_code_points(w)).unwrap()
    }

    #[test]
    fn test_insert_and_find() {
        let (mut trie, mut terminals) = empty();
        let words = ["hello", "help", "he", "world", "helping", "a"];
        let mut ids = Vec::new();
        for w in words {
            let inserted = insert(&mut trie, &mut terminals, w);
            assert!(!inserted.was_word);
            ids.push(inserted.terminal_id);
        }
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);

        for (w, id) in words.iter().zip(&ids) {
            let node = find_word_node(&trie, &word_to_code_points(w)).unwrap().unwrap();
            assert!(node.represents_word());
            assert_eq!(node.terminal_id, *id);
            assert_eq!(terminals.position_of(*id).unwrap(), Some(node.pos));
            assert_eq!(read_word_at(&trie, node.pos).unwrap(), word_to_code_points(w));
        }

        // Prefixes that are only branch points are not words.
        let hel = find_word_node(&trie, &word_to_code_points("hel")).unwrap().unwrap();
        assert!(!hel.is_terminal());
        assert!(find_word_node(&trie, &word_to_code_points("wor")).unwrap().is_none());
        assert!(find_word_node(&trie, &word_to_code_points("helpx")).unwrap().is_none());
    }

    #[test]
    fn test_full_terminal_table_leaves_no_word() {
        let mut trie = ExtendableBuffer::new(1 << 16);
        crate::trie::node::append_empty_array(&mut trie).unwrap();
        // Room for three ids.
        let mut terminals = TerminalPositionLookupTable::new(ExtendableBuffer::new(12), 12);
        for w in ["ab", "ac", "hello"] {
            insert(&mut trie, &mut terminals, w);
        }

        for w in ["a", "b", "abc", "ad", "he", "help"] {
            let err = insert_word(&mut trie, &mut terminals, &word_to_code_points(w)).unwrap_err();
            assert!(matches!(err, DictError::CapacityExceeded { .. }), "{w}");
            let found = find_word_node(&trie, &word_to_code_points(w)).unwrap();
            assert!(found.map_or(true, |n| !n.is_terminal()), "{w} left behind as a word");
        }
        assert_eq!(terminals.next_terminal_id(), 3);
        for (w, id) in [("ab", 0), ("ac", 1), ("hello", 2)] {
            let node = find_word_node(&trie, &word_to_code_points(w)).unwrap().unwrap();
            assert_eq!(node.terminal_id, id);
            assert_eq!(terminals.position_of(id).unwrap(), Some(node.pos));
        }
    }

    #[test]
    fn test_reinsert_is_idempotent() {
        let (mut trie, mut terminals) = empty();
        let first = insert(&mut trie, &mut terminals, "cat");
        let tail = trie.tail_position();
        let again = insert(&mut trie, &mut terminals, "cat");
        assert_eq!(again.terminal_id, first.terminal_id);
        assert!(again.was_word);
        assert_eq!(trie.tail_position(), tail);
    }

    #[test]
    fn test_split_moves_terminal_and_children() {
        let (mut trie, mut terminals) = empty();
        let abcd = insert(&mut trie, &mut terminals, "abcd");
        let abcde = insert(&mut trie, &mut terminals, "abcde");
        // Split "abcd" at "ab".
        insert(&mut trie, &mut terminals, "abx");

        let moved = terminals.position_of(abcd.terminal_id).unwrap().unwrap();
        assert_ne!(moved, abcd.pos);
        assert_eq!(read_word_at(&trie, moved).unwrap(), word_to_code_points("abcd"));
        let e = terminals.position_of(abcde.terminal_id).unwrap().unwrap();
        assert_eq!(read_word_at(&trie, e).unwrap(), word_to_code_points("abcde"));
        assert!(read_pt_node(&trie, abcd.pos).unwrap().is_deleted());
    }

    #[test]
    fn test_invalid_words() {
        let (mut trie, mut terminals) = empty();
        assert!(matches!(
            insert_word(&mut trie, &mut terminals, &[]),
            Err(DictError::InvalidWord(_))
        ));
        let long = vec![u32::from('a'); MAX_WORD_LENGTH + 1];
        assert!(insert_word(&mut trie, &mut terminals, &long).is_err());
    }
}
