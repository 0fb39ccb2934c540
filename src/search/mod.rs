//! Suggestion search frontier.
//!
//! A [`DicNode`] is one point of the frontier: a trie node plus the code
//! points on the path to it and the bigram context it was seeded with.
//! Expansion only reads the trie and the content stores.

use std::collections::HashMap;

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::buffer::DictPos;
use crate::dictionary::Dictionary;
use crate::encoding::{common_prefix_len, word_to_code_points, CodePoints};
use crate::error::{DictError, Result};
use crate::trie::node::{read_array_chain, ROOT_POS};
use crate::{TerminalId, MAX_PROBABILITY, MAX_WORD_LENGTH, NOT_A_PROBABILITY, NOT_A_TERMINAL_ID};

/// Bigram entries examined per previous word.
pub const MAX_BIGRAMS_CONSIDERED_PER_CONTEXT: usize = 500;

/// Divisor spreading a static bigram over the headroom above its unigram.
const STATIC_BIGRAM_STEP: f32 = 16.5;

/// Highest static bigram level; stored probabilities are scaled into `0..=15`.
const MAX_STATIC_BIGRAM_LEVEL: i32 = 15;

// =============================================================================
// Frontier nodes
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct DicNode {
    pos: DictPos,
    children_pos: DictPos,
    code_points: CodePoints,
    terminal_id: TerminalId,
    unigram_probability: i32,
    is_blacklisted: bool,
    prev_terminal_id: TerminalId,
}

impl DicNode {
    /// Root of a fresh input with no previous word.
    pub fn init_as_root(_dict: &Dictionary) -> Self {
        Self::root(NOT_A_TERMINAL_ID)
    }

    /// Root continuing a phrase whose last word is `prev_terminal_id`.
    pub fn init_as_root_with_previous_word(_dict: &Dictionary, prev_terminal_id: TerminalId) -> Self {
        Self::root(prev_terminal_id)
    }

    fn root(prev_terminal_id: TerminalId) -> Self {
        Self {
            pos: DictPos::NULL,
            children_pos: ROOT_POS,
            code_points: CodePoints::new(),
            terminal_id: NOT_A_TERMINAL_ID,
            unigram_probability: NOT_A_PROBABILITY,
            is_blacklisted: false,
            prev_terminal_id,
        }
    }

    pub fn is_root(&self) -> bool {
        self.pos.is_null()
    }

    /// Trie node position; NULL for a root.
    pub fn pos(&self) -> DictPos {
        self.pos
    }

    /// Code points from the root to the end of this node's label.
    pub fn code_points(&self) -> &[u32] {
        &self.code_points
    }

    /// Terminal id if this node currently represents a word.
    pub fn terminal_id(&self) -> Option<TerminalId> {
        (self.terminal_id != NOT_A_TERMINAL_ID).then_some(self.terminal_id)
    }

    pub fn unigram_probability(&self) -> i32 {
        self.unigram_probability
    }

    pub fn is_blacklisted(&self) -> bool {
        self.is_blacklisted
    }

    pub fn prev_terminal_id(&self) -> Option<TerminalId> {
        (self.prev_terminal_id != NOT_A_TERMINAL_ID).then_some(self.prev_terminal_id)
    }

    pub fn has_children(&self) -> bool {
        !self.children_pos.is_null()
    }
}

/// Every live child of `node`, in array order.
pub fn get_all_child_dic_nodes(dict: &Dictionary, node: &DicNode) -> Result<Vec<DicNode>> {
    if !node.has_children() {
        return Ok(Vec::new());
    }
    let chain = read_array_chain(&dict.buffers().trie, node.children_pos)?;
    let mut children = Vec::with_capacity(chain.live_node_count());
    for child in chain.live_nodes() {
        let mut code_points = node.code_points.clone();
        code_points.extend_from_slice(&child.code_points);
        if code_points.len() > MAX_WORD_LENGTH {
            return Err(DictError::corrupt(format!(
                "path through node {} is longer than {MAX_WORD_LENGTH}",
                child.pos.raw()
            )));
        }
        let (terminal_id, unigram_probability) = if child.represents_word() {
            (child.terminal_id, dict.probability_of_id(child.terminal_id)?)
        } else {
            (NOT_A_TERMINAL_ID, NOT_A_PROBABILITY)
        };
        children.push(DicNode {
            pos: child.pos,
            children_pos: child.children_pos,
            code_points,
            terminal_id,
            unigram_probability,
            is_blacklisted: child.is_blacklisted(),
            prev_terminal_id: node.prev_terminal_id,
        });
    }
    Ok(children)
}

// =============================================================================
// Scoring
// =============================================================================

/// Bigram probabilities per previous word, loaded on first use.
#[derive(Debug, Default)]
pub struct MultiBigramMap {
    contexts: HashMap<TerminalId, HashMap<TerminalId, i32>>,
}

impl MultiBigramMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective probability of `prev -> target`, if `target` is among the
    /// first [`MAX_BIGRAMS_CONSIDERED_PER_CONTEXT`] entries of `prev`.
    pub fn bigram_probability(&mut self, dict: &Dictionary, prev: TerminalId, target: TerminalId) -> Result<Option<i32>> {
        if !self.contexts.contains_key(&prev) {
            let loaded = Self::load(dict, prev)?;
            self.contexts.insert(prev, loaded);
        }
        Ok(self.contexts.get(&prev).and_then(|m| m.get(&target)).copied())
    }

    fn load(dict: &Dictionary, prev: TerminalId) -> Result<HashMap<TerminalId, i32>> {
        let mut map = HashMap::new();
        for item in dict
            .buffers()
            .bigrams
            .iter_list(prev)?
            .take(MAX_BIGRAMS_CONSIDERED_PER_CONTEXT)
        {
            let (_, entry) = item?;
            if entry.is_valid {
                let probability = dict.effective_probability(entry.probability, entry.historical_info.as_ref());
                map.insert(entry.target, probability);
            }
        }
        Ok(map)
    }
}

fn backoff(unigram: i32) -> i32 {
    unigram
}

/// Probability of a word given its unigram and, if any, the bigram from the
/// previous word.
pub fn combined_probability(is_decaying: bool, unigram: i32, bigram: Option<i32>) -> i32 {
    let u = unigram.clamp(0, MAX_PROBABILITY);
    match bigram {
        Some(b) if is_decaying => b,
        Some(b) => {
            let level = b.clamp(0, MAX_PROBABILITY) * MAX_STATIC_BIGRAM_LEVEL / MAX_PROBABILITY;
            let headroom = (MAX_PROBABILITY - u) as f32;
            (u + ((level + 1) as f32 * headroom / STATIC_BIGRAM_STEP) as i32).min(MAX_PROBABILITY)
        }
        None => backoff(u),
    }
}

/// 0.0 for the most probable word, 1.0 for the least.
pub fn probability_to_cost(probability: i32) -> f32 {
    (MAX_PROBABILITY - probability.clamp(0, MAX_PROBABILITY)) as f32 / MAX_PROBABILITY as f32
}

fn score(dict: &Dictionary, node: &DicNode, bigrams: &mut MultiBigramMap) -> Result<(f32, bool)> {
    let bigram = match (node.prev_terminal_id(), node.terminal_id()) {
        (Some(prev), Some(id)) => bigrams.bigram_probability(dict, prev, id)?,
        _ => None,
    };
    let probability = combined_probability(dict.header().is_decaying, node.unigram_probability, bigram);
    Ok((probability_to_cost(probability), bigram.is_some()))
}

/// Cost of committing to `node` as the next word in its bigram context.
pub fn get_bigram_node_improbability(dict: &Dictionary, node: &DicNode, bigrams: &mut MultiBigramMap) -> Result<f32> {
    score(dict, node, bigrams).map(|(cost, _)| cost)
}

// =============================================================================
// Prediction
// =============================================================================

bitflags! {
    /// Provenance of a [`SuggestionCandidate`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CandidateFlags: u8 {
        const EXACT_MATCH = 0x01;
        const FROM_BIGRAM = 0x02;
        const SHORTCUT = 0x04;
        const WHITELIST = 0x08;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SuggestionCandidate {
    pub code_points: CodePoints,
    /// Lower is better.
    pub cost: f32,
    pub flags: CandidateFlags,
}

/// Receives candidates; ranking and truncation are up to the implementor.
pub trait SuggestionCollector {
    fn add(&mut self, candidate: SuggestionCandidate);
}

impl SuggestionCollector for Vec<SuggestionCandidate> {
    fn add(&mut self, candidate: SuggestionCandidate) {
        self.push(candidate);
    }
}

#[derive(Clone, Debug)]
pub struct SearchOptions {
    /// Frontier nodes expanded before the search gives up.
    pub max_expanded_nodes: usize,
    /// Code points a completion may add beyond the prefix.
    pub max_completion_length: usize,
    pub include_shortcuts: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_expanded_nodes: 10_000,
            max_completion_length: MAX_WORD_LENGTH,
            include_shortcuts: true,
        }
    }
}

/// Emit every word starting with `prefix`, plus the shortcuts of those
/// words, to `collector`. `extra_cost` is added to every candidate. Returns
/// the number of candidates emitted.
pub fn predict<C>(
    dict: &Dictionary,
    prefix: &str,
    prev_word: Option<&str>,
    options: &SearchOptions,
    extra_cost: f32,
    collector: &mut C,
) -> Result<usize>
where
    C: SuggestionCollector + ?Sized,
{
    let prefix = word_to_code_points(prefix);
    let prev = match prev_word {
        Some(word) => dict.get_terminal_id(word)?,
        None => None,
    };
    let root = match prev {
        Some(id) => DicNode::init_as_root_with_previous_word(dict, id),
        None => DicNode::init_as_root(dict),
    };

    let mut bigrams = MultiBigramMap::new();
    let mut stack = vec![root];
    let mut expanded = 0;
    let mut emitted = 0;
    while let Some(node) = stack.pop() {
        if expanded == options.max_expanded_nodes {
            warn!(expanded, "search: frontier limit reached");
            break;
        }
        expanded += 1;

        let path = node.code_points();
        if common_prefix_len(path, &prefix[..]) < path.len().min(prefix.len()) {
            continue;
        }

        if path.len() >= prefix.len() && !node.is_blacklisted {
            if let Some(id) = node.terminal_id() {
                let (improbability, from_bigram) = score(dict, &node, &mut bigrams)?;
                let cost = improbability + extra_cost;
                let mut flags = CandidateFlags::empty();
                flags.set(CandidateFlags::EXACT_MATCH, path.len() == prefix.len());
                flags.set(CandidateFlags::FROM_BIGRAM, from_bigram);
                collector.add(SuggestionCandidate {
                    code_points: node.code_points.clone(),
                    cost,
                    flags,
                });
                emitted += 1;

                if options.include_shortcuts {
                    for (_, shortcut) in dict.buffers().shortcuts.valid_entries(id)? {
                        let mut flags = CandidateFlags::SHORTCUT;
                        flags.set(CandidateFlags::WHITELIST, shortcut.is_whitelist());
                        collector.add(SuggestionCandidate {
                            code_points: shortcut.target,
                            cost,
                            flags,
                        });
                        emitted += 1;
                    }
                }
            }
        }

        if path.len() < prefix.len() + options.max_completion_length {
            let children = get_all_child_dic_nodes(dict, &node)?;
            stack.extend(children.into_iter().rev());
        }
    }

    debug!(expanded, emitted, "search: prediction finished");
    Ok(emitted)
}
