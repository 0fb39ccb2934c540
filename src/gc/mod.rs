//! Garbage collection and compaction of a buffer set.
//!
//! [`run_gc`] rewrites a source set into a fresh one in strictly ordered
//! passes:
//!
//! 1. Post-order: decay unigrams, mark useless nodes deleted, count words
//! 2. Decaying dictionaries over their unigram ceiling: evict the weakest
//!    words, then re-mark so evicted leaves are deleted
//! 3. Post-order: decay bigrams, invalidate dead ones, count the rest
//! 4. Decaying dictionaries over their bigram ceiling: invalidate the weakest
//! 5. Array-level pre-order: copy live nodes into the new trie
//! 6. Renumber terminal ids and copy every content store
//! 7. Array-level pre-order over the new trie: rewrite position fields
//! 8. Post-order over the new trie: terminal ids and content flags
//! 9. Header with the new counts
//!
//! Passes 1-4 update the source set in memory only. The new set is returned
//! unflushed; persisting and swapping it in is the caller's job.

mod listeners;

pub use listeners::{
    DictPositionRelocationMap, PlaceAndWriteValidNodes, UnigramPassMode, UpdateAllPositionFields,
    UpdateBigramProbability, UpdateFlagsAndTerminalIds, UpdateUnigramProbabilityAndMarkUseless,
};

use tracing::{debug, info, warn};

use crate::buffer::DictPos;
use crate::config::Config;
use crate::content::ProbabilityEntry;
use crate::decay::DecayFunction;
use crate::dict_buffers::DictBuffers;
use crate::error::Result;
use crate::trie::node::{read_pt_node, update_flags, PtNodeFlags};
use crate::trie::traverse::{traverse_array_level_pre_order, traverse_post_order};

/// Product of a successful [`run_gc`].
#[derive(Debug)]
pub struct GcOutcome {
    pub buffers: DictBuffers,
    pub unigram_count: u32,
    pub bigram_count: u32,
    pub relocation: DictPositionRelocationMap,
}

/// Something that may be evicted when a count exceeds its ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvictionCandidate {
    /// Node position (unigrams) or entry position (bigrams).
    pub pos: DictPos,
    pub probability: i32,
    pub timestamp: u32,
}

impl EvictionCandidate {
    /// Lowest probability first, then oldest, then lowest position.
    fn sort_key(&self) -> (i32, u32, DictPos) {
        (self.probability, self.timestamp, self.pos)
    }
}

/// Positions to evict so that at most `max_count` candidates survive.
pub fn select_entries_to_evict(mut candidates: Vec<EvictionCandidate>, max_count: usize) -> Vec<DictPos> {
    if candidates.len() <= max_count {
        return Vec::new();
    }
    let evict = candidates.len() - max_count;
    candidates.sort_unstable_by_key(EvictionCandidate::sort_key);
    candidates.into_iter().take(evict).map(|c| c.pos).collect()
}

fn unigram_candidates(source: &DictBuffers, decay: &dyn DecayFunction, now: u32) -> Result<Vec<EvictionCandidate>> {
    let params = source.header.decay;
    let mut out = Vec::new();
    for id in 0..source.terminals.next_terminal_id() {
        let Some(pos) = source.terminals.position_of(id)? else {
            continue;
        };
        let node = read_pt_node(&source.trie, pos)?;
        if !node.represents_word() {
            continue;
        }
        let (probability, timestamp) = match source.probabilities.get(id)? {
            Some(ProbabilityEntry {
                historical_info: Some(info),
                ..
            }) => (decay.decode_probability(&info, &params, now), info.timestamp),
            Some(entry) => (i32::from(entry.probability), 0),
            None => (0, 0),
        };
        out.push(EvictionCandidate {
            pos,
            probability,
            timestamp,
        });
    }
    Ok(out)
}

fn bigram_candidates(source: &DictBuffers, decay: &dyn DecayFunction, now: u32) -> Result<Vec<EvictionCandidate>> {
    let params = source.header.decay;
    let mut out = Vec::new();
    for id in 0..source.terminals.next_terminal_id() {
        let Some(source_pos) = source.terminals.position_of(id)? else {
            continue;
        };
        if !read_pt_node(&source.trie, source_pos)?.represents_word() {
            continue;
        }
        for (pos, entry) in source.bigrams.valid_entries(id)? {
            let (probability, timestamp) = match entry.historical_info {
                Some(info) => (decay.decode_probability(&info, &params, now), info.timestamp),
                None => (i32::from(entry.probability), 0),
            };
            out.push(EvictionCandidate {
                pos,
                probability,
                timestamp,
            });
        }
    }
    Ok(out)
}

fn truncate_unigrams(source: &mut DictBuffers, decay: &dyn DecayFunction, now: u32, max: u32) -> Result<usize> {
    let evicted = select_entries_to_evict(unigram_candidates(source, decay, now)?, max as usize);
    for &pos in &evicted {
        let node = read_pt_node(&source.trie, pos)?;
        update_flags(&mut source.trie, pos, node.flags | PtNodeFlags::WILL_BECOME_NON_TERMINAL)?;
    }
    Ok(evicted.len())
}

fn truncate_bigrams(source: &mut DictBuffers, decay: &dyn DecayFunction, now: u32, max: u32) -> Result<usize> {
    let evicted = select_entries_to_evict(bigram_candidates(source, decay, now)?, max as usize);
    for &pos in &evicted {
        source.bigrams.invalidate_entry_at(pos)?;
    }
    Ok(evicted.len())
}

/// Compact `source` into a new buffer set.
///
/// Passes 1 to 4 write decayed history, eviction marks and invalidated bigrams
/// into `source` itself, so an error after them leaves `source` with those
/// changes. The caller's durable files are never touched here.
pub fn run_gc(source: &mut DictBuffers, decay: &dyn DecayFunction, now: u32, config: &Config) -> Result<GcOutcome> {
    let is_decaying = source.has_historical_info();
    let max_unigrams = source.header.max_unigram_count;
    let max_bigrams = source.header.max_bigram_count;

    // 1
    let mut unigram_pass = UpdateUnigramProbabilityAndMarkUseless::new(decay, now, UnigramPassMode::UpdateAndMark);
    traverse_post_order(source, &mut unigram_pass)?;
    let mut unigram_count = unigram_pass.valid_unigram_count();
    debug!(
        unigrams = unigram_count,
        deleted_nodes = unigram_pass.deleted_node_count(),
        "gc: updated unigrams"
    );

    // 2
    if is_decaying && unigram_count > max_unigrams {
        let evicted = truncate_unigrams(source, decay, now, max_unigrams)?;
        warn!(current = unigram_count, max = max_unigrams, evicted, "gc: truncating unigrams");
        let mut mark_pass = UpdateUnigramProbabilityAndMarkUseless::new(decay, now, UnigramPassMode::MarkOnly);
        traverse_post_order(source, &mut mark_pass)?;
        unigram_count = mark_pass.valid_unigram_count();
    }

    // 3
    let mut bigram_pass = UpdateBigramProbability::new(decay, now);
    traverse_post_order(source, &mut bigram_pass)?;
    let bigram_count = bigram_pass.valid_bigram_count();
    debug!(
        bigrams = bigram_count,
        invalidated = bigram_pass.invalidated_count(),
        "gc: updated bigrams"
    );

    // 4
    if is_decaying && bigram_count > max_bigrams {
        let evicted = truncate_bigrams(source, decay, now, max_bigrams)?;
        warn!(current = bigram_count, max = max_bigrams, evicted, "gc: truncating bigrams");
    }

    // 5
    let mut target = DictBuffers::with_empty_trie(source.header.clone(), config)?;
    let mut relocation = DictPositionRelocationMap::default();
    let mut place_pass = PlaceAndWriteValidNodes::new(&mut target, &mut relocation);
    traverse_array_level_pre_order(source, &mut place_pass)?;
    let written_nodes = place_pass.written_nodes();
    debug!(
        nodes = written_nodes,
        trie_bytes = target.trie.tail_position(),
        "gc: relocated nodes"
    );

    // 6
    let id_map = target.terminals.run_gc()?;
    target.probabilities.run_gc(&id_map, &source.probabilities)?;
    let bigram_count = target.bigrams.run_gc(&id_map, &source.bigrams)?;
    target.shortcuts.run_gc(&id_map, &source.shortcuts)?;
    debug!(terminals = id_map.len(), bigrams = bigram_count, "gc: compacted content stores");

    // 7
    traverse_array_level_pre_order(&mut target, &mut UpdateAllPositionFields::new(&relocation))?;

    // 8
    let mut finalize_pass = UpdateFlagsAndTerminalIds::new(&id_map);
    traverse_post_order(&mut target, &mut finalize_pass)?;
    debug_assert_eq!(finalize_pass.unigram_count(), unigram_count);
    let unigram_count = finalize_pass.unigram_count();

    // 9
    target.header.unigram_count = unigram_count;
    target.header.bigram_count = bigram_count;
    target.header.extended_region_size = 0;
    target.reset_extended_baseline();
    target.header.last_decayed_time = now;

    info!(
        unigrams = unigram_count,
        bigrams = bigram_count,
        old_trie_bytes = source.trie.tail_position(),
        new_trie_bytes = target.trie.tail_position(),
        "gc: compaction finished"
    );
    Ok(GcOutcome {
        buffers: target,
        unigram_count,
        bigram_count,
        relocation,
    })
}
