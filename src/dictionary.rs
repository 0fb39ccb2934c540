//! Word-level API over a buffer set.

use std::path::Path;

use tracing::{debug, info};

use crate::config::Config;
use crate::content::{BigramEntry, ProbabilityEntry, ShortcutEntry};
use crate::decay::{DecayFunction, ForgettingCurve, HistoricalInfo};
use crate::dict_buffers::DictBuffers;
use crate::encoding::{code_points_to_word, word_to_code_points};
use crate::error::{DictError, Result};
use crate::gc::{run_gc, GcOutcome};
use crate::header::HeaderPolicy;
use crate::trie::node::{read_pt_node, update_flags, PtNodeFlags, PtNodeParams};
use crate::trie::update::insert_word;
use crate::trie::{find_word_node, read_word_at};
use crate::{TerminalId, MAX_PROBABILITY, NOT_A_PROBABILITY};

/// Attributes of a unigram being added.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnigramProperty {
    /// 0..=255, or `NOT_A_PROBABILITY` to let the decay function decide.
    pub probability: i32,
    /// Time of this occurrence, for decaying dictionaries.
    pub timestamp: u32,
    pub is_blacklisted: bool,
}

impl UnigramProperty {
    pub fn new(probability: i32) -> Self {
        Self {
            probability,
            timestamp: 0,
            is_blacklisted: false,
        }
    }

    pub fn at(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn blacklisted(mut self) -> Self {
        self.is_blacklisted = true;
        self
    }
}

/// A bigram continuation as seen by callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WordBigram {
    pub word: String,
    /// Effective probability at the dictionary's current time.
    pub probability: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WordShortcut {
    pub target: String,
    pub probability: u8,
}

fn clamp_probability(probability: i32) -> u8 {
    probability.clamp(0, MAX_PROBABILITY) as u8
}

/// A dictionary: one buffer set plus the decay function and clock used to
/// interpret it.
pub struct Dictionary {
    buffers: DictBuffers,
    decay: Box<dyn DecayFunction>,
    config: Config,
    writable: bool,
    now: u32,
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary")
            .field("header", &self.buffers.header)
            .field("writable", &self.writable)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

impl Dictionary {
    /// New, empty, writable dictionary held in memory until flushed.
    pub fn create(header: HeaderPolicy, config: Config) -> Result<Self> {
        let buffers = DictBuffers::new(header, &config)?;
        Ok(Self::from_buffers(buffers, config, true))
    }

    /// Open `<dir>/<name>.*`. Read-only dictionaries refuse every mutation.
    pub fn open(dir: &Path, name: &str, writable: bool, config: Config) -> Result<Self> {
        let buffers = DictBuffers::open(dir, name, writable, &config)?;
        Ok(Self::from_buffers(buffers, config, writable))
    }

    fn from_buffers(buffers: DictBuffers, config: Config, writable: bool) -> Self {
        let now = buffers.header.last_decayed_time;
        Self {
            buffers,
            decay: Box::new(ForgettingCurve),
            config,
            writable,
            now,
        }
    }

    /// Replace the default [`ForgettingCurve`].
    pub fn with_decay_function(mut self, decay: impl DecayFunction + 'static) -> Self {
        self.decay = Box::new(decay);
        self
    }

    /// Clock used by probability lookups and compaction (seconds).
    pub fn set_current_time(&mut self, now: u32) {
        self.now = now;
    }

    pub fn current_time(&self) -> u32 {
        self.now
    }

    pub fn header(&self) -> &HeaderPolicy {
        &self.buffers.header
    }

    pub fn buffers(&self) -> &DictBuffers {
        &self.buffers
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(DictError::ReadOnly)
        }
    }

    /// Live node of `word` if it currently represents a word.
    fn word_node(&self, word: &str) -> Result<Option<PtNodeParams>> {
        let node = find_word_node(&self.buffers.trie, &word_to_code_points(word))?;
        Ok(node.filter(PtNodeParams::represents_word))
    }

    fn require_word(&self, word: &str) -> Result<PtNodeParams> {
        self.word_node(word)?
            .ok_or_else(|| DictError::WordNotFound(word.to_owned()))
    }

    // =========================================================================
    // Unigrams
    // =========================================================================

    /// Add `word` or record another occurrence of it. Returns true if the
    /// word was not in the dictionary before.
    pub fn add_unigram(&mut self, word: &str, property: &UnigramProperty) -> Result<bool> {
        self.ensure_writable()?;
        let code_points = word_to_code_points(word);
        let inserted = insert_word(&mut self.buffers.trie, &mut self.buffers.terminals, &code_points)?;

        let node = read_pt_node(&self.buffers.trie, inserted.pos)?;
        let mut flags = node.flags;
        flags.set(PtNodeFlags::IS_BLACKLISTED, property.is_blacklisted);
        if flags != node.flags {
            update_flags(&mut self.buffers.trie, node.pos, flags)?;
        }

        let id = inserted.terminal_id;
        let entry = if self.buffers.has_historical_info() {
            let original = if inserted.was_word {
                self.buffers.probabilities.get(id)?.and_then(|e| e.historical_info)
            } else {
                None
            };
            let params = self.buffers.header.decay;
            let info = self
                .decay
                .updated_info(original.as_ref(), property.probability, &params, property.timestamp);
            ProbabilityEntry {
                probability: clamp_probability(property.probability),
                historical_info: Some(info),
            }
        } else {
            ProbabilityEntry {
                probability: clamp_probability(property.probability),
                historical_info: None,
            }
        };
        self.buffers.probabilities.set(id, &entry)?;

        if !inserted.was_word {
            self.buffers.header.unigram_count += 1;
        }
        debug!(word, terminal_id = id, new = !inserted.was_word, "added unigram");
        Ok(!inserted.was_word)
    }

    /// Schedule `word` for removal at the next compaction. Returns false if
    /// it is not a word.
    pub fn remove_unigram(&mut self, word: &str) -> Result<bool> {
        self.ensure_writable()?;
        let Some(node) = self.word_node(word)? else {
            return Ok(false);
        };
        update_flags(
            &mut self.buffers.trie,
            node.pos,
            node.flags | PtNodeFlags::WILL_BECOME_NON_TERMINAL,
        )?;
        self.buffers.header.unigram_count = self.buffers.header.unigram_count.saturating_sub(1);
        Ok(true)
    }

    pub fn get_terminal_id(&self, word: &str) -> Result<Option<TerminalId>> {
        Ok(self.word_node(word)?.map(|n| n.terminal_id))
    }

    /// Effective probability of `word` at the current time.
    pub fn get_probability(&self, word: &str) -> Result<Option<i32>> {
        match self.word_node(word)? {
            Some(node) => self.probability_of_id(node.terminal_id).map(Some),
            None => Ok(None),
        }
    }

    /// Effective unigram probability of a terminal; `NOT_A_PROBABILITY` if
    /// it has no entry.
    pub fn probability_of_id(&self, id: TerminalId) -> Result<i32> {
        Ok(match self.buffers.probabilities.get(id)? {
            Some(entry) => self.effective_probability(entry.probability, entry.historical_info.as_ref()),
            None => NOT_A_PROBABILITY,
        })
    }

    pub(crate) fn effective_probability(&self, probability: u8, info: Option<&HistoricalInfo>) -> i32 {
        match info {
            Some(info) => self
                .decay
                .decode_probability(info, &self.buffers.header.decay, self.now),
            None => i32::from(probability),
        }
    }

    /// Word of a terminal id, if the id currently names a word.
    pub fn word_of(&self, id: TerminalId) -> Result<Option<String>> {
        let Some(pos) = self.buffers.terminals.position_of(id)? else {
            return Ok(None);
        };
        let node = read_pt_node(&self.buffers.trie, pos)?;
        if !node.represents_word() {
            return Ok(None);
        }
        let code_points = read_word_at(&self.buffers.trie, pos)?;
        code_points_to_word(&code_points)
            .map(Some)
            .ok_or_else(|| DictError::corrupt(format!("word of terminal {id} is not valid text")))
    }

    // =========================================================================
    // Bigrams
    // =========================================================================

    /// Add or reinforce the bigram `prev -> word`. Both must be words.
    /// Returns true if the bigram is new.
    pub fn add_bigram(&mut self, prev: &str, word: &str, probability: i32, timestamp: u32) -> Result<bool> {
        self.ensure_writable()?;
        let source = self.require_word(prev)?;
        let target = self.require_word(word)?.terminal_id;
        let params = self.buffers.header.decay;
        let historical = self.buffers.has_historical_info();

        let list = self
            .buffers
            .bigrams
            .iter_list(source.terminal_id)?
            .collect::<Result<Vec<_>>>()?;
        let mut free_slot = None;
        let mut valid = Vec::new();
        for (pos, entry) in list {
            if !entry.is_valid {
                free_slot.get_or_insert(pos);
                continue;
            }
            if entry.target == target {
                let mut updated = entry;
                if historical {
                    updated.historical_info =
                        Some(self.decay.updated_info(entry.historical_info.as_ref(), probability, &params, timestamp));
                }
                updated.probability = clamp_probability(probability);
                self.buffers.bigrams.write_entry_at(pos, &updated)?;
                return Ok(false);
            }
            valid.push(entry);
        }

        let mut entry = BigramEntry::new(target, clamp_probability(probability));
        if historical {
            entry = entry.with_historical_info(self.decay.updated_info(None, probability, &params, timestamp));
        }
        match free_slot {
            Some(pos) => self.buffers.bigrams.write_entry_at(pos, &entry)?,
            None => {
                valid.push(entry);
                self.buffers.bigrams.append_list(source.terminal_id, &valid)?;
            }
        }
        if !source.flags.contains(PtNodeFlags::HAS_BIGRAMS) {
            update_flags(&mut self.buffers.trie, source.pos, source.flags | PtNodeFlags::HAS_BIGRAMS)?;
        }
        self.buffers.header.bigram_count += 1;
        Ok(true)
    }

    /// Returns false if the bigram did not exist.
    pub fn remove_bigram(&mut self, prev: &str, word: &str) -> Result<bool> {
        self.ensure_writable()?;
        let (Some(source), Some(target)) = (self.word_node(prev)?, self.word_node(word)?) else {
            return Ok(false);
        };
        let found = self
            .buffers
            .bigrams
            .valid_entries(source.terminal_id)?
            .into_iter()
            .find(|(_, e)| e.target == target.terminal_id);
        let Some((pos, _)) = found else {
            return Ok(false);
        };
        self.buffers.bigrams.invalidate_entry_at(pos)?;
        self.buffers.header.bigram_count = self.buffers.header.bigram_count.saturating_sub(1);
        Ok(true)
    }

    /// Bigram continuations of `word` that are still words.
    pub fn get_bigrams(&self, word: &str) -> Result<Vec<WordBigram>> {
        let Some(source) = self.word_node(word)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (_, entry) in self.buffers.bigrams.valid_entries(source.terminal_id)? {
            if let Some(target) = self.word_of(entry.target)? {
                out.push(WordBigram {
                    word: target,
                    probability: self.effective_probability(entry.probability, entry.historical_info.as_ref()),
                });
            }
        }
        Ok(out)
    }

    // =========================================================================
    // Shortcuts
    // =========================================================================

    /// Attach `target` as a shortcut of `word`, or update its probability (0..=15).
    pub fn add_shortcut(&mut self, word: &str, target: &str, probability: u8) -> Result<()> {
        self.ensure_writable()?;
        let source = self.require_word(word)?;
        let target = word_to_code_points(target);
        crate::trie::update::check_word(&target)?;

        let existing = self.buffers.shortcuts.valid_entries(source.terminal_id)?;
        if let Some((pos, _)) = existing.iter().find(|(_, e)| e.target == target) {
            return self.buffers.shortcuts.update_probability_at(*pos, probability);
        }
        let mut entries: Vec<ShortcutEntry> = existing.into_iter().map(|(_, e)| e).collect();
        entries.push(ShortcutEntry::new(target, probability));
        self.buffers.shortcuts.append_list(source.terminal_id, &entries)?;
        if !source.flags.contains(PtNodeFlags::HAS_SHORTCUTS) {
            update_flags(&mut self.buffers.trie, source.pos, source.flags | PtNodeFlags::HAS_SHORTCUTS)?;
        }
        Ok(())
    }

    pub fn get_shortcuts(&self, word: &str) -> Result<Vec<WordShortcut>> {
        let Some(source) = self.word_node(word)? else {
            return Ok(Vec::new());
        };
        self.buffers
            .shortcuts
            .valid_entries(source.terminal_id)?
            .into_iter()
            .map(|(_, e)| {
                code_points_to_word(&e.target)
                    .map(|target| WordShortcut {
                        target,
                        probability: e.probability,
                    })
                    .ok_or_else(|| DictError::corrupt("shortcut target is not valid text"))
            })
            .collect()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// True when a buffer is close to its cap or a decaying dictionary is
    /// over one of its ceilings.
    pub fn needs_to_run_gc(&self) -> bool {
        let header = &self.buffers.header;
        self.buffers.is_near_size_limit()
            || (header.is_decaying
                && (header.unigram_count > header.max_unigram_count || header.bigram_count > header.max_bigram_count))
    }

    fn gc(&mut self) -> Result<GcOutcome> {
        self.ensure_writable()?;
        run_gc(&mut self.buffers, self.decay.as_ref(), self.now, &self.config)
    }

    /// Compact in memory and switch to the compacted set.
    ///
    /// Decay and evictions are applied to the current set before the new one
    /// is built. If a later pass fails, those changes stay in place and a
    /// subsequent [`flush`](Self::flush) persists them; the word and bigram
    /// counts in the header are only rewritten by a successful compaction.
    pub fn compact(&mut self) -> Result<()> {
        let outcome = self.gc()?;
        self.buffers = outcome.buffers;
        Ok(())
    }

    /// Persist the current set as `<dir>/<name>.*`.
    pub fn flush(&mut self, dir: &Path, name: &str) -> Result<()> {
        self.buffers.flush(dir, name)
    }

    /// Compact, persist the compacted set, then switch to it. If anything
    /// fails the files on disk are the previous ones.
    pub fn flush_with_gc(&mut self, dir: &Path, name: &str) -> Result<()> {
        let outcome = self.gc()?;
        outcome.buffers.flush(dir, name)?;
        info!(
            name,
            unigrams = outcome.unigram_count,
            bigrams = outcome.bigram_count,
            "flushed compacted dictionary"
        );
        self.buffers = outcome.buffers;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::shortcut::WHITELIST_SHORTCUT_PROBABILITY;

    fn static_dict() -> Dictionary {
        Dictionary::create(HeaderPolicy::new_static("en"), Config::default()).unwrap()
    }

    #[test]
    fn test_unigrams() {
        let mut dict = static_dict();
        assert!(dict.add_unigram("the", &UnigramProperty::new(250)).unwrap());
        assert!(dict.add_unigram("then", &UnigramProperty::new(100)).unwrap());
        assert!(!dict.add_unigram("the", &UnigramProperty::new(240)).unwrap());

        assert_eq!(dict.get_probability("the").unwrap(), Some(240));
        assert_eq!(dict.get_probability("then").unwrap(), Some(100));
        assert_eq!(dict.get_probability("th").unwrap(), None);
        assert_eq!(dict.header().unigram_count, 2);

        let id = dict.get_terminal_id("then").unwrap().unwrap();
        assert_eq!(dict.word_of(id).unwrap().as_deref(), Some("then"));
    }

    #[test]
    fn test_remove_and_revive() {
        let mut dict = static_dict();
        dict.add_unigram("car", &UnigramProperty::new(50)).unwrap();
        dict.add_unigram("cart", &UnigramProperty::new(60)).unwrap();
        let id = dict.get_terminal_id("car").unwrap().unwrap();

        assert!(dict.remove_unigram("car").unwrap());
        assert!(!dict.remove_unigram("car").unwrap());
        assert_eq!(dict.get_probability("car").unwrap(), None);
        assert_eq!(dict.word_of(id).unwrap(), None);
        assert_eq!(dict.get_probability("cart").unwrap(), Some(60));

        assert!(dict.add_unigram("car", &UnigramProperty::new(70)).unwrap());
        assert_eq!(dict.get_terminal_id("car").unwrap(), Some(id));
        assert_eq!(dict.get_probability("car").unwrap(), Some(70));
    }

    #[test]
    fn test_bigrams() {
        let mut dict = static_dict();
        for w in ["i", "am", "was"] {
            dict.add_unigram(w, &UnigramProperty::new(100)).unwrap();
        }
        assert!(dict.add_bigram("i", "am", 30, 0).unwrap());
        assert!(dict.add_bigram("i", "was", 20, 0).unwrap());
        assert!(!dict.add_bigram("i", "am", 40, 0).unwrap());

        let bigrams = dict.get_bigrams("i").unwrap();
        assert_eq!(
            bigrams,
            vec![
                WordBigram { word: "am".into(), probability: 40 },
                WordBigram { word: "was".into(), probability: 20 },
            ]
        );

        assert!(dict.remove_bigram("i", "am").unwrap());
        assert!(!dict.remove_bigram("i", "am").unwrap());
        // The freed slot is reused.
        let tail = dict.buffers().bigrams.content_buffer().tail_position();
        assert!(dict.add_bigram("i", "am", 10, 0).unwrap());
        assert_eq!(dict.buffers().bigrams.content_buffer().tail_position(), tail);
        assert_eq!(dict.get_bigrams("i").unwrap().len(), 2);

        assert!(matches!(dict.add_bigram("i", "nope", 1, 0), Err(DictError::WordNotFound(_))));
        assert!(dict.get_bigrams("nope").unwrap().is_empty());
    }

    #[test]
    fn test_shortcuts() {
        let mut dict = static_dict();
        dict.add_unigram("thx", &UnigramProperty::new(10)).unwrap();
        dict.add_shortcut("thx", "thanks", 8).unwrap();
        dict.add_shortcut("thx", "thank you", WHITELIST_SHORTCUT_PROBABILITY).unwrap();
        dict.add_shortcut("thx", "thanks", 9).unwrap();

        let shortcuts = dict.get_shortcuts("thx").unwrap();
        assert_eq!(shortcuts.len(), 2);
        assert_eq!(shortcuts[0], WordShortcut { target: "thanks".into(), probability: 9 });
        assert_eq!(shortcuts[1].probability, WHITELIST_SHORTCUT_PROBABILITY);
    }

    #[test]
    fn test_decaying_probability() {
        let mut dict = Dictionary::create(HeaderPolicy::new_decaying("en", 100, 100), Config::default()).unwrap();
        dict.add_unigram("hi", &UnigramProperty::new(NOT_A_PROBABILITY).at(10)).unwrap();
        dict.set_current_time(10);
        let once = dict.get_probability("hi").unwrap().unwrap();
        dict.add_unigram("hi", &UnigramProperty::new(NOT_A_PROBABILITY).at(10)).unwrap();
        let twice = dict.get_probability("hi").unwrap().unwrap();
        assert!(twice > once);
    }

    #[test]
    fn test_read_only_refuses_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let mut dict = static_dict();
        dict.add_unigram("word", &UnigramProperty::new(1)).unwrap();
        dict.flush(dir.path(), "ro").unwrap();

        let mut ro = Dictionary::open(dir.path(), "ro", false, Config::default()).unwrap();
        assert_eq!(ro.get_probability("word").unwrap(), Some(1));
        assert!(matches!(ro.add_unigram("other", &UnigramProperty::new(1)), Err(DictError::ReadOnly)));
        assert!(matches!(ro.compact(), Err(DictError::ReadOnly)));
    }

    #[test]
    fn test_flush_with_gc_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut dict = static_dict();
        for (i, w) in ["alpha", "alphabet", "beta", "gamma"].iter().enumerate() {
            dict.add_unigram(w, &UnigramProperty::new(10 * (i as i32 + 1))).unwrap();
        }
        dict.add_bigram("alpha", "beta", 5, 0).unwrap();
        dict.add_shortcut("gamma", "γ", 3).unwrap();
        dict.remove_unigram("beta").unwrap();
        dict.flush_with_gc(dir.path(), "main").unwrap();

        let opened = Dictionary::open(dir.path(), "main", true, Config::default()).unwrap();
        assert_eq!(opened.header().unigram_count, 3);
        assert_eq!(opened.header().bigram_count, 0);
        assert_eq!(opened.get_probability("alphabet").unwrap(), Some(20));
        assert_eq!(opened.get_probability("beta").unwrap(), None);
        assert!(opened.get_bigrams("alpha").unwrap().is_empty());
        assert_eq!(opened.get_shortcuts("gamma").unwrap()[0].target, "γ");
        assert_eq!(opened.header().extended_region_size, 0);
    }

    #[test]
    fn test_extended_region_size_across_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let mut dict = static_dict();
        for w in ["one", "two", "three"] {
            dict.add_unigram(w, &UnigramProperty::new(1)).unwrap();
        }
        dict.flush_with_gc(dir.path(), "main").unwrap();
        let mut opened = Dictionary::open(dir.path(), "main", true, Config::default()).unwrap();
        assert_eq!(opened.header().extended_region_size, 0);

        opened.add_unigram("four", &UnigramProperty::new(1)).unwrap();
        let grown = opened.buffers().trie.used_extended_size() as u32;
        assert!(grown > 0);
        opened.flush(dir.path(), "main").unwrap();
        let mut opened = Dictionary::open(dir.path(), "main", true, Config::default()).unwrap();
        assert_eq!(opened.header().extended_region_size, grown);

        opened.add_unigram("five", &UnigramProperty::new(1)).unwrap();
        let more = opened.buffers().trie.used_extended_size() as u32;
        opened.flush(dir.path(), "main").unwrap();
        let opened = Dictionary::open(dir.path(), "main", false, Config::default()).unwrap();
        assert_eq!(opened.header().extended_region_size, grown + more);
    }

    #[test]
    fn test_decayed_probability_survives_compaction() {
        const DAY: u32 = 24 * 60 * 60;
        let mut dict = Dictionary::create(HeaderPolicy::new_decaying("en", 100, 100), Config::default()).unwrap();
        for _ in 0..4 {
            dict.add_unigram("often", &UnigramProperty::new(NOT_A_PROBABILITY).at(0)).unwrap();
        }
        dict.set_current_time(DAY);
        let before = dict.get_probability("often").unwrap();
        dict.compact().unwrap();
        assert_eq!(dict.get_probability("often").unwrap(), before);
        assert_eq!(before, Some(127));
    }

    #[test]
    fn test_failed_compaction_keeps_eviction_marks() {
        let mut dict = Dictionary::create(HeaderPolicy::new_decaying("en", 1, 100), Config::default()).unwrap();
        dict.add_unigram("kept", &UnigramProperty::new(200)).unwrap();
        dict.add_unigram("dropped", &UnigramProperty::new(10)).unwrap();

        // Run the passes but discard the result, as a failure after eviction would.
        let outcome = dict.gc().unwrap();
        drop(outcome);
        assert_eq!(dict.get_probability("dropped").unwrap(), None);
        assert!(dict.get_probability("kept").unwrap().is_some());

        dict.compact().unwrap();
        assert_eq!(dict.header().unigram_count, 1);
        assert!(dict.get_probability("kept").unwrap().is_some());
    }
}
