//! The complete buffer set of one dictionary and its file representation.
//!
//! A set is stored as `<dir>/<name><suffix>` for each of [`FILE_SUFFIXES`].
//! Flushing stages every file next to its destination before any of them is
//! swapped in, so a failure while writing leaves the previous set in place.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::buffer::{ExtendableBuffer, FixedRegion};
use crate::config::Config;
use crate::content::{
    BigramDictContent, ProbabilityDictContent, ShortcutDictContent, SparseTable, TerminalPositionLookupTable,
};
use crate::error::{DictError, Result};
use crate::header::HeaderPolicy;
use crate::trie::node::{append_empty_array, ROOT_POS};

pub const HEADER_SUFFIX: &str = ".header";
pub const TRIE_SUFFIX: &str = ".trie";
pub const TERMINAL_TABLE_SUFFIX: &str = ".tat";
pub const PROBABILITY_SUFFIX: &str = ".freq";
pub const BIGRAM_LOOKUP_SUFFIX: &str = ".bigram_lookup";
pub const BIGRAM_INDEX_SUFFIX: &str = ".bigram_index";
pub const BIGRAM_CONTENT_SUFFIX: &str = ".bigram";
pub const SHORTCUT_LOOKUP_SUFFIX: &str = ".shortcut_lookup";
pub const SHORTCUT_INDEX_SUFFIX: &str = ".shortcut_index";
pub const SHORTCUT_CONTENT_SUFFIX: &str = ".shortcut";

/// Every file of a set, header first.
pub const FILE_SUFFIXES: [&str; 10] = [
    HEADER_SUFFIX,
    TRIE_SUFFIX,
    TERMINAL_TABLE_SUFFIX,
    PROBABILITY_SUFFIX,
    BIGRAM_LOOKUP_SUFFIX,
    BIGRAM_INDEX_SUFFIX,
    BIGRAM_CONTENT_SUFFIX,
    SHORTCUT_LOOKUP_SUFFIX,
    SHORTCUT_INDEX_SUFFIX,
    SHORTCUT_CONTENT_SUFFIX,
];

/// Header, trie and every content store of one dictionary.
#[derive(Debug)]
pub struct DictBuffers {
    pub header: HeaderPolicy,
    pub trie: ExtendableBuffer,
    pub terminals: TerminalPositionLookupTable,
    pub probabilities: ProbabilityDictContent,
    pub bigrams: BigramDictContent,
    pub shortcuts: ShortcutDictContent,
    /// Trie bytes already in the extended region when this set was loaded or
    /// built; only growth past this is added to the header on flush.
    extended_baseline: usize,
}

impl DictBuffers {
    /// Empty set: an empty root array and empty stores.
    pub fn new(header: HeaderPolicy, config: &Config) -> Result<Self> {
        let mut buffers = Self::with_empty_trie(header, config)?;
        let root = append_empty_array(&mut buffers.trie)?;
        debug_assert_eq!(root, ROOT_POS);
        buffers.reset_extended_baseline();
        Ok(buffers)
    }

    /// Empty stores and a trie buffer with no root array yet, for compaction
    /// to write into.
    pub(crate) fn with_empty_trie(header: HeaderPolicy, config: &Config) -> Result<Self> {
        let max = config.max_dictionary_size;
        let historical = header.is_decaying;
        Ok(Self {
            header,
            trie: ExtendableBuffer::new(max),
            terminals: TerminalPositionLookupTable::new(ExtendableBuffer::new(max), max),
            probabilities: ProbabilityDictContent::new(ExtendableBuffer::new(max), historical),
            bigrams: BigramDictContent::new(
                SparseTable::new(ExtendableBuffer::new(max), ExtendableBuffer::new(max)),
                ExtendableBuffer::new(max),
                historical,
            ),
            shortcuts: ShortcutDictContent::new(
                SparseTable::new(ExtendableBuffer::new(max), ExtendableBuffer::new(max)),
                ExtendableBuffer::new(max),
            ),
            extended_baseline: 0,
        })
    }

    /// Open a flushed set. Writable sets map copy-on-write; changes reach the
    /// files only through [`flush`](Self::flush).
    pub fn open(dir: &Path, name: &str, writable: bool, config: &Config) -> Result<Self> {
        let header_bytes = std::fs::read(file_path(dir, name, HEADER_SUFFIX))?;
        let header = HeaderPolicy::from_bytes(&header_bytes)?;
        let historical = header.is_decaying;
        let max = config.max_extended_region_size;
        let open = |suffix: &str| open_buffer(&file_path(dir, name, suffix), writable, max);

        let trie = open(TRIE_SUFFIX)?;
        if trie.is_empty() {
            return Err(DictError::corrupt("trie file has no root array"));
        }
        let buffers = Self {
            trie,
            terminals: TerminalPositionLookupTable::new(open(TERMINAL_TABLE_SUFFIX)?, config.max_dictionary_size),
            probabilities: ProbabilityDictContent::new(open(PROBABILITY_SUFFIX)?, historical),
            bigrams: BigramDictContent::new(
                SparseTable::new(open(BIGRAM_LOOKUP_SUFFIX)?, open(BIGRAM_INDEX_SUFFIX)?),
                open(BIGRAM_CONTENT_SUFFIX)?,
                historical,
            ),
            shortcuts: ShortcutDictContent::new(
                SparseTable::new(open(SHORTCUT_LOOKUP_SUFFIX)?, open(SHORTCUT_INDEX_SUFFIX)?),
                open(SHORTCUT_CONTENT_SUFFIX)?,
            ),
            header,
            extended_baseline: 0,
        };
        debug!(
            dir = %dir.display(),
            name,
            writable,
            trie_bytes = buffers.trie.tail_position(),
            "opened dictionary buffers"
        );
        Ok(buffers)
    }

    /// Treat the trie as it is now as the on-disk layout. Compaction calls
    /// this on the set it builds so the next flush records no extended region.
    pub(crate) fn reset_extended_baseline(&mut self) {
        self.extended_baseline = self.trie.used_extended_size();
    }

    /// Extended region size to record on the next flush: the loaded value
    /// plus whatever the trie grew by since.
    pub fn extended_region_size(&self) -> u32 {
        let grown = self.trie.used_extended_size().saturating_sub(self.extended_baseline);
        self.header
            .extended_region_size
            .saturating_add(u32::try_from(grown).unwrap_or(u32::MAX))
    }

    /// Write the whole set to `<dir>/<name>.*`.
    pub fn flush(&self, dir: &Path, name: &str) -> Result<()> {
        let mut header = self.header.clone();
        header.extended_region_size = self.extended_region_size();
        let header_bytes = header.to_bytes();

        std::fs::create_dir_all(dir)?;
        let mut staged = Vec::with_capacity(FILE_SUFFIXES.len());
        for suffix in FILE_SUFFIXES {
            let mut tmp = NamedTempFile::new_in(dir)?;
            {
                let mut writer = BufWriter::new(tmp.as_file_mut());
                match self.buffer_for(suffix) {
                    Some(buffer) => buffer.write_to(&mut writer)?,
                    None => writer.write_all(&header_bytes)?,
                }
                writer.flush()?;
            }
            tmp.as_file().sync_all()?;
            staged.push((tmp, file_path(dir, name, suffix)));
        }
        for (tmp, path) in staged {
            tmp.persist(&path).map_err(|e| DictError::Persist {
                path,
                source: e.error,
            })?;
        }
        info!(
            dir = %dir.display(),
            name,
            unigrams = self.header.unigram_count,
            bigrams = self.header.bigram_count,
            "flushed dictionary"
        );
        Ok(())
    }

    /// Buffer persisted under `suffix`; `None` for the header.
    fn buffer_for(&self, suffix: &str) -> Option<&ExtendableBuffer> {
        Some(match suffix {
            TRIE_SUFFIX => &self.trie,
            TERMINAL_TABLE_SUFFIX => self.terminals.buffer(),
            PROBABILITY_SUFFIX => self.probabilities.buffer(),
            BIGRAM_LOOKUP_SUFFIX => self.bigrams.table().lookup_buffer(),
            BIGRAM_INDEX_SUFFIX => self.bigrams.table().address_buffer(),
            BIGRAM_CONTENT_SUFFIX => self.bigrams.content_buffer(),
            SHORTCUT_LOOKUP_SUFFIX => self.shortcuts.table().lookup_buffer(),
            SHORTCUT_INDEX_SUFFIX => self.shortcuts.table().address_buffer(),
            SHORTCUT_CONTENT_SUFFIX => self.shortcuts.content_buffer(),
            _ => return None,
        })
    }

    pub fn has_historical_info(&self) -> bool {
        self.header.is_decaying
    }

    /// True once any buffer is close to its cap.
    pub fn is_near_size_limit(&self) -> bool {
        self.trie.is_near_size_limit()
            || self.terminals.is_near_size_limit()
            || self.probabilities.is_near_size_limit()
            || self.bigrams.is_near_size_limit()
            || self.shortcuts.is_near_size_limit()
    }
}

pub fn file_path(dir: &Path, name: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{name}{suffix}"))
}

fn open_buffer(path: &Path, writable: bool, max_extended_size: usize) -> Result<ExtendableBuffer> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    if len >= u64::from(u32::MAX) {
        return Err(DictError::corrupt(format!("{} is too large", path.display())));
    }
    let fixed = if len == 0 {
        FixedRegion::Owned(Vec::new())
    } else if writable {
        FixedRegion::CopyOnWrite(unsafe { MmapOptions::new().map_copy(&file) }?)
    } else {
        FixedRegion::ReadOnly(unsafe { Mmap::map(&file) }?)
    };
    Ok(ExtendableBuffer::with_fixed(fixed, max_extended_size))
}
