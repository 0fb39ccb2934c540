//! Shared single-writer, many-reader access to one flushed dictionary.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::info;

use crate::config::Config;
use crate::dictionary::{Dictionary, UnigramProperty, WordBigram};
use crate::error::Result;
use crate::header::HeaderPolicy;
use crate::search::{predict, SearchOptions, SuggestionCandidate};

/// A [`Dictionary`] bound to its file set and guarded by a read-write lock.
///
/// Lookups take the read lock. Mutations and compaction take the write lock,
/// so a reader never sees a half-built buffer set; the compacted set replaces
/// the old one only after it has been flushed.
pub struct DictionaryHandle {
    inner: RwLock<Dictionary>,
    dir: PathBuf,
    name: String,
}

impl DictionaryHandle {
    /// Open the writable file set `<dir>/<name>.*`.
    pub fn open(dir: impl Into<PathBuf>, name: impl Into<String>, config: Config) -> Result<Self> {
        let dir = dir.into();
        let name = name.into();
        let dict = Dictionary::open(&dir, &name, true, config)?;
        Ok(Self {
            inner: RwLock::new(dict),
            dir,
            name,
        })
    }

    /// Create an empty dictionary and flush it as `<dir>/<name>.*`.
    pub fn create(dir: impl Into<PathBuf>, name: impl Into<String>, header: HeaderPolicy, config: Config) -> Result<Self> {
        let dir = dir.into();
        let name = name.into();
        let mut dict = Dictionary::create(header, config)?;
        dict.flush(&dir, &name)?;
        info!(dir = %dir.display(), name = %name, "created dictionary");
        Ok(Self {
            inner: RwLock::new(dict),
            dir,
            name,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&Dictionary) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run `f` under the write lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut Dictionary) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn add_unigram(&self, word: &str, property: &UnigramProperty) -> Result<bool> {
        self.inner.write().add_unigram(word, property)
    }

    pub fn add_bigram(&self, prev: &str, word: &str, probability: i32, timestamp: u32) -> Result<bool> {
        self.inner.write().add_bigram(prev, word, probability, timestamp)
    }

    pub fn get_probability(&self, word: &str) -> Result<Option<i32>> {
        self.inner.read().get_probability(word)
    }

    pub fn get_bigrams(&self, word: &str) -> Result<Vec<WordBigram>> {
        self.inner.read().get_bigrams(word)
    }

    pub fn predict(&self, prefix: &str, prev_word: Option<&str>, options: &SearchOptions) -> Result<Vec<SuggestionCandidate>> {
        let mut out = Vec::new();
        predict(&self.inner.read(), prefix, prev_word, options, 0.0, &mut out)?;
        Ok(out)
    }

    pub fn needs_to_run_gc(&self) -> bool {
        self.inner.read().needs_to_run_gc()
    }

    /// Persist the current buffer set.
    pub fn flush(&self) -> Result<()> {
        self.inner.write().flush(&self.dir, &self.name)
    }

    /// Compact, persist the compacted set, then swap it in.
    pub fn flush_with_gc(&self) -> Result<()> {
        self.inner.write().flush_with_gc(&self.dir, &self.name)
    }
}

impl std::fmt::Debug for DictionaryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionaryHandle")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let handle = DictionaryHandle::create(dir.path(), "user", HeaderPolicy::new_static("en"), Config::default()).unwrap();
        assert!(handle.add_unigram("rust", &UnigramProperty::new(150)).unwrap());
        assert!(handle.add_unigram("rusty", &UnigramProperty::new(40)).unwrap());
        handle.add_bigram("rust", "rusty", 20, 0).unwrap();
        handle.flush().unwrap();
        drop(handle);

        let handle = DictionaryHandle::open(dir.path(), "user", Config::default()).unwrap();
        assert_eq!(handle.get_probability("rust").unwrap(), Some(150));
        assert_eq!(handle.get_bigrams("rust").unwrap().len(), 1);
        assert_eq!(handle.name(), "user");
        assert!(handle.read(|d| d.is_writable()));
    }

    #[test]
    fn test_flush_with_gc_swaps_in_compacted_set() {
        let dir = tempfile::tempdir().unwrap();
        let handle = DictionaryHandle::create(dir.path(), "user", HeaderPolicy::new_static("en"), Config::default()).unwrap();
        for w in ["one", "two", "three"] {
            handle.add_unigram(w, &UnigramProperty::new(10)).unwrap();
        }
        handle.write(|d| d.remove_unigram("two")).unwrap();
        let before = handle.read(|d| d.buffers().trie.tail_position());

        handle.flush_with_gc().unwrap();
        let after = handle.read(|d| d.buffers().trie.tail_position());
        assert!(after < before);
        assert_eq!(handle.get_probability("two").unwrap(), None);

        let reopened = Dictionary::open(dir.path(), "user", false, Config::default()).unwrap();
        assert_eq!(reopened.header().unigram_count, 2);
        assert_eq!(reopened.get_probability("three").unwrap(), Some(10));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Arc::new(
            DictionaryHandle::create(dir.path(), "user", HeaderPolicy::new_static("en"), Config::default()).unwrap(),
        );
        handle.add_unigram("base", &UnigramProperty::new(100)).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || {
                    for _ in 0..200 {
                        assert_eq!(handle.get_probability("base").unwrap(), Some(100));
                    }
                })
            })
            .collect();
        for i in 0..50 {
            handle.add_unigram(&format!("word{i}"), &UnigramProperty::new(i)).unwrap();
            if i % 10 == 0 {
                handle.flush_with_gc().unwrap();
            }
        }
        for r in readers {
            r.join().unwrap();
        }

        let candidates = handle.predict("word4", None, &SearchOptions::default()).unwrap();
        // word4 and word40..=word49
        assert_eq!(candidates.len(), 11);
    }
}
