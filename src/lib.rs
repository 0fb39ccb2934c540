//! # ptdict
//!
//! An append-and-compact Patricia-trie dictionary for predictive text.
//!
//! Words, unigram probabilities, bigram continuations and shortcut
//! expansions all live in byte buffers addressed by [`DictPos`]. Updates
//! append to the buffers and patch fixed-width fields in place; compaction
//! rewrites everything into a fresh buffer set, decaying and evicting
//! entries along the way.
//!
//! ## Example
//!
//! ```rust
//! use ptdict::{Config, Dictionary, HeaderPolicy, UnigramProperty};
//!
//! let mut dict = Dictionary::create(HeaderPolicy::new_static("en_US"), Config::default()).unwrap();
//! dict.add_unigram("hello", &UnigramProperty::new(200)).unwrap();
//! dict.add_unigram("help", &UnigramProperty::new(120)).unwrap();
//! dict.add_bigram("hello", "help", 50, 0).unwrap();
//!
//! assert_eq!(dict.get_probability("hello").unwrap(), Some(200));
//! assert_eq!(dict.get_bigrams("hello").unwrap().len(), 1);
//!
//! dict.compact().unwrap();
//! assert_eq!(dict.get_probability("help").unwrap(), Some(120));
//! ```

pub mod buffer;
pub mod config;
pub mod content;
pub mod decay;
pub mod dict_buffers;
pub mod dictionary;
pub mod encoding;
pub mod error;
pub mod gc;
pub mod handle;
pub mod header;
pub mod search;
pub mod trie;

#[cfg(test)]
mod proptests;

pub use buffer::DictPos;
pub use config::Config;
pub use decay::{DecayFunction, ForgettingCurve, HistoricalInfo};
pub use dictionary::{Dictionary, UnigramProperty, WordBigram, WordShortcut};
pub use error::{DictError, Result};
pub use handle::DictionaryHandle;
pub use header::{DecayParams, HeaderPolicy};
pub use search::{CandidateFlags, DicNode, SearchOptions, SuggestionCandidate, SuggestionCollector};

/// Longest word, in code points.
pub const MAX_WORD_LENGTH: usize = 48;

pub const MAX_PROBABILITY: i32 = 255;
pub const NOT_A_PROBABILITY: i32 = -1;

/// Dense index of a word in the terminal table and every content store.
pub type TerminalId = u32;
pub const NOT_A_TERMINAL_ID: TerminalId = u32::MAX;
