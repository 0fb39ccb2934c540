//! Auxiliary stores addressed by terminal id.
//!
//! - [`probability`]: one fixed-size entry per id
//! - [`bigram`] and [`shortcut`]: a contiguous entry list per source id,
//!   located through a [`sparse_table`]
//! - [`terminal_table`]: id to trie-node position
//!
//! Every store has a `run_gc` that copies the surviving entries of a source
//! store under a [`TerminalIdMap`].

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::TerminalId;

pub mod bigram;
pub mod probability;
pub mod shortcut;
pub mod sparse_table;
pub mod terminal_table;

pub use bigram::{BigramDictContent, BigramEntry};
pub use probability::{ProbabilityDictContent, ProbabilityEntry};
pub use shortcut::{ShortcutDictContent, ShortcutEntry};
pub use sparse_table::SparseTable;
pub use terminal_table::TerminalPositionLookupTable;

/// Old terminal id to new terminal id. Ordered so that every pass over it
/// writes entries in ascending old-id order.
pub type TerminalIdMap = BTreeMap<TerminalId, TerminalId>;

/// Upper bound on entries read from one list before it is treated as corrupt.
pub const MAX_ENTRY_LIST_LENGTH: usize = 10_000;

bitflags! {
    /// Flag bits shared by bigram and shortcut list entries.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// Another entry of the same list follows immediately.
        const HAS_NEXT = 0x80;
        /// Entry was removed in place; skipped by lookups, dropped by GC.
        const INVALID = 0x40;
    }
}
