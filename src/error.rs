//! Error type shared by every layer of the dictionary engine.

use std::path::PathBuf;

/// Errors surfaced by buffer, codec, store, compaction and file operations.
#[derive(Debug, thiserror::Error)]
pub enum DictError {
    /// A write would grow a buffer (in bytes) or an entry list (in entries)
    /// past its hard maximum. Nothing was written.
    #[error("writing {len} at {pos} exceeds capacity {capacity}")]
    CapacityExceeded {
        pos: usize,
        len: usize,
        capacity: usize,
    },

    /// A decode hit an invalid flag combination, a dangling position or a
    /// missing terminal-id mapping.
    #[error("corrupt dictionary structure: {0}")]
    CorruptStructure(String),

    /// The fixed region is mapped read-only.
    #[error("buffer is read-only")]
    ReadOnly,

    #[error("invalid dictionary header: {0}")]
    InvalidHeader(&'static str),

    #[error("invalid word: {0:?}")]
    InvalidWord(String),

    #[error("word not found: {0:?}")]
    WordNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Swapping a staged file into place failed.
    #[error("failed to persist {path}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DictError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        DictError::CorruptStructure(reason.into())
    }

    /// An entry list of `len` entries would exceed `capacity`.
    pub(crate) fn list_full(len: usize, capacity: usize) -> Self {
        DictError::CapacityExceeded { pos: 0, len, capacity }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DictError>;
