//! Runtime limits for buffer sets.

/// Cap for the extended region of every buffer of a freshly created set (8MB).
pub const MAX_DICTIONARY_SIZE: usize = 8 * 1024 * 1024;

/// Cap for the extended region of every buffer of an opened set (1MB).
pub const MAX_EXTENDED_REGION_SIZE: usize = 1024 * 1024;

/// Configuration for a dictionary's buffers.
#[derive(Clone, Debug)]
pub struct Config {
    /// Extended-region cap used when a buffer set is built from scratch
    /// (new dictionaries and compaction output)
    pub max_dictionary_size: usize,
    /// Extended-region cap used on top of an opened file set
    pub max_extended_region_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_dictionary_size: MAX_DICTIONARY_SIZE,
            max_extended_region_size: MAX_EXTENDED_REGION_SIZE,
        }
    }
}
