//! Addressable byte buffer: a fixed region followed by a growable region.
//!
//! Every higher layer addresses its data by a [`DictPos`] into the logical
//! concatenation of both regions:
//! - The fixed region is whatever was loaded (an owned vector, a read-only
//!   mapping or a copy-on-write mapping) and never changes size
//! - The extended region receives every append and grows up to a hard cap
//! - Positions stay stable until the whole buffer is replaced
//!
//! Entries are always written entirely inside one region, so a read never
//! straddles the boundary.

use std::io::Write;

use memmap2::{Mmap, MmapMut};

use crate::error::{DictError, Result};

/// Default cap for the extended region of a loaded buffer (1MB).
pub const DEFAULT_MAX_EXTENDED_SIZE: usize = 1024 * 1024;

/// The extended region counts as "near the limit" at this percentage.
const NEAR_SIZE_LIMIT_PERCENT: usize = 90;

/// A 32-bit position inside an [`ExtendableBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DictPos(u32);

impl DictPos {
    /// Not a position.
    pub const NULL: DictPos = DictPos(u32::MAX);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Create a position from a usize.
    ///
    /// Buffers never exceed `u32::MAX - 1` bytes, so every in-range offset fits.
    #[inline]
    pub fn from_usize(offset: usize) -> Self {
        debug_assert!(offset < u32::MAX as usize, "dictionary position too large");
        Self(offset as u32)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// `None` for [`DictPos::NULL`].
    #[inline]
    pub fn to_option(self) -> Option<DictPos> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

/// Backing storage of the fixed region.
pub enum FixedRegion {
    Owned(Vec<u8>),
    ReadOnly(Mmap),
    CopyOnWrite(MmapMut),
}

impl FixedRegion {
    #[inline]
    fn as_slice(&self) -> &[u8] {
        match self {
            FixedRegion::Owned(v) => v,
            FixedRegion::ReadOnly(m) => m,
            FixedRegion::CopyOnWrite(m) => m,
        }
    }

    #[inline]
    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            FixedRegion::Owned(v) => Some(v),
            FixedRegion::ReadOnly(_) => None,
            FixedRegion::CopyOnWrite(m) => Some(m),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

impl std::fmt::Debug for FixedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            FixedRegion::Owned(_) => "Owned",
            FixedRegion::ReadOnly(_) => "ReadOnly",
            FixedRegion::CopyOnWrite(_) => "CopyOnWrite",
        };
        write!(f, "{kind}({} bytes)", self.len())
    }
}

/// A fixed region plus an extended region that grows on write.
#[derive(Debug)]
pub struct ExtendableBuffer {
    fixed: FixedRegion,
    extended: Vec<u8>,
    max_extended_size: usize,
}

impl ExtendableBuffer {
    /// Create an empty buffer whose extended region may grow to `max_extended_size`.
    pub fn new(max_extended_size: usize) -> Self {
        Self::with_fixed(FixedRegion::Owned(Vec::new()), max_extended_size)
    }

    pub fn with_fixed(fixed: FixedRegion, max_extended_size: usize) -> Self {
        Self {
            fixed,
            extended: Vec::new(),
            max_extended_size,
        }
    }

    /// Position one past the last written byte.
    #[inline]
    pub fn tail_position(&self) -> usize {
        self.fixed.len() + self.extended.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tail_position() == 0
    }

    pub fn used_extended_size(&self) -> usize {
        self.extended.len()
    }

    /// Absolute maximum tail position.
    pub fn capacity(&self) -> usize {
        self.fixed.len() + self.max_extended_size
    }

    /// True once the extended region is close enough to its cap that callers
    /// should compact before a write fails.
    pub fn is_near_size_limit(&self) -> bool {
        self.extended.len() * 100 >= self.max_extended_size * NEAR_SIZE_LIMIT_PERCENT
    }

    /// Borrow `len` bytes at `pos`.
    pub fn read_at(&self, pos: usize, len: usize) -> Result<&[u8]> {
        let fixed = self.fixed.as_slice();
        let end = pos
            .checked_add(len)
            .ok_or_else(|| DictError::corrupt("read range overflows"))?;
        if end <= fixed.len() {
            return Ok(&fixed[pos..end]);
        }
        if pos >= fixed.len() {
            let start = pos - fixed.len();
            return self
                .extended
                .get(start..end - fixed.len())
                .ok_or_else(|| DictError::corrupt(format!("read of {len} bytes at {pos} past tail")));
        }
        Err(DictError::corrupt(format!(
            "read of {len} bytes at {pos} straddles the region boundary"
        )))
    }

    /// Read a big-endian unsigned integer of `size` (1..=4) bytes.
    pub fn read_uint(&self, pos: usize, size: usize) -> Result<u32> {
        debug_assert!((1..=4).contains(&size));
        let bytes = self.read_at(pos, size)?;
        Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
    }

    pub fn read_uint_and_advance(&self, size: usize, pos: &mut usize) -> Result<u32> {
        let value = self.read_uint(*pos, size)?;
        *pos += size;
        Ok(value)
    }

    #[inline]
    pub fn read_pos(&self, pos: usize) -> Result<DictPos> {
        self.read_uint(pos, 4).map(DictPos::new)
    }

    /// Overwrite or extend at `pos`.
    ///
    /// `pos` may not be past the tail. Writes that would exceed the capacity
    /// fail before anything is modified.
    pub fn write_at(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        let fixed_len = self.fixed.len();
        let end = pos.checked_add(bytes.len()).ok_or(DictError::CapacityExceeded {
            pos,
            len: bytes.len(),
            capacity: self.capacity(),
        })?;
        if end <= fixed_len {
            let fixed = self.fixed.as_mut_slice().ok_or(DictError::ReadOnly)?;
            fixed[pos..end].copy_from_slice(bytes);
            return Ok(());
        }
        if pos < fixed_len {
            return Err(DictError::corrupt(format!(
                "write of {} bytes at {pos} straddles the region boundary",
                bytes.len()
            )));
        }
        if pos > self.tail_position() {
            return Err(DictError::corrupt(format!(
                "write at {pos} leaves a gap past tail {}",
                self.tail_position()
            )));
        }
        let start = pos - fixed_len;
        let ext_end = end - fixed_len;
        if ext_end > self.max_extended_size {
            return Err(DictError::CapacityExceeded {
                pos,
                len: bytes.len(),
                capacity: self.capacity(),
            });
        }
        if ext_end > self.extended.len() {
            self.extended.resize(ext_end, 0);
        }
        self.extended[start..ext_end].copy_from_slice(bytes);
        Ok(())
    }

    /// Write a big-endian unsigned integer of `size` (1..=4) bytes.
    pub fn write_uint(&mut self, pos: usize, value: u32, size: usize) -> Result<()> {
        debug_assert!((1..=4).contains(&size));
        debug_assert!(size == 4 || value < (1u32 << (size * 8)));
        let be = value.to_be_bytes();
        self.write_at(pos, &be[4 - size..])
    }

    pub fn write_uint_and_advance(&mut self, value: u32, size: usize, pos: &mut usize) -> Result<()> {
        self.write_uint(*pos, value, size)?;
        *pos += size;
        Ok(())
    }

    #[inline]
    pub fn write_pos(&mut self, at: usize, value: DictPos) -> Result<()> {
        self.write_uint(at, value.raw(), 4)
    }

    /// Append bytes at the tail and return where they landed.
    pub fn append(&mut self, bytes: &[u8]) -> Result<DictPos> {
        let pos = self.tail_position();
        self.write_at(pos, bytes)?;
        Ok(DictPos::from_usize(pos))
    }

    /// Stream both regions, in order, to `writer`.
    pub fn write_to(&self, mut writer: impl Write) -> std::io::Result<()> {
        writer.write_all(self.fixed.as_slice())?;
        writer.write_all(&self.extended)
    }

    /// Copy of both regions, for comparisons and tests.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tail_position());
        out.extend_from_slice(self.fixed.as_slice());
        out.extend_from_slice(&self.extended);
        out
    }
}

impl Default for ExtendableBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXTENDED_SIZE)
    }
}
