use tracing::warn;

use crate::buffer::{DictPos, ExtendableBuffer};
use crate::encoding::{decode_code_points, encode_code_points, CodePoints};
use crate::error::{DictError, Result};
use crate::TerminalId;

use super::{EntryFlags, SparseTable, TerminalIdMap, MAX_ENTRY_LIST_LENGTH};

/// Shortcut probability marking the target as a whitelisted replacement.
pub const WHITELIST_SHORTCUT_PROBABILITY: u8 = 15;
const PROBABILITY_MASK: u8 = 0x0F;

/// Literal expansion attached to a word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortcutEntry {
    pub target: CodePoints,
    /// 0..=15
    pub probability: u8,
    pub is_valid: bool,
}

impl ShortcutEntry {
    pub fn new(target: CodePoints, probability: u8) -> Self {
        Self {
            target,
            probability: probability.min(WHITELIST_SHORTCUT_PROBABILITY),
            is_valid: true,
        }
    }

    pub fn is_whitelist(&self) -> bool {
        self.probability == WHITELIST_SHORTCUT_PROBABILITY
    }
}

/// Shortcut lists keyed by source terminal id.
///
/// Entry layout: flags u8 (has-next, invalid, low nibble probability) | target label
#[derive(Debug)]
pub struct ShortcutDictContent {
    table: SparseTable,
    content: ExtendableBuffer,
}

impl ShortcutDictContent {
    pub fn new(table: SparseTable, content: ExtendableBuffer) -> Self {
        Self { table, content }
    }

    pub fn get_list_head_pos(&self, source: TerminalId) -> Result<Option<DictPos>> {
        Ok(self.table.get(source)?.map(DictPos::new))
    }

    pub fn read_entry_at(&self, pos: DictPos) -> Result<(ShortcutEntry, Option<DictPos>)> {
        let mut p = pos.as_usize();
        let raw = self.content.read_uint_and_advance(1, &mut p)? as u8;
        let flags = EntryFlags::from_bits_truncate(raw);
        let target = decode_code_points(&self.content, &mut p)?;
        let entry = ShortcutEntry {
            target,
            probability: raw & PROBABILITY_MASK,
            is_valid: !flags.contains(EntryFlags::INVALID),
        };
        let next = flags
            .contains(EntryFlags::HAS_NEXT)
            .then(|| DictPos::from_usize(p));
        Ok((entry, next))
    }

    /// Write `entries` as the list of `source`, replacing any previous list.
    pub fn append_list(&mut self, source: TerminalId, entries: &[ShortcutEntry]) -> Result<DictPos> {
        if entries.len() > MAX_ENTRY_LIST_LENGTH {
            return Err(DictError::list_full(entries.len(), MAX_ENTRY_LIST_LENGTH));
        }
        if entries.is_empty() {
            self.table.set(source, DictPos::NULL.raw())?;
            return Ok(DictPos::NULL);
        }
        let mut bytes = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            let mut flags = EntryFlags::empty();
            flags.set(EntryFlags::HAS_NEXT, i + 1 < entries.len());
            flags.set(EntryFlags::INVALID, !entry.is_valid);
            bytes.push(flags.bits() | (entry.probability & PROBABILITY_MASK));
            encode_code_points(&entry.target, &mut bytes)?;
        }
        let head = self.content.append(&bytes)?;
        self.table.set(source, head.raw())?;
        Ok(head)
    }

    fn rewrite_flags(&mut self, pos: DictPos, f: impl FnOnce(u8) -> u8) -> Result<()> {
        let raw = self.content.read_uint(pos.as_usize(), 1)? as u8;
        self.content.write_uint(pos.as_usize(), u32::from(f(raw)), 1)
    }

    pub fn invalidate_entry_at(&mut self, pos: DictPos) -> Result<()> {
        self.rewrite_flags(pos, |raw| raw | EntryFlags::INVALID.bits())
    }

    pub fn update_probability_at(&mut self, pos: DictPos, probability: u8) -> Result<()> {
        let probability = probability.min(WHITELIST_SHORTCUT_PROBABILITY);
        self.rewrite_flags(pos, |raw| (raw & !PROBABILITY_MASK) | probability)
    }

    pub fn iter_list(&self, source: TerminalId) -> Result<ShortcutListIter<'_>> {
        Ok(ShortcutListIter {
            content: self,
            next: self.get_list_head_pos(source)?,
            read: 0,
        })
    }

    pub fn valid_entries(&self, source: TerminalId) -> Result<Vec<(DictPos, ShortcutEntry)>> {
        let mut out = Vec::new();
        for item in self.iter_list(source)? {
            let (pos, entry) = item?;
            if entry.is_valid {
                out.push((pos, entry));
            }
        }
        Ok(out)
    }

    /// Copy valid entries of every surviving source under its new id.
    pub fn run_gc(&mut self, map: &TerminalIdMap, source: &ShortcutDictContent) -> Result<()> {
        for (&old_id, &new_id) in map {
            let kept: Vec<ShortcutEntry> = source
                .valid_entries(old_id)?
                .into_iter()
                .map(|(_, entry)| entry)
                .collect();
            if !kept.is_empty() {
                self.append_list(new_id, &kept)?;
            }
        }
        Ok(())
    }

    pub fn table(&self) -> &SparseTable {
        &self.table
    }

    pub fn content_buffer(&self) -> &ExtendableBuffer {
        &self.content
    }

    pub fn is_near_size_limit(&self) -> bool {
        self.table.is_near_size_limit() || self.content.is_near_size_limit()
    }
}

pub struct ShortcutListIter<'a> {
    content: &'a ShortcutDictContent,
    next: Option<DictPos>,
    read: usize,
}

impl Iterator for ShortcutListIter<'_> {
    type Item = Result<(DictPos, ShortcutEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.next.take()?;
        if self.read >= MAX_ENTRY_LIST_LENGTH {
            warn!(pos = pos.raw(), "shortcut list exceeds maximum length");
            return Some(Err(DictError::corrupt("shortcut list too long")));
        }
        self.read += 1;
        match self.content.read_entry_at(pos) {
            Ok((entry, next)) => {
                self.next = next;
                Some(Ok((pos, entry)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
