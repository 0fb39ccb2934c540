use tracing::warn;

use crate::buffer::{DictPos, ExtendableBuffer};
use crate::decay::HistoricalInfo;
use crate::error::{DictError, Result};
use crate::TerminalId;

use super::{EntryFlags, SparseTable, TerminalIdMap, MAX_ENTRY_LIST_LENGTH};

/// One bigram continuation of a source word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BigramEntry {
    pub target: TerminalId,
    pub probability: u8,
    /// Present iff the store is decaying.
    pub historical_info: Option<HistoricalInfo>,
    pub is_valid: bool,
}

impl BigramEntry {
    pub fn new(target: TerminalId, probability: u8) -> Self {
        Self {
            target,
            probability,
            historical_info: None,
            is_valid: true,
        }
    }

    pub fn with_historical_info(mut self, info: HistoricalInfo) -> Self {
        self.historical_info = Some(info);
        self
    }
}

/// Bigram lists keyed by source terminal id.
///
/// Entry layout: flags u8 | probability u8 | [timestamp u32 | level u8 | count u8] | target u32
#[derive(Debug)]
pub struct BigramDictContent {
    table: SparseTable,
    content: ExtendableBuffer,
    has_historical_info: bool,
}

impl BigramDictContent {
    pub fn new(table: SparseTable, content: ExtendableBuffer, has_historical_info: bool) -> Self {
        Self {
            table,
            content,
            has_historical_info,
        }
    }

    #[inline]
    pub fn entry_size(&self) -> usize {
        if self.has_historical_info {
            12
        } else {
            6
        }
    }

    pub fn get_list_head_pos(&self, source: TerminalId) -> Result<Option<DictPos>> {
        Ok(self.table.get(source)?.map(DictPos::new))
    }

    /// Decode the entry at `pos`; the second value is the next entry's position.
    pub fn read_entry_at(&self, pos: DictPos) -> Result<(BigramEntry, Option<DictPos>)> {
        let mut p = pos.as_usize();
        let flags = EntryFlags::from_bits_truncate(self.content.read_uint_and_advance(1, &mut p)? as u8);
        let probability = self.content.read_uint_and_advance(1, &mut p)? as u8;
        let historical_info = if self.has_historical_info {
            Some(HistoricalInfo {
                timestamp: self.content.read_uint_and_advance(4, &mut p)?,
                level: self.content.read_uint_and_advance(1, &mut p)? as u8,
                count: self.content.read_uint_and_advance(1, &mut p)? as u8,
            })
        } else {
            None
        };
        let target = self.content.read_uint_and_advance(4, &mut p)?;
        let entry = BigramEntry {
            target,
            probability,
            historical_info,
            is_valid: !flags.contains(EntryFlags::INVALID),
        };
        let next = flags
            .contains(EntryFlags::HAS_NEXT)
            .then(|| DictPos::from_usize(p));
        Ok((entry, next))
    }

    fn encode_entry(&self, entry: &BigramEntry, has_next: bool, out: &mut Vec<u8>) {
        let mut flags = EntryFlags::empty();
        flags.set(EntryFlags::HAS_NEXT, has_next);
        flags.set(EntryFlags::INVALID, !entry.is_valid);
        out.push(flags.bits());
        out.push(entry.probability);
        if self.has_historical_info {
            let info = entry.historical_info.unwrap_or_default();
            out.extend_from_slice(&info.timestamp.to_be_bytes());
            out.push(info.level);
            out.push(info.count);
        }
        out.extend_from_slice(&entry.target.to_be_bytes());
    }

    /// Overwrite the entry at `pos`, keeping its has-next bit.
    pub fn write_entry_at(&mut self, pos: DictPos, entry: &BigramEntry) -> Result<()> {
        let flags = EntryFlags::from_bits_truncate(self.content.read_uint(pos.as_usize(), 1)? as u8);
        let mut bytes = Vec::with_capacity(self.entry_size());
        self.encode_entry(entry, flags.contains(EntryFlags::HAS_NEXT), &mut bytes);
        self.content.write_at(pos.as_usize(), &bytes)
    }

    /// Write `entries` as the list of `source`, replacing any previous list.
    pub fn append_list(&mut self, source: TerminalId, entries: &[BigramEntry]) -> Result<DictPos> {
        if entries.len() > MAX_ENTRY_LIST_LENGTH {
            return Err(DictError::list_full(entries.len(), MAX_ENTRY_LIST_LENGTH));
        }
        if entries.is_empty() {
            self.table.set(source, DictPos::NULL.raw())?;
            return Ok(DictPos::NULL);
        }
        let mut bytes = Vec::with_capacity(entries.len() * self.entry_size());
        for (i, entry) in entries.iter().enumerate() {
            self.encode_entry(entry, i + 1 < entries.len(), &mut bytes);
        }
        let head = self.content.append(&bytes)?;
        self.table.set(source, head.raw())?;
        Ok(head)
    }

    pub fn invalidate_entry_at(&mut self, pos: DictPos) -> Result<()> {
        let mut flags = EntryFlags::from_bits_truncate(self.content.read_uint(pos.as_usize(), 1)? as u8);
        flags.insert(EntryFlags::INVALID);
        self.content.write_uint(pos.as_usize(), u32::from(flags.bits()), 1)
    }

    /// Every entry (valid or not) of `source`'s list with its position.
    pub fn iter_list(&self, source: TerminalId) -> Result<BigramListIter<'_>> {
        Ok(BigramListIter {
            content: self,
            next: self.get_list_head_pos(source)?,
            read: 0,
        })
    }

    /// Valid entries of `source`, in list order.
    pub fn valid_entries(&self, source: TerminalId) -> Result<Vec<(DictPos, BigramEntry)>> {
        let mut out = Vec::new();
        for item in self.iter_list(source)? {
            let (pos, entry) = item?;
            if entry.is_valid {
                out.push((pos, entry));
            }
        }
        Ok(out)
    }

    /// Copy valid entries whose source and target both survive, renumbered.
    /// Returns the number of entries written.
    pub fn run_gc(&mut self, map: &TerminalIdMap, source: &BigramDictContent) -> Result<u32> {
        let mut count = 0u32;
        for (&old_id, &new_id) in map {
            let mut kept = Vec::new();
            for (_, entry) in source.valid_entries(old_id)? {
                if let Some(&target) = map.get(&entry.target) {
                    kept.push(BigramEntry { target, ..entry });
                }
            }
            if !kept.is_empty() {
                count += kept.len() as u32;
                self.append_list(new_id, &kept)?;
            }
        }
        Ok(count)
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

/// Iterator over one bigram list. Yields a `CorruptStructure` error and stops
/// after [`MAX_ENTRY_LIST_LENGTH`] entries.
pub struct BigramListIter<'a> {
    content: &'a BigramDictContent,
    next: Option<DictPos>,
    read: usize,
}

impl Iterator for BigramListIter<'_> {
    type Item = Result<(DictPos, BigramEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.next.take()?;
        if self.read >= MAX_ENTRY_LIST_LENGTH {
            warn!(pos = pos.raw(), "bigram list exceeds maximum length");
            return Some(Err(DictError::corrupt("bigram list too long")));
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

#[cfg(test)]
mod tests {
    use super::*;

    fn content(historical: bool) -> BigramDictContent {
        BigramDictContent::new(
            SparseTable::new(ExtendableBuffer::new(4096), ExtendableBuffer::new(4096)),
            ExtendableBuffer::new(4096),
            historical,
        )
    }

    #[test]
    fn test_missing_list_is_absent() {
        let c = content(false);
        assert_eq!(c.get_list_head_pos(3).unwrap(), None);
        assert_eq!(c.iter_list(3).unwrap().count(), 0);
    }

    #[test]
    fn test_list_roundtrip_and_invalidate() {
        let mut c = content(false);
        let head = c
            .append_list(1, &[BigramEntry::new(5, 100), BigramEntry::new(6, 120)])
            .unwrap();

        let (first, next) = c.read_entry_at(head).unwrap();
        assert_eq!(first, BigramEntry::new(5, 100));
        let (second, end) = c.read_entry_at(next.unwrap()).unwrap();
        assert_eq!(second.target, 6);
        assert_eq!(end, None);

        c.invalidate_entry_at(head).unwrap();
        let valid = c.valid_entries(1).unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].1.target, 6);
    }

    #[test]
    fn test_write_entry_keeps_has_next() {
        let mut c = content(true);
        let info = HistoricalInfo { timestamp: 9, level: 1, count: 0 };
        let head = c
            .append_list(0, &[BigramEntry::new(1, 0), BigramEntry::new(2, 0)])
            .unwrap();
        c.write_entry_at(head, &BigramEntry::new(1, 0).with_historical_info(info))
            .unwrap();

        let entries: Vec<_> = c.iter_list(0).unwrap().map(|r| r.unwrap().1).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].historical_info, Some(info));
    }

    #[test]
    fn test_run_gc_drops_unmapped() {
        let mut source = content(false);
        source
            .append_list(0, &[BigramEntry::new(1, 10), BigramEntry::new(2, 20), BigramEntry::new(3, 30)])
            .unwrap();
        source.append_list(2, &[BigramEntry::new(0, 40)]).unwrap();
        let (third, _) = source.valid_entries(0).unwrap()[2];
        source.invalidate_entry_at(third).unwrap();

        // Id 1 is gone; 2 becomes 1.
        let map: TerminalIdMap = [(0, 0), (2, 1), (3, 2)].into_iter().collect();
        let mut target = content(false);
        assert_eq!(target.run_gc(&map, &source).unwrap(), 2);

        let entries: Vec<_> = target.valid_entries(0).unwrap().into_iter().map(|(_, e)| e).collect();
        assert_eq!(entries, vec![BigramEntry::new(1, 20)]);
        assert_eq!(target.valid_entries(1).unwrap()[0].1, BigramEntry::new(0, 40));
    }

    #[test]
    fn test_list_iteration_is_bounded() {
        let mut c = content(false);
        let entries = vec![BigramEntry::new(0, 1); MAX_ENTRY_LIST_LENGTH + 1];
        let mut big = BigramDictContent::new(
            SparseTable::new(ExtendableBuffer::new(4096), ExtendableBuffer::new(4096)),
            ExtendableBuffer::new(1 << 20),
            false,
        );
        assert!(matches!(
            big.append_list(0, &entries),
            Err(DictError::CapacityExceeded { capacity: MAX_ENTRY_LIST_LENGTH, .. })
        ));
        assert!(big.get_list_head_pos(0).unwrap().is_none());

        // An overlong chain can still exist on disk; reading stops at the bound.
        let mut bytes = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            big.encode_entry(entry, i + 1 < entries.len(), &mut bytes);
        }
        let head = big.content.append(&bytes).unwrap();
        big.table.set(0, head.raw()).unwrap();
        let results: Vec<_> = big.iter_list(0).unwrap().collect();
        assert_eq!(results.len(), MAX_ENTRY_LIST_LENGTH + 1);
        assert!(results.last().unwrap().is_err());
        assert!(c.append_list(0, &[]).unwrap().is_null());
    }
}
