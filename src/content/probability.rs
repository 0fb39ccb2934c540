use crate::buffer::ExtendableBuffer;
use crate::decay::HistoricalInfo;
use crate::error::Result;
use crate::TerminalId;

use super::TerminalIdMap;

const FLAG_VALID: u8 = 0x01;

/// Unigram probability of one terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbabilityEntry {
    /// Static probability; informational only for decaying dictionaries.
    pub probability: u8,
    /// Present iff the store is decaying.
    pub historical_info: Option<HistoricalInfo>,
}

/// Fixed-size entries indexed by terminal id.
///
/// Entry layout: flags u8 | probability u8 | [timestamp u32 | level u8 | count u8]
#[derive(Debug)]
pub struct ProbabilityDictContent {
    buffer: ExtendableBuffer,
    has_historical_info: bool,
}

impl ProbabilityDictContent {
    pub fn new(buffer: ExtendableBuffer, has_historical_info: bool) -> Self {
        Self {
            buffer,
            has_historical_info,
        }
    }

    #[inline]
    fn entry_size(&self) -> usize {
        if self.has_historical_info {
            8
        } else {
            2
        }
    }

    pub fn has_historical_info(&self) -> bool {
        self.has_historical_info
    }

    /// `None` for ids never set or beyond the end of the table.
    pub fn get(&self, id: TerminalId) -> Result<Option<ProbabilityEntry>> {
        let mut pos = id as usize * self.entry_size();
        if pos + self.entry_size() > self.buffer.tail_position() {
            return Ok(None);
        }
        let flags = self.buffer.read_uint_and_advance(1, &mut pos)? as u8;
        if flags & FLAG_VALID == 0 {
            return Ok(None);
        }
        let probability = self.buffer.read_uint_and_advance(1, &mut pos)? as u8;
        let historical_info = if self.has_historical_info {
            Some(HistoricalInfo {
                timestamp: self.buffer.read_uint_and_advance(4, &mut pos)?,
                level: self.buffer.read_uint_and_advance(1, &mut pos)? as u8,
                count: self.buffer.read_uint_and_advance(1, &mut pos)? as u8,
            })
        } else {
            None
        };
        Ok(Some(ProbabilityEntry {
            probability,
            historical_info,
        }))
    }

    /// Write the entry of `id`, zero-filling (invalid) entries up to it.
    pub fn set(&mut self, id: TerminalId, entry: &ProbabilityEntry) -> Result<()> {
        let size = self.entry_size();
        let pos = id as usize * size;
        let tail = self.buffer.tail_position();
        if pos > tail {
            self.buffer.append(&vec![0u8; pos - tail])?;
        }

        let mut bytes = Vec::with_capacity(size);
        bytes.push(FLAG_VALID);
        bytes.push(entry.probability);
        if self.has_historical_info {
            let info = entry.historical_info.unwrap_or_default();
            bytes.extend_from_slice(&info.timestamp.to_be_bytes());
            bytes.push(info.level);
            bytes.push(info.count);
        }
        self.buffer.write_at(pos, &bytes)
    }

    /// Copy every entry of `source` whose id survives, under its new id.
    pub fn run_gc(&mut self, map: &TerminalIdMap, source: &ProbabilityDictContent) -> Result<()> {
        for (&old_id, &new_id) in map {
            if let Some(entry) = source.get(old_id)? {
                self.set(new_id, &entry)?;
            }
        }
        Ok(())
    }

    pub fn buffer(&self) -> &ExtendableBuffer {
        &self.buffer
    }

    pub fn is_near_size_limit(&self) -> bool {
        self.buffer.is_near_size_limit()
    }
}
