use crate::buffer::{DictPos, ExtendableBuffer};
use crate::error::Result;
use crate::TerminalId;

use super::TerminalIdMap;

const ENTRY_SIZE: usize = 4;

/// Terminal id to trie-node position, one u32 per id.
#[derive(Debug)]
pub struct TerminalPositionLookupTable {
    buffer: ExtendableBuffer,
    max_extended_size: usize,
}

impl TerminalPositionLookupTable {
    pub fn new(buffer: ExtendableBuffer, max_extended_size: usize) -> Self {
        Self {
            buffer,
            max_extended_size,
        }
    }

    /// Id the next [`allocate_id`](Self::allocate_id) will hand out.
    pub fn next_terminal_id(&self) -> TerminalId {
        (self.buffer.tail_position() / ENTRY_SIZE) as TerminalId
    }

    /// Reserve a fresh id pointing at `pos`.
    pub fn allocate_id(&mut self, pos: DictPos) -> Result<TerminalId> {
        let id = self.next_terminal_id();
        self.buffer.append(&pos.raw().to_be_bytes())?;
        Ok(id)
    }

    /// `None` for unknown ids and ids whose node was dropped.
    pub fn position_of(&self, id: TerminalId) -> Result<Option<DictPos>> {
        if id >= self.next_terminal_id() {
            return Ok(None);
        }
        Ok(self.buffer.read_pos(id as usize * ENTRY_SIZE)?.to_option())
    }

    /// Point `id` at `pos`, growing the table with NULL entries if needed.
    pub fn set_position(&mut self, id: TerminalId, pos: DictPos) -> Result<()> {
        while self.next_terminal_id() <= id {
            self.buffer.append(&DictPos::NULL.raw().to_be_bytes())?;
        }
        self.buffer.write_pos(id as usize * ENTRY_SIZE, pos)
    }

    /// Drop NULL entries and renumber the rest densely, ascending by old id.
    pub fn run_gc(&mut self) -> Result<TerminalIdMap> {
        let mut map = TerminalIdMap::new();
        let mut compacted = ExtendableBuffer::new(self.max_extended_size);
        for old_id in 0..self.next_terminal_id() {
            if let Some(pos) = self.position_of(old_id)? {
                let new_id = (compacted.tail_position() / ENTRY_SIZE) as TerminalId;
                compacted.append(&pos.raw().to_be_bytes())?;
                map.insert(old_id, new_id);
            }
        }
        self.buffer = compacted;
        Ok(map)
    }

    pub fn buffer(&self) -> &ExtendableBuffer {
        &self.buffer
    }

    pub fn is_near_size_limit(&self) -> bool {
        self.buffer.is_near_size_limit()
    }
}
