use crate::buffer::{DictPos, ExtendableBuffer};
use crate::error::Result;

/// Ids per address block.
pub const BLOCK_SIZE: usize = 16;
const ENTRY_SIZE: usize = 4;

/// Block-addressed `u32 -> u32` table.
///
/// The lookup buffer holds one u32 per block of [`BLOCK_SIZE`] ids: the
/// block's offset in the address buffer, or NULL if the block was never
/// touched. Blocks are allocated on first `set`.
#[derive(Debug)]
pub struct SparseTable {
    lookup: ExtendableBuffer,
    addresses: ExtendableBuffer,
}

impl SparseTable {
    pub fn new(lookup: ExtendableBuffer, addresses: ExtendableBuffer) -> Self {
        Self { lookup, addresses }
    }

    fn block_offset(&self, id: u32) -> Result<Option<usize>> {
        let lookup_pos = (id as usize / BLOCK_SIZE) * ENTRY_SIZE;
        if lookup_pos + ENTRY_SIZE > self.lookup.tail_position() {
            return Ok(None);
        }
        Ok(self.lookup.read_pos(lookup_pos)?.to_option().map(DictPos::as_usize))
    }

    /// `None` if `id` has no value.
    pub fn get(&self, id: u32) -> Result<Option<u32>> {
        let Some(block) = self.block_offset(id)? else {
            return Ok(None);
        };
        let pos = block + (id as usize % BLOCK_SIZE) * ENTRY_SIZE;
        let value = self.addresses.read_pos(pos)?;
        Ok(value.to_option().map(DictPos::raw))
    }

    pub fn set(&mut self, id: u32, value: u32) -> Result<()> {
        let block = match self.block_offset(id)? {
            Some(block) => block,
            None => {
                let lookup_pos = (id as usize / BLOCK_SIZE) * ENTRY_SIZE;
                while self.lookup.tail_position() < lookup_pos + ENTRY_SIZE {
                    self.lookup.append(&u32::MAX.to_be_bytes())?;
                }
                let block = self.addresses.append(&[0xFF; BLOCK_SIZE * ENTRY_SIZE])?;
                self.lookup.write_pos(lookup_pos, block)?;
                block.as_usize()
            }
        };
        let pos = block + (id as usize % BLOCK_SIZE) * ENTRY_SIZE;
        self.addresses.write_uint(pos, value, ENTRY_SIZE)
    }

    pub fn lookup_buffer(&self) -> &ExtendableBuffer {
        &self.lookup
    }

    pub fn address_buffer(&self) -> &ExtendableBuffer {
        &self.addresses
    }

    pub fn is_near_size_limit(&self) -> bool {
        self.lookup.is_near_size_limit() || self.addresses.is_near_size_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SparseTable {
        SparseTable::new(ExtendableBuffer::new(4096), ExtendableBuffer::new(4096))
    }

    #[test]
    fn test_empty_lookup_is_absent() {
        let t = table();
        assert_eq!(t.get(0).unwrap(), None);
        assert_eq!(t.get(12345).unwrap(), None);
    }

    #[test]
    fn test_blocks_allocated_on_demand() {
        let mut t = table();
        t.set(40, 7).unwrap();

        // Blocks 0 and 1 stay unallocated; only block 2 exists.
        assert_eq!(t.lookup_buffer().tail_position(), 12);
        assert_eq!(t.address_buffer().tail_position(), BLOCK_SIZE * 4);
        assert_eq!(t.get(40).unwrap(), Some(7));
        assert_eq!(t.get(41).unwrap(), None);
        assert_eq!(t.get(3).unwrap(), None);

        t.set(3, 9).unwrap();
        t.set(40, 8).unwrap();
        assert_eq!(t.get(3).unwrap(), Some(9));
        assert_eq!(t.get(40).unwrap(), Some(8));
        assert_eq!(t.address_buffer().tail_position(), 2 * BLOCK_SIZE * 4);
    }
}
