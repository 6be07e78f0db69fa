//! Block storage for packed overlaps
//!
//! Records are appended into fixed-capacity blocks. A block is allocated once at its
//! full capacity and never grows, so a record never moves after it is written. The
//! overlaps of a single read always land in one block.
//!
//! When a spill file is attached every block is written to it as soon as it is
//! sealed, which produces the flat data file of a snapshot.

use std::{
    fs::File,
    io::{BufWriter, Write},
};

use crate::{error::BudgetError, index::Location, OverlapRecord, Result, RECORD_SIZE};

/// Destination for sealed blocks
#[derive(Debug)]
struct Spill {
    writer: BufWriter<File>,
    /// Drop each block from memory once it is written
    free_sealed: bool,
    /// Blocks already written out
    sealed: usize,
    records: u64,
}

#[derive(Debug)]
pub struct Arena {
    blocks: Vec<Vec<OverlapRecord>>,
    capacity: usize,
    spill: Option<Spill>,
}
impl Arena {
    /// Creates an empty arena with blocks of `capacity` records
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            capacity: capacity.max(1),
            spill: None,
        }
    }

    /// Writes every sealed block to `file`
    ///
    /// With `free_sealed` the memory of a block is released once it is written;
    /// its records are then no longer readable from the arena.
    #[must_use]
    pub fn with_spill(mut self, file: File, free_sealed: bool) -> Self {
        self.spill = Some(Spill {
            writer: BufWriter::new(file),
            free_sealed,
            sealed: 0,
            records: 0,
        });
        self
    }

    /// Records per block
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of records appended so far
    #[must_use]
    pub fn len(&self) -> u64 {
        let spilled = self.spill.as_ref().map_or(0, |spill| spill.sealed);
        match &self.spill {
            Some(spill) if spill.free_sealed => {
                spill.records
                    + self.blocks[spilled..]
                        .iter()
                        .map(|block| block.len() as u64)
                        .sum::<u64>()
            }
            _ => self.blocks.iter().map(|block| block.len() as u64).sum(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently allocated for blocks
    #[must_use]
    pub fn memory_usage(&self) -> u64 {
        self.blocks
            .iter()
            .map(|block| (block.capacity() * RECORD_SIZE) as u64)
            .sum()
    }

    /// Appends the overlaps of one read, returning where they start
    ///
    /// A new block is started if the current one cannot hold all of `records`.
    pub fn append(&mut self, records: &[OverlapRecord]) -> Result<Location> {
        if records.len() > self.capacity {
            return Err(BudgetError::GroupExceedsBlock {
                records: records.len(),
                capacity: self.capacity,
            }
            .into());
        }
        let needs_block = self
            .blocks
            .last()
            .is_none_or(|block| self.capacity - block.len() < records.len());
        if needs_block {
            self.seal()?;
            self.blocks.push(Vec::with_capacity(self.capacity));
        }

        let block_id = self.blocks.len() - 1;
        let block = &mut self.blocks[block_id];
        let location = Location::new(block_id as u32, block.len());
        block.extend_from_slice(records);
        Ok(location)
    }

    /// Records of a read previously appended
    #[must_use]
    pub fn get(&self, location: Location, len: u32) -> &[OverlapRecord] {
        let start = location.offset;
        &self.blocks[location.block as usize][start..start + len as usize]
    }

    /// Writes out the current block if a spill file is attached
    fn seal(&mut self) -> Result<()> {
        let Some(spill) = self.spill.as_mut() else {
            return Ok(());
        };
        for block in &mut self.blocks[spill.sealed..] {
            spill.writer.write_all(bytemuck::cast_slice(block.as_slice()))?;
            spill.records += block.len() as u64;
            if spill.free_sealed {
                *block = Vec::new();
            }
        }
        spill.sealed = self.blocks.len();
        Ok(())
    }

    /// Writes out the final block and flushes the spill file
    ///
    /// Returns the number of records written, zero without a spill file.
    pub fn finish(&mut self) -> Result<u64> {
        self.seal()?;
        match self.spill.as_mut() {
            Some(spill) => {
                spill.writer.flush()?;
                Ok(spill.records)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod testing {
    use std::io::Read;

    use super::*;
    use crate::error::Error;

    fn group(a_id: u32, n: u32) -> Vec<OverlapRecord> {
        (0..n)
            .map(|b| OverlapRecord::new(a_id, b + 100, 10, -5, b % 2 == 0, 7))
            .collect()
    }

    #[test]
    fn test_groups_never_split() -> Result<()> {
        let mut arena = Arena::new(10);
        let first = arena.append(&group(1, 6))?;
        let second = arena.append(&group(2, 6))?;
        let third = arena.append(&group(3, 4))?;

        assert_eq!(first, Location::new(0, 0));
        assert_eq!(second, Location::new(1, 0));
        assert_eq!(third, Location::new(1, 6));
        assert_eq!(arena.num_blocks(), 2);
        assert_eq!(arena.len(), 16);
        assert_eq!(arena.get(second, 6), group(2, 6).as_slice());
        assert_eq!(arena.get(third, 4)[3].b_id(), 103);
        assert_eq!(arena.memory_usage(), (2 * 10 * RECORD_SIZE) as u64);
        Ok(())
    }

    #[test]
    fn test_records_never_move() -> Result<()> {
        let mut arena = Arena::new(8);
        arena.append(&group(1, 3))?;
        let before = arena.get(Location::new(0, 0), 3).as_ptr();
        arena.append(&group(2, 5))?;
        arena.append(&group(3, 5))?;
        assert_eq!(arena.get(Location::new(0, 0), 3).as_ptr(), before);
        Ok(())
    }

    #[test]
    fn test_group_exceeds_block() {
        let mut arena = Arena::new(4);
        let result = arena.append(&group(1, 5));
        assert!(matches!(
            result,
            Err(Error::BudgetError(BudgetError::GroupExceedsBlock {
                records: 5,
                capacity: 4
            }))
        ));
    }

    #[test]
    fn test_spill_writes_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("spill.dat");
        let mut arena = Arena::new(5).with_spill(File::create(&path)?, true);
        arena.append(&group(1, 4))?;
        arena.append(&group(2, 3))?;
        arena.append(&group(3, 2))?;
        assert_eq!(arena.len(), 9);
        assert_eq!(arena.finish()?, 9);
        // sealed blocks were released
        assert_eq!(arena.memory_usage(), 0);

        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;
        assert_eq!(bytes.len(), 9 * RECORD_SIZE);
        let records: Vec<OverlapRecord> = bytes
            .chunks_exact(RECORD_SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let expected: Vec<OverlapRecord> = [group(1, 4), group(2, 3), group(3, 2)].concat();
        assert_eq!(records, expected);
        Ok(())
    }

    #[test]
    fn test_spill_keeping_blocks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("spill.dat");
        let mut arena = Arena::new(5).with_spill(File::create(&path)?, false);
        let loc = arena.append(&group(1, 4))?;
        arena.append(&group(2, 3))?;
        assert_eq!(arena.finish()?, 7);
        assert_eq!(arena.get(loc, 4), group(1, 4).as_slice());
        assert_eq!(std::fs::metadata(&path)?.len(), 7 * RECORD_SIZE as u64);
        Ok(())
    }
}
