use std::ops::RangeInclusive;

use super::traits::{OverlapSource, RawOverlap, ReadCounts, ReadInfo};
use crate::Result;

/// Read lengths held in memory
///
/// Read ids are 1-based; id 0 always reports a length of zero.
#[derive(Debug, Clone, Default)]
pub struct ReadTable {
    lengths: Vec<u32>,
}
impl ReadTable {
    /// Builds a table where `lengths[i]` is the length of read `i + 1`
    #[must_use]
    pub fn from_lengths(lengths: &[u32]) -> Self {
        let mut table = Vec::with_capacity(lengths.len() + 1);
        table.push(0);
        table.extend_from_slice(lengths);
        Self { lengths: table }
    }

    /// Marks a read as deleted
    pub fn delete(&mut self, id: u32) {
        if let Some(len) = self.lengths.get_mut(id as usize) {
            *len = 0;
        }
    }
}
impl ReadInfo for ReadTable {
    fn num_reads(&self) -> u32 {
        (self.lengths.len() - 1) as u32
    }
    fn read_length(&self, id: u32) -> u32 {
        self.lengths.get(id as usize).copied().unwrap_or_default()
    }
    fn memory_usage(&self) -> u64 {
        (std::mem::size_of::<Self>() + self.lengths.capacity() * std::mem::size_of::<u32>()) as u64
    }
}

/// An overlap store held in memory
///
/// Overlaps are sorted by (A-read, B-read) on construction and served one A-read
/// at a time, optionally restricted to a range of A-reads.
#[derive(Debug, Clone, Default)]
pub struct MemoryOverlapStore {
    overlaps: Vec<RawOverlap>,
    range: Option<RangeInclusive<u32>>,
    /// Index of the next overlap to serve
    pos: usize,
}
impl MemoryOverlapStore {
    #[must_use]
    pub fn new(mut overlaps: Vec<RawOverlap>) -> Self {
        overlaps.sort_by_key(|ovl| (ovl.a_id, ovl.b_id));
        let mut store = Self {
            overlaps,
            range: None,
            pos: 0,
        };
        store.reset_range();
        store
    }

    /// Restricts the store to the A-reads in `range` and rewinds to its start
    pub fn set_range(&mut self, range: RangeInclusive<u32>) {
        self.range = Some(range);
        self.reset_range();
    }

    /// Removes any range restriction and rewinds to the first overlap
    pub fn clear_range(&mut self) {
        self.range = None;
        self.reset_range();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.overlaps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overlaps.is_empty()
    }

    fn in_range(&self, id: u32) -> bool {
        self.range.as_ref().is_none_or(|range| range.contains(&id))
    }

    fn ranged(&self) -> &[RawOverlap] {
        let Some(range) = &self.range else {
            return &self.overlaps;
        };
        let lbound = self.overlaps.partition_point(|ovl| ovl.a_id < *range.start());
        let rbound = self.overlaps.partition_point(|ovl| ovl.a_id <= *range.end());
        &self.overlaps[lbound..rbound.max(lbound)]
    }
}
impl OverlapSource for MemoryOverlapStore {
    fn reset_range(&mut self) {
        self.pos = match &self.range {
            Some(range) => self
                .overlaps
                .partition_point(|ovl| ovl.a_id < *range.start()),
            None => 0,
        };
    }

    fn num_overlaps_in_range(&self) -> u64 {
        self.ranged().len() as u64
    }

    fn overlaps_per_read(&mut self) -> Result<ReadCounts> {
        let ranged = self.ranged();
        let (Some(first), Some(last)) = (ranged.first(), ranged.last()) else {
            return Ok(ReadCounts::default());
        };
        let first = first.a_id;
        let mut counts = vec![0u32; (last.a_id - first) as usize + 1];
        for ovl in ranged {
            counts[(ovl.a_id - first) as usize] += 1;
        }
        Ok(ReadCounts { first, counts })
    }

    fn next_group(&mut self, group: &mut Vec<RawOverlap>) -> Result<usize> {
        group.clear();
        let Some(head) = self.overlaps.get(self.pos).copied() else {
            return Ok(0);
        };
        if !self.in_range(head.a_id) {
            return Ok(0);
        }
        group.extend(
            self.overlaps[self.pos..]
                .iter()
                .take_while(|ovl| ovl.a_id == head.a_id),
        );
        self.pos += group.len();
        Ok(group.len())
    }
}
