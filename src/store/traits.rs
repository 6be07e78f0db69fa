use auto_impl::auto_impl;

use crate::{Result, MAX_EVALUE};

/// An overlap as delivered by the source store, before filtering and packing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawOverlap {
    pub a_id: u32,
    pub b_id: u32,
    pub a_hang: i32,
    pub b_hang: i32,
    pub flipped: bool,
    /// Quantized error rate, at most [`MAX_EVALUE`](crate::MAX_EVALUE)
    pub evalue: u16,
}
impl RawOverlap {
    #[must_use]
    pub fn new(a_id: u32, b_id: u32, a_hang: i32, b_hang: i32, flipped: bool, evalue: u16) -> Self {
        Self {
            a_id,
            b_id,
            a_hang,
            b_hang,
            flipped,
            evalue: evalue.min(MAX_EVALUE),
        }
    }
}

/// Number of overlaps stored for a contiguous range of reads
///
/// `counts[i]` is the number of overlaps of read `first + i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadCounts {
    pub first: u32,
    pub counts: Vec<u32>,
}
impl ReadCounts {
    /// Largest number of overlaps of any single read
    #[must_use]
    pub fn max(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or_default()
    }

    /// Total number of overlaps in the range
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }
}

/// A sequential source of overlaps grouped by A-read
///
/// Groups must be produced in strictly increasing A-read order and each group must
/// hold every overlap of its A-read, sorted by B-read.
#[auto_impl(&mut, Box)]
pub trait OverlapSource {
    /// Rewinds the source to the start of its range
    fn reset_range(&mut self);

    /// Number of overlaps in the current range
    fn num_overlaps_in_range(&self) -> u64;

    /// Number of overlaps for each read in the current range
    fn overlaps_per_read(&mut self) -> Result<ReadCounts>;

    /// Fills `group` with all overlaps of the next A-read
    ///
    /// The buffer is cleared first. Returns the number of overlaps read, zero once the
    /// range is exhausted.
    fn next_group(&mut self, group: &mut Vec<RawOverlap>) -> Result<usize>;
}

/// Read lengths and bookkeeping for the reads overlaps refer to
///
/// Read ids run from 1 to [`num_reads`](ReadInfo::num_reads); a length of zero
/// marks a deleted read.
#[auto_impl(&, Box, Arc)]
pub trait ReadInfo {
    /// Number of reads
    fn num_reads(&self) -> u32;

    /// Length of a read, zero if the read is deleted or unknown
    fn read_length(&self, id: u32) -> u32;

    /// Bytes used to hold the read metadata
    fn memory_usage(&self) -> u64;

    /// Length of an overlap, averaged over the portions of A and B it covers
    ///
    /// Returns zero if the hangs are inconsistent with the read lengths.
    fn overlap_length(&self, a_id: u32, b_id: u32, a_hang: i32, b_hang: i32) -> u32 {
        let alen = i64::from(self.read_length(a_id));
        let blen = i64::from(self.read_length(b_id));
        let (a_hang, b_hang) = (i64::from(a_hang), i64::from(b_hang));

        let (aovl, bovl) = match (a_hang < 0, b_hang < 0) {
            (true, true) => (alen + b_hang, blen + a_hang),
            (true, false) => (alen, blen + a_hang - b_hang),
            (false, true) => (alen - a_hang + b_hang, blen),
            (false, false) => (alen - a_hang, blen - b_hang),
        };

        if aovl <= 0 || bovl <= 0 || aovl > alen || bovl > blen {
            return 0;
        }
        ((aovl + bovl) / 2) as u32
    }
}
