//! Read id to overlap lookup
//!
//! Two parallel arrays sized `num_reads + 1`: where the overlaps of a read start and
//! how many there are. Id 0 is never a real read and always has no overlaps.

/// Position of a read's first overlap
///
/// For heap storage `block` is the arena block; mapped storage is a single flat run
/// and always uses block 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub block: u32,
    pub offset: usize,
}
impl Location {
    #[must_use]
    pub fn new(block: u32, offset: usize) -> Self {
        Self { block, offset }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlapIndex {
    locations: Vec<Location>,
    lengths: Vec<u32>,
}
impl OverlapIndex {
    /// An index where every read has no overlaps
    #[must_use]
    pub fn new(num_reads: u32) -> Self {
        let size = num_reads as usize + 1;
        Self {
            locations: vec![Location::default(); size],
            lengths: vec![0; size],
        }
    }

    /// Builds the index of a flat run of records from the per-read counts
    ///
    /// Read `i` starts right after the records of reads `0..i`.
    #[must_use]
    pub fn from_counts(counts: Vec<u32>) -> Self {
        let mut offset = 0usize;
        let locations = counts
            .iter()
            .map(|&count| {
                let location = Location::new(0, offset);
                offset += count as usize;
                location
            })
            .collect();
        Self {
            locations,
            lengths: counts,
        }
    }

    /// Number of reads covered, excluding id 0
    #[must_use]
    pub fn num_reads(&self) -> u32 {
        self.lengths.len().saturating_sub(1) as u32
    }

    pub fn set(&mut self, id: u32, location: Location, len: u32) {
        self.locations[id as usize] = location;
        self.lengths[id as usize] = len;
    }

    /// Shrinks the number of overlaps of a read, keeping its location
    pub fn set_len(&mut self, id: u32, len: u32) {
        self.lengths[id as usize] = len;
    }

    #[must_use]
    pub fn location(&self, id: u32) -> Location {
        self.locations[id as usize]
    }

    #[must_use]
    pub fn len(&self, id: u32) -> u32 {
        self.lengths[id as usize]
    }

    /// Per-read overlap counts, indexed by read id
    #[must_use]
    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }

    /// Total number of indexed overlaps
    #[must_use]
    pub fn total(&self) -> u64 {
        self.lengths.iter().map(|&len| u64::from(len)).sum()
    }

    /// Bytes held by the two arrays
    #[must_use]
    pub fn memory_usage(&self) -> u64 {
        (self.locations.capacity() * std::mem::size_of::<Location>()
            + self.lengths.capacity() * std::mem::size_of::<u32>()) as u64
    }
}
