//! Streaming load of overlaps into the arena
//!
//! Overlaps arrive one A-read at a time. Each group goes through three passes:
//!
//! 1. duplicate collapse: only the best overlap of every (A, B) pair survives
//! 2. scoring: low quality overlaps are dropped and the best `cap` are kept
//! 3. packing: survivors become [`OverlapRecord`]s appended to the arena
//!
//! The scratch buffers used by these passes are reused across groups and double in
//! size whenever a group does not fit.

use crate::{
    arena::Arena,
    error::{LoadError, Result},
    index::OverlapIndex,
    observer::CacheObserver,
    store::{OverlapSource, RawOverlap, ReadInfo},
    CacheConfig, OverlapRecord, EVALUE_BITS, MAX_HANG, MIN_HANG, READLEN_BITS,
};

/// Evalue given to a duplicate so it can be compacted out of its group
///
/// Lies outside the range of encodable evalues.
pub const DROPPED_EVALUE: u16 = u16::MAX;

/// Low bits of a score holding the overlap's position in its group
pub const SALT_BITS: u32 = u64::BITS - READLEN_BITS - EVALUE_BITS;
pub const SALT_MASK: u64 = (1 << SALT_BITS) - 1;

const MAX_SCORED_LENGTH: u32 = (1 << READLEN_BITS) - 1;
const EVALUE_MASK: u16 = (1 << EVALUE_BITS) - 1;

/// Running totals of a load
///
/// # Fields
///
/// * `in_store` - overlaps the source holds in its range
/// * `processed` - overlaps read from the source
/// * `loaded` - overlaps retained in the cache
/// * `duplicates` - overlaps dropped because a better one joined the same reads
/// * `reads` - A-read groups processed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub in_store: u64,
    pub processed: u64,
    pub loaded: u64,
    pub duplicates: u64,
    pub reads: u64,
}

/// Collapses overlaps between the same pair of reads
///
/// The group must be sorted by B-read. Within each run of equal B-reads the overlap
/// with the greatest length survives; equal lengths are decided by the lower evalue
/// and a complete tie keeps the later overlap. Losers are removed and the order of
/// the remaining overlaps is not preserved.
///
/// Returns the number of overlaps removed.
pub fn filter_duplicates<R: ReadInfo>(group: &mut Vec<RawOverlap>, reads: &R) -> u64 {
    let length =
        |ovl: &RawOverlap| reads.overlap_length(ovl.a_id, ovl.b_id, ovl.a_hang, ovl.b_hang);

    let mut duplicates = 0;
    let mut winner = 0;
    for i in 1..group.len() {
        if group[i].b_id != group[winner].b_id {
            winner = i;
            continue;
        }
        let (best, challenger) = (&group[winner], &group[i]);
        let (best_len, challenger_len) = (length(best), length(challenger));
        let challenger_wins = challenger_len > best_len
            || (challenger_len == best_len && challenger.evalue <= best.evalue);
        if challenger_wins {
            group[winner].evalue = DROPPED_EVALUE;
            winner = i;
        } else {
            group[i].evalue = DROPPED_EVALUE;
        }
        duplicates += 1;
    }

    if duplicates > 0 {
        let mut i = 0;
        while i < group.len() {
            if group[i].evalue == DROPPED_EVALUE {
                group.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }
    duplicates
}

/// Scratch state of a load
#[derive(Debug)]
pub struct Loader<'a, R: ReadInfo> {
    reads: &'a R,
    cap: u32,
    max_evalue: u16,
    min_overlap: u32,
    report_interval: u64,

    group: Vec<RawOverlap>,
    scores: Vec<u64>,
    sorted: Vec<u64>,
    kept: Vec<OverlapRecord>,

    /// Number of overlaps the scratch buffers are sized for
    buffer_capacity: usize,
    /// Bytes added to the scratch buffers beyond their initial size
    grown_bytes: u64,
}
impl<'a, R: ReadInfo> Loader<'a, R> {
    /// Creates a loader keeping at most `cap` overlaps per read
    #[must_use]
    pub fn new(reads: &'a R, config: &CacheConfig, cap: u32) -> Self {
        let buffer_capacity = config.initial_buffer.max(1);
        Self {
            reads,
            cap,
            max_evalue: config.max_evalue(),
            min_overlap: config.min_overlap,
            report_interval: config.report_interval.max(1),
            group: Vec::with_capacity(buffer_capacity),
            scores: Vec::with_capacity(buffer_capacity),
            sorted: Vec::with_capacity(buffer_capacity),
            kept: Vec::new(),
            buffer_capacity,
            grown_bytes: 0,
        }
    }

    /// Bytes the scratch buffers grew by while loading
    #[must_use]
    pub fn grown_bytes(&self) -> u64 {
        self.grown_bytes
    }

    /// Streams every group of `source` into `arena`, recording each read in `index`
    pub fn load<S, O>(
        &mut self,
        source: &mut S,
        arena: &mut Arena,
        index: &mut OverlapIndex,
        observer: &mut O,
    ) -> Result<LoadStats>
    where
        S: OverlapSource,
        O: CacheObserver,
    {
        let num_reads = self.reads.num_reads();
        let mut stats = LoadStats {
            in_store: source.num_overlaps_in_range(),
            ..LoadStats::default()
        };

        source.reset_range();
        let mut previous = 0u32;
        loop {
            let mut group = std::mem::take(&mut self.group);
            let n = source.next_group(&mut group);
            self.group = group;
            if n? == 0 {
                break;
            }

            let a_id = self.group[0].a_id;
            if let Some(stray) = self.group.iter().find(|ovl| ovl.a_id != a_id) {
                return Err(LoadError::MixedGroup(a_id, stray.a_id).into());
            }
            if a_id == 0 || a_id > num_reads {
                return Err(LoadError::OutOfRange(a_id, num_reads).into());
            }
            if a_id <= previous {
                return Err(LoadError::UnorderedGroup {
                    previous,
                    current: a_id,
                }
                .into());
            }
            previous = a_id;

            self.grow_buffers();
            stats.processed += self.group.len() as u64;
            stats.reads += 1;
            stats.duplicates += filter_duplicates(&mut self.group, self.reads);

            self.score_group()?;
            let kept = self.kept.len();
            if kept > self.cap as usize {
                observer.on_soft_cap_overrun(a_id, kept, self.group.len(), self.cap);
            }
            if kept > 0 {
                let location = arena.append(&self.kept)?;
                index.set(a_id, location, kept as u32);
            }
            stats.loaded += kept as u64;

            if stats.reads % self.report_interval == 0 {
                observer.on_progress(&stats, Some(a_id));
            }
        }
        observer.on_progress(&stats, None);
        Ok(stats)
    }

    /// Doubles the scratch buffers until the current group fits
    fn grow_buffers(&mut self) {
        let needed = self.group.len();
        if needed <= self.buffer_capacity {
            return;
        }
        let mut capacity = self.buffer_capacity;
        while capacity < needed {
            capacity *= 2;
        }
        let per_overlap = std::mem::size_of::<RawOverlap>() + 2 * std::mem::size_of::<u64>();
        self.grown_bytes += ((capacity - self.buffer_capacity) * per_overlap) as u64;
        self.buffer_capacity = capacity;
        self.group.reserve(capacity - self.group.len());
        self.scores.reserve(capacity - self.scores.len());
        self.sorted.reserve(capacity - self.sorted.len());
    }

    /// Score of one overlap, zero if it is rejected
    fn score(&self, index: usize, ovl: &RawOverlap) -> u64 {
        if self.reads.read_length(ovl.a_id) == 0 || self.reads.read_length(ovl.b_id) == 0 {
            return 0;
        }
        if ovl.evalue > self.max_evalue {
            return 0;
        }
        let olen = self
            .reads
            .overlap_length(ovl.a_id, ovl.b_id, ovl.a_hang, ovl.b_hang);
        if olen == 0 || olen < self.min_overlap {
            return 0;
        }
        let quality = (u64::from(olen.min(MAX_SCORED_LENGTH)) << EVALUE_BITS)
            | u64::from(!ovl.evalue & EVALUE_MASK);
        (quality << SALT_BITS) | (index as u64 & SALT_MASK)
    }

    /// Fills `kept` with the packed overlaps of the current group that survive
    fn score_group(&mut self) -> Result<()> {
        self.scores.clear();
        for (i, ovl) in self.group.iter().enumerate() {
            let score = self.score(i, ovl);
            self.scores.push(score);
        }

        let survivors = self.scores.iter().filter(|&&score| score > 0).count();
        let cap = self.cap as usize;
        let cutoff = if survivors <= cap {
            1
        } else {
            self.sorted.clear();
            self.sorted.extend_from_slice(&self.scores);
            self.sorted.sort_unstable();
            self.sorted[self.sorted.len() - cap]
        };

        self.kept.clear();
        for (ovl, &score) in self.group.iter().zip(&self.scores) {
            if score < cutoff || score == 0 {
                continue;
            }
            for hang in [ovl.a_hang, ovl.b_hang] {
                if !(MIN_HANG..=MAX_HANG).contains(&hang) {
                    return Err(LoadError::HangOutOfRange(hang).into());
                }
            }
            self.kept.push(OverlapRecord::new(
                ovl.a_id, ovl.b_id, ovl.a_hang, ovl.b_hang, ovl.flipped, ovl.evalue,
            ));
        }
        Ok(())
    }
}
