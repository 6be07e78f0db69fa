//! Per-read cap selection
//!
//! The solver looks for the largest number of overlaps each read may keep such that
//! the retained overlaps of all reads still fit in memory. Reads with fewer overlaps
//! than the cap leave room behind, which is redistributed over the reads that are
//! still truncated until nothing more fits.

use crate::{
    error::{BudgetError, Result},
    observer::CacheObserver,
    store::ReadCounts,
    RECORD_SIZE,
};

/// Smallest cap the solver will accept
pub const MIN_CAP: u32 = 10;

/// Statistics of one solver round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapIteration {
    pub cap: u32,
    pub below: u32,
    pub equal: u32,
    pub above: u32,
    pub total_load: u64,
    /// Bytes already accounted to other structures
    pub used: u64,
    /// Bytes the retained overlaps would take
    pub load_bytes: u64,
    pub limit: u64,
}

/// The chosen cap and how the reads distribute around it
///
/// # Fields
///
/// * `below` - reads with fewer overlaps than the cap (all loaded)
/// * `equal` - reads with exactly `cap` overlaps (all loaded)
/// * `above` - reads with more overlaps than the cap (truncated)
/// * `total_load` - overlaps that will be retained
/// * `iterations` - solver rounds run, zero for an explicit cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapSolution {
    pub cap: u32,
    pub below: u32,
    pub equal: u32,
    pub above: u32,
    pub total_load: u64,
    pub iterations: u32,
}
impl CapSolution {
    /// Classifies the reads against a cap chosen by the caller
    #[must_use]
    pub fn explicit(cap: u32, num_reads: u32, counts: &ReadCounts) -> Self {
        classify(cap, num_reads, counts)
    }

    /// Bytes the retained overlaps take
    #[must_use]
    pub fn load_bytes(&self) -> u64 {
        self.total_load.saturating_mul(RECORD_SIZE as u64)
    }
}

fn classify(cap: u32, num_reads: u32, counts: &ReadCounts) -> CapSolution {
    let mut equal = 0u32;
    let mut above = 0u32;
    let mut total_load = 0u64;
    for &count in &counts.counts {
        match count.cmp(&cap) {
            std::cmp::Ordering::Less => {}
            std::cmp::Ordering::Equal => equal += 1,
            std::cmp::Ordering::Greater => above += 1,
        }
        total_load += u64::from(count.min(cap));
    }
    CapSolution {
        cap,
        below: num_reads.saturating_sub(equal + above),
        equal,
        above,
        total_load,
        iterations: 0,
    }
}

/// Finds the largest cap whose retained overlaps fit in `limit - used` bytes
///
/// # Arguments
///
/// * `limit` - the memory ceiling in bytes
/// * `used` - bytes already accounted to other structures
/// * `num_reads` - number of reads
/// * `counts` - number of overlaps of each read
///
/// Every round is reported to `observer`.
pub fn solve_cap<O: CacheObserver>(
    limit: u64,
    used: u64,
    num_reads: u32,
    counts: &ReadCounts,
    observer: &mut O,
) -> Result<CapSolution> {
    let available = limit.saturating_sub(used);
    let per_read = u64::from(num_reads.max(1)) * RECORD_SIZE as u64;
    let initial = u32::try_from(available / per_read).unwrap_or(u32::MAX);
    if initial < MIN_CAP {
        return Err(BudgetError::CapTooSmall(initial, MIN_CAP).into());
    }

    let max_count = counts.max();
    let fits = |total_load: u64| {
        used.saturating_add(total_load.saturating_mul(RECORD_SIZE as u64)) < limit
    };

    let mut cap = initial.min(max_count.max(MIN_CAP));
    let mut last_good = 0u32;
    let mut iterations = 0u32;
    loop {
        let mut solution = classify(cap, num_reads, counts);
        iterations += 1;
        observer.on_cap_iteration(&CapIteration {
            cap,
            below: solution.below,
            equal: solution.equal,
            above: solution.above,
            total_load: solution.total_load,
            used,
            load_bytes: solution.load_bytes(),
            limit,
        });

        if !fits(solution.total_load) {
            observer.on_cap_revert(last_good);
            if last_good < MIN_CAP {
                return Err(BudgetError::CapTooSmall(last_good, MIN_CAP).into());
            }
            solution = classify(last_good, num_reads, counts);
            solution.iterations = iterations;
            return Ok(solution);
        }

        if solution.above == 0 {
            solution.iterations = iterations;
            return Ok(solution);
        }

        let free = available - solution.load_bytes();
        let adjust = free / u64::from(solution.above) / RECORD_SIZE as u64;
        last_good = cap;
        cap = u32::try_from(u64::from(cap) + adjust)
            .unwrap_or(u32::MAX)
            .min(max_count);
        if cap == last_good {
            solution.iterations = iterations;
            return Ok(solution);
        }
    }
}
