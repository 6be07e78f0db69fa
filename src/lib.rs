//! A memory-budgeted cache of read overlaps for assembly graph construction.
//!
//! Overlaps are streamed from an [`OverlapSource`] one read at a time. Only the best
//! overlaps of each read are kept, with the per-read cap chosen so the whole cache
//! fits in the configured memory. The result can be written as a snapshot and mapped
//! back in on the next run.

mod arena;
mod budget;
mod cache;
mod config;
mod error;
mod index;
mod loader;
mod observer;
mod record;
mod snapshot;
mod solver;
mod store;

pub use arena::Arena;
pub use budget::{block_capacity_for, physical_memory, MemoryPlan};
pub use cache::{BuildOutcome, OverlapCache};
pub use config::{
    CacheConfig, CacheConfigBuilder, Footprint, MemoryLimit, DEFAULT_INITIAL_BUFFER,
    DEFAULT_REPORT_INTERVAL, DEFAULT_SCRATCH_RECORDS,
};
pub use error::{BudgetError, Error, LoadError, Result, SnapshotError};
pub use index::{Location, OverlapIndex};
pub use loader::{filter_duplicates, LoadStats, Loader, DROPPED_EVALUE, SALT_BITS, SALT_MASK};
pub use observer::{CacheObserver, FileAction, LogObserver, NullObserver};
pub use record::{
    decode_evalue, encode_evalue, OverlapRecord, EVALUE_BITS, HANG_BITS, MAX_ERATE, MAX_EVALUE,
    MAX_HANG, MIN_HANG, READLEN_BITS, RECORD_SIZE,
};
pub use snapshot::{
    map_data, repair, RepairReport, SnapshotHeader, SnapshotMetadata, MAGIC, SIZE_HEADER,
};
pub use solver::{solve_cap, CapIteration, CapSolution, MIN_CAP};
pub use store::{MemoryOverlapStore, OverlapSource, RawOverlap, ReadCounts, ReadInfo, ReadTable};

#[cfg(test)]
mod testing {

    use super::*;

    fn store() -> (ReadTable, MemoryOverlapStore) {
        let reads = ReadTable::from_lengths(&[1000, 800, 1200, 950]);
        let mut overlaps = Vec::new();
        for a in 1..=4 {
            for b in 1..=4 {
                if a != b {
                    overlaps.push(RawOverlap::new(a, b, 100, 100, a % 2 == 0, 25));
                    overlaps.push(RawOverlap::new(a, b, 150, 150, false, 10));
                }
            }
        }
        (reads, MemoryOverlapStore::new(overlaps))
    }

    #[test]
    fn test_build_and_query() -> Result<()> {
        let (reads, mut store) = store();
        let config = CacheConfig::builder()
            .memory_limit(MemoryLimit::Bytes(32 * 1024 * 1024))
            .threads(1)
            .scratch_records(8)
            .initial_buffer(4)
            .block_capacity(1024)
            .build();

        let cache = OverlapCache::open_or_build(&config, &reads, &mut store, &mut LogObserver)?
            .into_cache()
            .ok_or_else(|| anyhow::anyhow!("expected a cache"))?;

        let stats = cache.load_stats().copied().unwrap_or_default();
        assert_eq!(stats.processed, 24);
        assert_eq!(stats.duplicates, 12);
        assert_eq!(cache.total_overlaps(), 12);

        for a in 1..=4 {
            let overlaps = cache.overlaps(a);
            assert_eq!(overlaps.len(), 3);
            // the longer of each duplicate pair survives
            assert!(overlaps.iter().all(|ovl| ovl.a_hang() == 100));
            assert!(overlaps.iter().all(|ovl| ovl.evalue() == 25));
        }
        Ok(())
    }
}
