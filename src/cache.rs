//! The overlap cache
//!
//! [`OverlapCache`] is built once per run, either by reloading a snapshot or by
//! streaming an overlap source through the budget planner, cap solver and loader.
//! Afterwards it is immutable and answers "all overlaps of read R" in constant time.

use std::{fs::File, io::BufWriter};

use memmap2::MmapMut;

use crate::{
    arena::Arena,
    budget::MemoryPlan,
    error::{BudgetError, Error, LoadError, Result, SnapshotError},
    index::{Location, OverlapIndex},
    loader::{LoadStats, Loader},
    observer::{CacheObserver, FileAction},
    snapshot::{self, RepairReport, SnapshotHeader, SnapshotMetadata},
    solver::{self, CapSolution},
    store::{OverlapSource, ReadInfo},
    CacheConfig, OverlapRecord,
};

/// Where the records live
#[derive(Debug)]
enum Storage {
    /// Built from an overlap source
    Heap(Arena),
    /// Reloaded from a snapshot; `None` when the snapshot holds no overlaps
    Mapped(Option<MmapMut>),
}
impl Storage {
    fn get(&self, location: Location, len: u32) -> &[OverlapRecord] {
        match self {
            Self::Heap(arena) => arena.get(location, len),
            Self::Mapped(Some(mmap)) => {
                let records: &[OverlapRecord] = bytemuck::cast_slice(&mmap[..]);
                &records[location.offset..location.offset + len as usize]
            }
            Self::Mapped(None) => &[],
        }
    }
}

/// Result of [`OverlapCache::build`]
#[derive(Debug)]
pub enum BuildOutcome {
    /// The cache is ready for queries
    Cache(OverlapCache),
    /// Save-only mode: the snapshot was written and no cache was kept
    SavedOnly,
}
impl BuildOutcome {
    #[must_use]
    pub fn into_cache(self) -> Option<OverlapCache> {
        match self {
            Self::Cache(cache) => Some(cache),
            Self::SavedOnly => None,
        }
    }
}

/// A memory-budgeted cache of the best overlaps of every read
#[derive(Debug)]
pub struct OverlapCache {
    storage: Storage,
    index: OverlapIndex,
    cap: u32,
    mem_limit: u64,
    mem_used: u64,
    stats: Option<LoadStats>,
    repair: Option<RepairReport>,
    thread_scratch: Vec<Vec<OverlapRecord>>,
}
impl OverlapCache {
    /// Reloads the snapshot at the configured prefix, building the cache if there is none
    pub fn open_or_build<S, R, O>(
        config: &CacheConfig,
        reads: &R,
        source: &mut S,
        observer: &mut O,
    ) -> Result<BuildOutcome>
    where
        S: OverlapSource,
        R: ReadInfo,
        O: CacheObserver,
    {
        if config.prefix.is_some() && !config.save_only {
            if let Some(cache) = Self::load(config, reads, observer)? {
                return Ok(BuildOutcome::Cache(cache));
            }
        }
        Self::build(config, reads, source, observer)
    }

    /// Reloads a snapshot
    ///
    /// Returns `None` if no snapshot exists at the configured prefix. Overlaps
    /// involving reads deleted since the snapshot was written are removed and listed
    /// in the removal log.
    pub fn load<R, O>(config: &CacheConfig, reads: &R, observer: &mut O) -> Result<Option<Self>>
    where
        R: ReadInfo,
        O: CacheObserver,
    {
        let (Some(metadata_path), Some(data_path), Some(log_path)) = (
            config.metadata_path(),
            config.data_path(),
            config.removal_log_path(),
        ) else {
            return Err(SnapshotError::MissingPrefix.into());
        };

        let Some(metadata) = SnapshotMetadata::read(&metadata_path, reads.num_reads())? else {
            return Ok(None);
        };
        observer.on_file(FileAction::Loading, &metadata_path);

        let mut mmap = snapshot::map_data(&data_path, metadata.total())?;
        let mut index = OverlapIndex::from_counts(metadata.counts);

        let log = File::create(&log_path).map_err(|source| Error::file(&log_path, source))?;
        let records: &mut [OverlapRecord] = match mmap.as_mut() {
            Some(mmap) => bytemuck::cast_slice_mut(&mut mmap[..]),
            None => &mut [],
        };
        let report = snapshot::repair(records, &mut index, reads, &mut BufWriter::new(log))?;
        observer.on_repair(&report);

        Ok(Some(Self {
            storage: Storage::Mapped(mmap),
            index,
            cap: metadata.header.cap,
            mem_limit: metadata.header.mem_limit,
            mem_used: metadata.header.mem_used,
            stats: None,
            repair: Some(report),
            thread_scratch: thread_scratch(config),
        }))
    }

    /// Builds the cache from an overlap source
    ///
    /// The memory budget is laid out first, then the per-read cap is chosen (or taken
    /// from the configuration) before a single overlap is loaded. With `do_save` or
    /// `save_only` a snapshot is written at the configured prefix.
    pub fn build<S, R, O>(
        config: &CacheConfig,
        reads: &R,
        source: &mut S,
        observer: &mut O,
    ) -> Result<BuildOutcome>
    where
        S: OverlapSource,
        R: ReadInfo,
        O: CacheObserver,
    {
        let saving = config.do_save || config.save_only;
        let paths = if saving {
            let (Some(metadata_path), Some(data_path)) =
                (config.metadata_path(), config.data_path())
            else {
                return Err(SnapshotError::MissingPrefix.into());
            };
            Some((metadata_path, data_path))
        } else {
            None
        };

        let plan = MemoryPlan::new(config, reads)?;
        observer.on_plan(&plan);
        let limit = plan.limit.unwrap_or(u64::MAX);
        let num_reads = reads.num_reads();

        let counts = source.overlaps_per_read()?;
        let end = u64::from(counts.first) + counts.counts.len() as u64;
        if !counts.counts.is_empty() && end > u64::from(num_reads) + 1 {
            return Err(LoadError::InvalidCounts {
                first: counts.first,
                end,
                num_reads,
            }
            .into());
        }

        let solution = match config.max_overlaps {
            Some(cap) => CapSolution::explicit(cap, num_reads, &counts),
            None => solver::solve_cap(limit, plan.total(), num_reads, &counts, observer)?,
        };
        observer.on_cap(&solution, config.max_overlaps.is_some());

        // no read can keep more than it has
        let largest_group = solution.cap.min(counts.max());
        if largest_group as usize > plan.block_capacity {
            return Err(BudgetError::GroupExceedsBlock {
                records: largest_group as usize,
                capacity: plan.block_capacity,
            }
            .into());
        }
        drop(counts);

        let mut arena = Arena::new(plan.block_capacity);
        if let Some((_, data_path)) = &paths {
            observer.on_file(FileAction::SavingOverlaps, data_path);
            let file = File::create(data_path).map_err(|source| Error::file(data_path, source))?;
            arena = arena.with_spill(file, config.save_only);
        }

        let mut index = OverlapIndex::new(num_reads);
        let mut loader = Loader::new(reads, config, solution.cap);
        let stats = loader.load(source, &mut arena, &mut index, observer)?;
        arena.finish()?;
        let mem_used = plan.total() + loader.grown_bytes();

        if let Some((metadata_path, _)) = &paths {
            observer.on_file(FileAction::SavingMetadata, metadata_path);
            SnapshotMetadata {
                header: SnapshotHeader::new(limit, mem_used, solution.cap),
                counts: index.lengths().to_vec(),
            }
            .write(metadata_path)?;
        }
        if config.save_only {
            return Ok(BuildOutcome::SavedOnly);
        }

        Ok(BuildOutcome::Cache(Self {
            storage: Storage::Heap(arena),
            index,
            cap: solution.cap,
            mem_limit: limit,
            mem_used,
            stats: Some(stats),
            repair: None,
            thread_scratch: thread_scratch(config),
        }))
    }

    /// All overlaps retained for a read
    ///
    /// # Panics
    ///
    /// Panics if `id` is greater than [`num_reads`](Self::num_reads).
    #[must_use]
    pub fn overlaps(&self, id: u32) -> &[OverlapRecord] {
        let len = self.index.len(id);
        if len == 0 {
            return &[];
        }
        self.storage.get(self.index.location(id), len)
    }

    /// Number of overlaps retained for a read
    ///
    /// # Panics
    ///
    /// Panics if `id` is greater than [`num_reads`](Self::num_reads).
    #[must_use]
    pub fn overlap_count(&self, id: u32) -> u32 {
        self.index.len(id)
    }

    #[must_use]
    pub fn num_reads(&self) -> u32 {
        self.index.num_reads()
    }

    /// Total number of retained overlaps
    #[must_use]
    pub fn total_overlaps(&self) -> u64 {
        self.index.total()
    }

    /// Maximum overlaps kept per read
    #[must_use]
    pub fn cap(&self) -> u32 {
        self.cap
    }

    #[must_use]
    pub fn mem_limit(&self) -> u64 {
        self.mem_limit
    }

    /// Memory accounted to everything but the overlaps themselves
    #[must_use]
    pub fn mem_used(&self) -> u64 {
        self.mem_used
    }

    /// Whether the records are served from a snapshot mapping
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    /// Totals of the load, when the cache was built from a source
    #[must_use]
    pub fn load_stats(&self) -> Option<&LoadStats> {
        self.stats.as_ref()
    }

    /// Repairs applied, when the cache was reloaded from a snapshot
    #[must_use]
    pub fn repair_report(&self) -> Option<&RepairReport> {
        self.repair.as_ref()
    }

    /// Hands the per-thread scratch buffers over to the caller
    ///
    /// Every later call returns an empty list.
    pub fn take_thread_scratch(&mut self) -> Vec<Vec<OverlapRecord>> {
        std::mem::take(&mut self.thread_scratch)
    }
}

fn thread_scratch(config: &CacheConfig) -> Vec<Vec<OverlapRecord>> {
    (0..config.num_threads())
        .map(|_| Vec::with_capacity(config.scratch_records))
        .collect()
}

#[cfg(test)]
mod testing {
    use std::{path::Path, sync::Arc};

    use parking_lot::Mutex;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::{
        budget::MemoryPlan, observer::NullObserver, MemoryLimit, MemoryOverlapStore, RawOverlap,
        ReadTable,
    };

    const MIB: u64 = 1024 * 1024;

    fn fixture(num_reads: u32, num_overlaps: usize, seed: u64) -> (ReadTable, MemoryOverlapStore) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let lengths: Vec<u32> = (0..num_reads)
            .map(|_| rng.random_range(1000..20_000))
            .collect();
        let overlaps = (0..num_overlaps)
            .map(|_| {
                let a = rng.random_range(1..=num_reads);
                let b = rng.random_range(1..=num_reads);
                let a_hang = rng.random_range(-800..800);
                let b_hang = rng.random_range(-800..800);
                let flipped = rng.random_bool(0.5);
                RawOverlap::new(a, b, a_hang, b_hang, flipped, rng.random_range(0..500))
            })
            .collect();
        (ReadTable::from_lengths(&lengths), MemoryOverlapStore::new(overlaps))
    }

    fn base_config() -> crate::CacheConfigBuilder {
        CacheConfig::builder()
            .memory_limit(MemoryLimit::Bytes(64 * MIB))
            .threads(2)
            .scratch_records(16)
            .initial_buffer(64)
            .block_capacity(4096)
    }

    fn contents(cache: &OverlapCache) -> Vec<Vec<OverlapRecord>> {
        (0..=cache.num_reads())
            .map(|id| cache.overlaps(id).to_vec())
            .collect()
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Plan,
        Cap(u32, bool),
        File(FileAction, String),
        Repair(RepairReport),
    }

    /// Collects events into a list shared with the test
    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
    }
    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }
    impl CacheObserver for Recorder {
        fn on_plan(&mut self, _plan: &MemoryPlan) {
            self.events.lock().push(Event::Plan);
        }
        fn on_cap(&mut self, solution: &CapSolution, explicit: bool) {
            self.events.lock().push(Event::Cap(solution.cap, explicit));
        }
        fn on_file(&mut self, action: FileAction, path: &Path) {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.events.lock().push(Event::File(action, name));
        }
        fn on_repair(&mut self, report: &RepairReport) {
            self.events.lock().push(Event::Repair(*report));
        }
    }

    #[test]
    fn test_cache_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OverlapCache>();
    }

    #[test]
    fn test_build_in_memory() -> Result<()> {
        let (reads, mut store) = fixture(300, 20_000, 1);
        let config = base_config().max_overlaps(20).build();
        let mut recorder = Recorder::default();
        let mut cache = OverlapCache::build(&config, &reads, &mut store, &mut recorder)?
            .into_cache()
            .ok_or_else(|| anyhow::anyhow!("expected a cache"))?;

        assert!(!cache.is_mapped());
        assert_eq!(cache.cap(), 20);
        assert_eq!(cache.num_reads(), 300);
        assert!(cache.overlaps(0).is_empty());
        let stats = *cache.load_stats().ok_or_else(|| anyhow::anyhow!("no stats"))?;
        assert_eq!(stats.processed, 20_000);
        assert_eq!(stats.loaded, cache.total_overlaps());
        for id in 1..=300 {
            let overlaps = cache.overlaps(id);
            assert_eq!(overlaps.len(), cache.overlap_count(id) as usize);
            assert!(overlaps.len() <= 20);
            assert!(overlaps.iter().all(|ovl| ovl.a_id() == id));
        }
        assert_eq!(recorder.events(), vec![Event::Plan, Event::Cap(20, true)]);

        let scratch = cache.take_thread_scratch();
        assert_eq!(scratch.len(), 2);
        assert!(scratch.iter().all(|buffer| buffer.capacity() >= 16));
        assert!(cache.take_thread_scratch().is_empty());
        Ok(())
    }

    #[test]
    fn test_solved_cap_within_budget() -> Result<()> {
        let (reads, mut store) = fixture(200, 30_000, 2);
        let config = base_config()
            .memory_limit(MemoryLimit::Bytes(2 * MIB))
            .build();
        let plan = MemoryPlan::new(&config, &reads)?;
        let cache = OverlapCache::build(&config, &reads, &mut store, &mut NullObserver)?
            .into_cache()
            .ok_or_else(|| anyhow::anyhow!("expected a cache"))?;

        assert!(cache.cap() >= solver::MIN_CAP);
        assert_eq!(cache.mem_limit(), 2 * MIB);
        let load_bytes = cache.total_overlaps() * crate::RECORD_SIZE as u64;
        assert!(plan.total() + load_bytes < 2 * MIB);
        for id in 1..=200 {
            assert!(cache.overlap_count(id) <= cache.cap());
        }
        Ok(())
    }

    #[test]
    fn test_not_enough_memory() {
        let (reads, mut store) = fixture(5000, 100, 3);
        let config = base_config()
            .memory_limit(MemoryLimit::Bytes(MIB))
            .build();
        let result = OverlapCache::build(&config, &reads, &mut store, &mut NullObserver);
        assert!(matches!(
            result,
            Err(Error::BudgetError(BudgetError::CapTooSmall(..)))
        ));
    }

    #[test]
    fn test_group_exceeds_block_before_loading() {
        let (reads, mut store) = fixture(50, 2000, 4);
        let config = base_config().block_capacity(8).max_overlaps(10).build();
        let mut recorder = Recorder::default();
        let result = OverlapCache::build(&config, &reads, &mut store, &mut recorder);
        assert!(matches!(
            result,
            Err(Error::BudgetError(BudgetError::GroupExceedsBlock {
                records: 10,
                capacity: 8
            }))
        ));
    }

    #[test]
    fn test_large_explicit_cap_fits_small_blocks() -> Result<()> {
        let reads = ReadTable::from_lengths(&[100; 6]);
        let overlaps = (2..=6)
            .map(|b| RawOverlap::new(1, b, 10, 10, false, 1))
            .collect();
        let mut store = MemoryOverlapStore::new(overlaps);
        let config = base_config()
            .block_capacity(8)
            .max_overlaps(1_000_000)
            .build();
        let cache = OverlapCache::build(&config, &reads, &mut store, &mut NullObserver)?
            .into_cache()
            .ok_or_else(|| anyhow::anyhow!("expected a cache"))?;
        assert_eq!(cache.cap(), 1_000_000);
        assert_eq!(cache.overlap_count(1), 5);
        Ok(())
    }

    #[test]
    fn test_saving_requires_prefix() {
        let (reads, mut store) = fixture(10, 10, 5);
        let config = base_config().do_save(true).build();
        let result = OverlapCache::build(&config, &reads, &mut store, &mut NullObserver);
        assert!(matches!(
            result,
            Err(Error::SnapshotError(SnapshotError::MissingPrefix))
        ));
    }

    #[test]
    fn test_snapshot_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (reads, mut store) = fixture(400, 25_000, 6);
        let config = base_config()
            .max_overlaps(15)
            .block_capacity(100)
            .do_save(true)
            .prefix(dir.path().join("asm"))
            .build();

        let mut recorder = Recorder::default();
        let built = OverlapCache::open_or_build(&config, &reads, &mut store, &mut recorder)?
            .into_cache()
            .ok_or_else(|| anyhow::anyhow!("expected a cache"))?;
        assert!(!built.is_mapped());

        let mut recorder = Recorder::default();
        let loaded = OverlapCache::open_or_build(&config, &reads, &mut store, &mut recorder)?
            .into_cache()
            .ok_or_else(|| anyhow::anyhow!("expected a cache"))?;
        assert!(loaded.is_mapped());
        assert_eq!(loaded.cap(), 15);
        assert_eq!(loaded.mem_used(), built.mem_used());
        assert_eq!(contents(&loaded), contents(&built));
        assert_eq!(
            recorder.events(),
            vec![
                Event::File(FileAction::Loading, "asm.ovlCache".to_string()),
                Event::Repair(RepairReport::default()),
            ]
        );
        assert!(loaded.repair_report().is_some_and(RepairReport::is_clean));
        Ok(())
    }

    #[test]
    fn test_save_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (reads, mut store) = fixture(100, 5000, 7);
        let prefix = dir.path().join("asm");
        let config = base_config()
            .max_overlaps(12)
            .block_capacity(50)
            .prefix(&prefix)
            .save_only(true)
            .build();

        let mut recorder = Recorder::default();
        let outcome = OverlapCache::open_or_build(&config, &reads, &mut store, &mut recorder)?;
        assert!(matches!(outcome, BuildOutcome::SavedOnly));
        assert_eq!(
            recorder.events(),
            vec![
                Event::Plan,
                Event::Cap(12, true),
                Event::File(FileAction::SavingOverlaps, "asm.ovlCacheDat".to_string()),
                Event::File(FileAction::SavingMetadata, "asm.ovlCache".to_string()),
            ]
        );

        let in_memory = OverlapCache::build(
            &base_config().max_overlaps(12).build(),
            &reads,
            &mut store,
            &mut NullObserver,
        )?
        .into_cache()
        .ok_or_else(|| anyhow::anyhow!("expected a cache"))?;
        let config = base_config().prefix(&prefix).build();
        let loaded = OverlapCache::load(&config, &reads, &mut NullObserver)?
            .ok_or_else(|| anyhow::anyhow!("expected a snapshot"))?;
        assert_eq!(contents(&loaded), contents(&in_memory));
        Ok(())
    }

    #[test]
    fn test_missing_snapshot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (reads, _) = fixture(10, 0, 8);
        let config = base_config().prefix(dir.path().join("nothing")).build();
        assert!(OverlapCache::load(&config, &reads, &mut NullObserver)?.is_none());
        assert!(matches!(
            OverlapCache::load(&base_config().build(), &reads, &mut NullObserver),
            Err(Error::SnapshotError(SnapshotError::MissingPrefix))
        ));
        Ok(())
    }

    #[test]
    fn test_empty_snapshot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let reads = ReadTable::from_lengths(&[100; 4]);
        let mut store = MemoryOverlapStore::new(Vec::new());
        let config = base_config()
            .max_overlaps(10)
            .do_save(true)
            .prefix(dir.path().join("asm"))
            .build();
        OverlapCache::build(&config, &reads, &mut store, &mut NullObserver)?;

        let loaded = OverlapCache::load(&config, &reads, &mut NullObserver)?
            .ok_or_else(|| anyhow::anyhow!("expected a snapshot"))?;
        assert!(loaded.is_mapped());
        assert_eq!(loaded.total_overlaps(), 0);
        assert!((0..=4).all(|id| loaded.overlaps(id).is_empty()));
        Ok(())
    }

    #[test]
    fn test_reload_after_read_deleted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("asm");
        let overlaps = vec![
            RawOverlap::new(1, 2, 10, 10, false, 1),
            RawOverlap::new(1, 3, 20, 20, false, 1),
            RawOverlap::new(2, 1, -10, -10, false, 1),
            RawOverlap::new(2, 3, 10, 10, false, 1),
            RawOverlap::new(2, 3, 15, 15, true, 1),
            RawOverlap::new(3, 1, -20, -20, false, 1),
            RawOverlap::new(3, 2, -10, -10, false, 1),
        ];
        let mut reads = ReadTable::from_lengths(&[100, 100, 100]);
        let config = base_config()
            .max_overlaps(10)
            .do_save(true)
            .prefix(&prefix)
            .build();
        let mut store = MemoryOverlapStore::new(overlaps);
        let built = OverlapCache::build(&config, &reads, &mut store, &mut NullObserver)?
            .into_cache()
            .ok_or_else(|| anyhow::anyhow!("expected a cache"))?;
        // the (2, 3) duplicate collapses
        assert_eq!(built.overlap_count(2), 2);

        reads.delete(2);
        let loaded = OverlapCache::load(&config, &reads, &mut NullObserver)?
            .ok_or_else(|| anyhow::anyhow!("expected a snapshot"))?;
        assert_eq!(loaded.overlap_count(2), 0);
        assert_eq!(loaded.overlaps(1).len(), 1);
        assert_eq!(loaded.overlaps(1)[0].b_id(), 3);
        assert_eq!(loaded.overlaps(3).len(), 1);
        assert_eq!(loaded.overlaps(3)[0].b_id(), 1);
        assert_eq!(
            loaded.repair_report().copied(),
            Some(RepairReport {
                deleted_reads: 1,
                removed_from_deleted: 2,
                modified_reads: 2,
                removed_from_alive: 2,
            })
        );

        let log = std::fs::read_to_string(dir.path().join("asm.overlapsRemoved.log"))?;
        assert_eq!(log.lines().count(), 3);
        assert!(log.contains("from deleted read 2"));

        // the snapshot on disk is untouched, a second reload repairs the same way
        let again = OverlapCache::load(&config, &reads, &mut NullObserver)?
            .ok_or_else(|| anyhow::anyhow!("expected a snapshot"))?;
        assert_eq!(contents(&again), contents(&loaded));
        Ok(())
    }

    #[test]
    fn test_concurrent_queries() -> Result<()> {
        let (reads, mut store) = fixture(500, 40_000, 9);
        let config = base_config().max_overlaps(30).build();
        let cache = OverlapCache::build(&config, &reads, &mut store, &mut NullObserver)?
            .into_cache()
            .ok_or_else(|| anyhow::anyhow!("expected a cache"))?;
        let expected = cache.total_overlaps();

        let totals: Vec<u64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        (0..=cache.num_reads())
                            .map(|id| cache.overlaps(id).len() as u64)
                            .sum::<u64>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_default())
                .collect()
        });
        assert!(totals.iter().all(|&total| total == expected));
        Ok(())
    }
}
