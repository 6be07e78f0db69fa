//! Cache configuration
//!
//! A [`CacheConfig`] collects every knob that influences how the cache is built:
//! the memory ceiling, the overlap quality filters, snapshot behaviour and the
//! sizes of the structures that will share memory with the cache.

use std::path::{Path, PathBuf};

use crate::{encode_evalue, MAX_ERATE};

/// Default capacity of each per-thread scratch buffer, in records
pub const DEFAULT_SCRATCH_RECORDS: usize = 1024 * 1024;

/// Default capacity of the initial load buffer, in raw overlaps
pub const DEFAULT_INITIAL_BUFFER: usize = 1024 * 1024;

/// Default number of reads between progress reports
pub const DEFAULT_REPORT_INTERVAL: u64 = 1_000_000;

/// Memory ceiling for the whole process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryLimit {
    /// Use all physical memory, holding back 10% for other processes
    #[default]
    Physical,
    /// No limit
    Unlimited,
    /// An explicit number of bytes
    Bytes(u64),
}
impl MemoryLimit {
    /// Interprets a raw byte count: zero is unlimited, `u64::MAX` is physical memory
    #[must_use]
    pub fn from_bytes(bytes: u64) -> Self {
        match bytes {
            0 => Self::Unlimited,
            u64::MAX => Self::Physical,
            n => Self::Bytes(n),
        }
    }
}

/// Per-read sizes of the downstream structures that coexist with the cache
///
/// These are only used to account memory; the cache never allocates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    /// Bytes per read of the best-edge table
    pub best_edge: u64,
    /// Bytes per read of the unitig layout (read placements)
    pub layout_node: u64,
    /// Bytes per read of one error-profile value (two are accounted per read)
    pub error_profile: u64,
}
impl Default for Footprint {
    fn default() -> Self {
        Self {
            best_edge: 24,
            layout_node: 40,
            error_profile: 16,
        }
    }
}

/// Configuration of an [`OverlapCache`](crate::OverlapCache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub memory_limit: MemoryLimit,
    /// Overlaps with an error rate above this are discarded
    pub max_erate: f64,
    /// Overlaps shorter than this are discarded
    pub min_overlap: u32,
    /// Fixed per-read cap; when unset the cap is solved from the memory budget
    pub max_overlaps: Option<u32>,
    /// Persist overlaps and stop without building the cache for graph construction
    pub save_only: bool,
    /// Persist a snapshot after building
    pub do_save: bool,
    /// Path prefix of the snapshot files
    pub prefix: Option<PathBuf>,
    /// Number of worker threads downstream (0 uses every core)
    pub threads: usize,
    pub scratch_records: usize,
    pub initial_buffer: usize,
    /// Records per arena block; when unset the size follows the memory budget
    pub block_capacity: Option<usize>,
    pub report_interval: u64,
    pub footprint: Footprint,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_limit: MemoryLimit::default(),
            max_erate: MAX_ERATE,
            min_overlap: 0,
            max_overlaps: None,
            save_only: false,
            do_save: false,
            prefix: None,
            threads: 0,
            scratch_records: DEFAULT_SCRATCH_RECORDS,
            initial_buffer: DEFAULT_INITIAL_BUFFER,
            block_capacity: None,
            report_interval: DEFAULT_REPORT_INTERVAL,
            footprint: Footprint::default(),
        }
    }
}
impl CacheConfig {
    #[must_use]
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// The error threshold as a quantized evalue
    #[must_use]
    pub fn max_evalue(&self) -> u16 {
        encode_evalue(self.max_erate)
    }

    /// Number of downstream worker threads
    #[must_use]
    pub fn num_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// Path of the snapshot metadata file
    #[must_use]
    pub fn metadata_path(&self) -> Option<PathBuf> {
        self.prefix.as_deref().map(|p| with_suffix(p, ".ovlCache"))
    }

    /// Path of the snapshot data file
    #[must_use]
    pub fn data_path(&self) -> Option<PathBuf> {
        self.prefix.as_deref().map(|p| with_suffix(p, ".ovlCacheDat"))
    }

    /// Path of the log listing overlaps removed while repairing a snapshot
    #[must_use]
    pub fn removal_log_path(&self) -> Option<PathBuf> {
        self.prefix
            .as_deref()
            .map(|p| with_suffix(p, ".overlapsRemoved.log"))
    }
}

/// Appends a suffix to the final component of a path
pub(crate) fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Builder for [`CacheConfig`]
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}
impl CacheConfigBuilder {
    #[must_use]
    pub fn memory_limit(mut self, limit: MemoryLimit) -> Self {
        self.config.memory_limit = limit;
        self
    }
    #[must_use]
    pub fn max_erate(mut self, erate: f64) -> Self {
        self.config.max_erate = erate;
        self
    }
    #[must_use]
    pub fn min_overlap(mut self, min_overlap: u32) -> Self {
        self.config.min_overlap = min_overlap;
        self
    }
    #[must_use]
    pub fn max_overlaps(mut self, cap: u32) -> Self {
        self.config.max_overlaps = Some(cap);
        self
    }
    #[must_use]
    pub fn save_only(mut self, save_only: bool) -> Self {
        self.config.save_only = save_only;
        self
    }
    #[must_use]
    pub fn do_save(mut self, do_save: bool) -> Self {
        self.config.do_save = do_save;
        self
    }
    #[must_use]
    pub fn prefix<P: Into<PathBuf>>(mut self, prefix: P) -> Self {
        self.config.prefix = Some(prefix.into());
        self
    }
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }
    #[must_use]
    pub fn scratch_records(mut self, records: usize) -> Self {
        self.config.scratch_records = records;
        self
    }
    #[must_use]
    pub fn initial_buffer(mut self, overlaps: usize) -> Self {
        self.config.initial_buffer = overlaps.max(1);
        self
    }
    #[must_use]
    pub fn block_capacity(mut self, records: usize) -> Self {
        self.config.block_capacity = Some(records.max(1));
        self
    }
    #[must_use]
    pub fn report_interval(mut self, reads: u64) -> Self {
        self.config.report_interval = reads.max(1);
        self
    }
    #[must_use]
    pub fn footprint(mut self, footprint: Footprint) -> Self {
        self.config.footprint = footprint;
        self
    }
    #[must_use]
    pub fn build(self) -> CacheConfig {
        self.config
    }
}
