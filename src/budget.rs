//! Memory budget planning
//!
//! Before any overlap is loaded, every structure that will share memory with the
//! cache is accounted for. Whatever remains of the memory ceiling is the budget for
//! overlap payload, which in turn decides the arena block size and the per-read cap.

use crate::{
    error::{BudgetError, Result},
    index::Location,
    store::{RawOverlap, ReadInfo},
    CacheConfig, MemoryLimit, RECORD_SIZE,
};

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Fraction of physical memory held back for other processes
const OTHER_PROCESSES_DIVISOR: u64 = 10;

/// Total physical memory of this machine in bytes
pub fn physical_memory() -> Result<u64> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    match system.total_memory() {
        0 => Err(BudgetError::UnknownPhysicalMemory.into()),
        bytes => Ok(bytes),
    }
}

/// Number of records per arena block for a given overlap budget
///
/// Below 8 GiB blocks are 128 MiB, up to 64 GiB the budget is split in 64 blocks,
/// beyond that blocks are 1 GiB.
#[must_use]
pub fn block_capacity_for(residual: u64) -> usize {
    let bytes = if residual <= 8 * GIB {
        128 * MIB
    } else if residual <= 64 * GIB {
        residual / 64
    } else {
        GIB
    };
    (bytes / RECORD_SIZE as u64) as usize
}

/// Accounting of the memory ceiling
///
/// Each field holds the bytes attributed to one coexisting structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPlan {
    /// The memory ceiling, `None` when unlimited
    pub limit: Option<u64>,
    pub read_data: u64,
    pub best_edges: u64,
    pub layouts: u64,
    pub tigs: u64,
    pub id_maps: u64,
    pub error_profiles: u64,
    pub cache_index: u64,
    pub load_buffer: u64,
    pub thread_data: u64,
    pub read_counts: u64,
    pub other_processes: u64,
    /// Bytes left for overlap payload
    pub residual: u64,
    /// Records per arena block
    pub block_capacity: usize,
}
impl MemoryPlan {
    /// Lays out the budget, detecting physical memory if the configuration asks for it
    pub fn new<R: ReadInfo>(config: &CacheConfig, reads: &R) -> Result<Self> {
        let physical = match config.memory_limit {
            MemoryLimit::Physical => Some(physical_memory()?),
            // only compared against, so an unknown size is no error here
            MemoryLimit::Bytes(_) => physical_memory().ok(),
            MemoryLimit::Unlimited => None,
        };
        Self::with_physical(config, reads, physical)
    }

    /// Lays out the budget against a known amount of physical memory
    ///
    /// `physical` is required for [`MemoryLimit::Physical`]. An explicit byte limit
    /// equal to `physical` is treated the same way and keeps the reservation for
    /// other processes.
    pub fn with_physical<R: ReadInfo>(
        config: &CacheConfig,
        reads: &R,
        physical: Option<u64>,
    ) -> Result<Self> {
        let (limit, other_processes) = match config.memory_limit {
            MemoryLimit::Physical => {
                let physical = physical.ok_or(BudgetError::UnknownPhysicalMemory)?;
                (Some(physical), physical / OTHER_PROCESSES_DIVISOR)
            }
            MemoryLimit::Unlimited => (None, 0),
            MemoryLimit::Bytes(bytes) if physical == Some(bytes) => {
                (Some(bytes), bytes / OTHER_PROCESSES_DIVISOR)
            }
            MemoryLimit::Bytes(bytes) => (Some(bytes), 0),
        };

        let n = u64::from(reads.num_reads());
        let footprint = config.footprint;

        // structures only needed when tigs are built
        let tig_building = !config.save_only;
        let when_building = |bytes: u64| if tig_building { bytes } else { 0 };

        let mut plan = Self {
            limit,
            read_data: reads.memory_usage(),
            best_edges: when_building(n * footprint.best_edge),
            layouts: when_building(n * footprint.layout_node),
            tigs: when_building(n * 4 / 16),
            id_maps: when_building(n * 4 * 2),
            error_profiles: when_building(n * footprint.error_profile * 2),
            cache_index: (n + 1) * (std::mem::size_of::<Location>() + 4) as u64,
            load_buffer: config.initial_buffer as u64
                * (std::mem::size_of::<RawOverlap>() + 2 * std::mem::size_of::<u64>()) as u64,
            thread_data: (config.num_threads() * config.scratch_records * RECORD_SIZE) as u64,
            read_counts: (n + 1) * 4,
            other_processes,
            residual: 0,
            block_capacity: 0,
        };

        let total = plan.total();
        let ceiling = limit.unwrap_or(u64::MAX);
        if ceiling <= total {
            return Err(BudgetError::InsufficientMemory {
                required: total,
                limit: ceiling,
            }
            .into());
        }
        plan.residual = ceiling - total;
        plan.block_capacity = config
            .block_capacity
            .unwrap_or_else(|| block_capacity_for(plan.residual));
        Ok(plan)
    }

    /// Named line items of the plan, in reporting order
    #[must_use]
    pub fn items(&self) -> [(&'static str, u64); 11] {
        [
            ("read data", self.read_data),
            ("best edges", self.best_edges),
            ("unitig layouts", self.layouts),
            ("tigs", self.tigs),
            ("id maps", self.id_maps),
            ("error profiles", self.error_profiles),
            ("overlap cache pointers", self.cache_index),
            ("overlap cache initial bucket", self.load_buffer),
            ("overlap cache thread data", self.thread_data),
            ("number of overlaps per read", self.read_counts),
            ("other processes", self.other_processes),
        ]
    }

    /// Bytes accounted to everything but overlap payload
    #[must_use]
    pub fn total(&self) -> u64 {
        self.items()
            .iter()
            .fold(0u64, |acc, (_, bytes)| acc.saturating_add(*bytes))
    }

    /// Bytes per arena block
    #[must_use]
    pub fn block_bytes(&self) -> u64 {
        (self.block_capacity * RECORD_SIZE) as u64
    }
}
