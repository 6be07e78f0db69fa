//! Progress and diagnostics reporting
//!
//! The cache never writes to a log directly. Everything worth reporting is passed to
//! a [`CacheObserver`]; [`LogObserver`] forwards it to the [`log`] facade and
//! [`NullObserver`] discards it.

use std::path::Path;

use auto_impl::auto_impl;

use crate::{
    budget::MemoryPlan,
    loader::LoadStats,
    snapshot::RepairReport,
    solver::{CapIteration, CapSolution},
};

/// Receiver of the events emitted while the cache is built or reloaded
///
/// Every method has an empty default implementation.
#[auto_impl(&mut, Box)]
#[allow(unused_variables)]
pub trait CacheObserver {
    /// The memory budget has been laid out
    fn on_plan(&mut self, plan: &MemoryPlan) {}

    /// One round of the cap solver finished
    fn on_cap_iteration(&mut self, iteration: &CapIteration) {}

    /// The cap solver reverted to the last cap that fit
    fn on_cap_revert(&mut self, cap: u32) {}

    /// The per-read cap is final
    fn on_cap(&mut self, solution: &CapSolution, explicit: bool) {}

    /// Periodic load progress; `read` is the A-read just loaded
    fn on_progress(&mut self, stats: &LoadStats, read: Option<u32>) {}

    /// A read kept more overlaps than the cap because of tied scores
    fn on_soft_cap_overrun(&mut self, read: u32, kept: usize, total: usize, cap: u32) {}

    /// A file is about to be written or read
    fn on_file(&mut self, action: FileAction, path: &Path) {}

    /// Overlaps to reads deleted since the snapshot were removed
    fn on_repair(&mut self, report: &RepairReport) {}
}

/// What is being done to a snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    SavingOverlaps,
    SavingMetadata,
    Loading,
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;
impl CacheObserver for NullObserver {}

/// Observer that writes every event through the `log` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

fn mb(bytes: u64) -> u64 {
    bytes >> 20
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// One-line summary of a snapshot repair
fn repair_summary(report: &RepairReport) -> String {
    format!(
        "removed {} overlaps from {} deleted reads; removed {} overlaps from {} alive reads",
        report.removed_from_deleted,
        report.deleted_reads,
        report.removed_from_alive,
        report.modified_reads
    )
}

impl CacheObserver for LogObserver {
    fn on_plan(&mut self, plan: &MemoryPlan) {
        match plan.limit {
            None => log::info!("using unlimited memory"),
            Some(limit) => log::info!("limited to {}MB memory", mb(limit)),
        }
        for (name, bytes) in plan.items() {
            log::info!("{:>7}MB for {name}", mb(bytes));
        }
        log::info!("{:>7}MB for data structures (sum of above)", mb(plan.total()));
        log::info!("{:>7}MB available for overlaps", mb(plan.residual));
        log::info!(
            "block size {} records ({}MB)",
            plan.block_capacity,
            mb(plan.block_bytes())
        );
    }

    fn on_cap_iteration(&mut self, it: &CapIteration) {
        log::info!(
            "cap={:>7} (below={} equal={} above={} total_load={}) -- {} + {} <? {}",
            it.cap,
            it.below,
            it.equal,
            it.above,
            it.total_load,
            it.used,
            it.load_bytes,
            it.limit
        );
    }

    fn on_cap_revert(&mut self, cap: u32) {
        log::info!("cap={cap:>7} (overestimated, revert to last good and stop)");
    }

    fn on_cap(&mut self, solution: &CapSolution, explicit: bool) {
        if explicit {
            log::info!("cap = {} overlaps/read (explicit)", solution.cap);
            return;
        }
        log::info!("cap       = {} overlaps/read", solution.cap);
        log::info!("below     = {} reads (all overlaps loaded)", solution.below);
        log::info!("equal     = {} reads (all overlaps loaded)", solution.equal);
        log::info!("above     = {} reads (some overlaps loaded)", solution.above);
        log::info!(
            "totalLoad = {} overlaps ({}MB)",
            solution.total_load,
            mb(solution.load_bytes())
        );
    }

    fn on_progress(&mut self, stats: &LoadStats, read: Option<u32>) {
        let store = stats.in_store;
        let message = format!(
            "overlaps processed {:>12} ({:06.2}%) loaded {:>12} ({:06.2}%) dropped dupe {:>12} ({:06.2}%)",
            stats.processed,
            percent(stats.processed, store),
            stats.loaded,
            percent(stats.loaded, store),
            stats.duplicates,
            percent(stats.duplicates, store),
        );
        match read {
            Some(read) => log::info!("loading: {message} (at read {read})"),
            None => log::info!("loaded: {message}"),
        }
    }

    fn on_soft_cap_overrun(&mut self, read: u32, kept: usize, total: usize, cap: u32) {
        log::warn!(
            "read {read} loaded {kept} overlaps (it has {total} in total); over the limit of {cap}"
        );
    }

    fn on_file(&mut self, action: FileAction, path: &Path) {
        match action {
            FileAction::SavingOverlaps => log::info!("saving overlaps to '{}'", path.display()),
            FileAction::SavingMetadata => log::info!("saving cache to '{}'", path.display()),
            FileAction::Loading => log::info!("loading cache from '{}'", path.display()),
        }
    }

    fn on_repair(&mut self, report: &RepairReport) {
        log::info!("{}", repair_summary(report));
    }
}
