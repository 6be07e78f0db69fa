//! Collaborators the cache consumes
//!
//! The cache does not read overlap stores or read metadata itself. It is handed an
//! [`OverlapSource`] that yields overlaps grouped by A-read and a [`ReadInfo`] that
//! knows the length of every read. In-memory implementations of both are provided
//! for embedders that already hold their data in memory.

mod memory;
mod traits;

pub use memory::{MemoryOverlapStore, ReadTable};
pub use traits::{OverlapSource, RawOverlap, ReadCounts, ReadInfo};
