use std::path::PathBuf;

/// Custom Result type for overlap cache operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the overlap cache, encompassing all possible error cases
/// that can occur while planning, loading, saving, or reloading the cache.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The memory budget cannot accommodate the cache
    #[error(transparent)]
    BudgetError(#[from] BudgetError),

    /// Errors raised while streaming overlaps out of the source store
    #[error(transparent)]
    LoadError(#[from] LoadError),

    /// Errors raised while validating or reading a snapshot
    #[error(transparent)]
    SnapshotError(#[from] SnapshotError),

    /// A file could not be opened or created
    ///
    /// # Fields
    /// * `path` - The file that failed
    /// * `source` - The underlying OS error
    #[error("Failed to open '{}': {source}", .path.display())]
    FileError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Standard I/O errors from the Rust standard library
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Errors surfaced by collaborator implementations (overlap stores, read providers)
    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
}
impl Error {
    /// Wraps an I/O error with the path of the file it concerns
    pub fn file<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised when the configured memory cannot hold a useful cache
#[derive(thiserror::Error, Debug)]
pub enum BudgetError {
    /// The accounted data structures alone exceed the memory limit
    ///
    /// # Fields
    /// * `required` - Bytes needed by structures other than overlaps
    /// * `limit` - The configured memory limit in bytes
    #[error("Out of memory before loading overlaps: {required} bytes required for data structures but the limit is {limit} bytes")]
    InsufficientMemory { required: u64, limit: u64 },

    /// The solved per-read cap is below the usable floor
    ///
    /// # Arguments
    /// * `u32` - The cap that was computed
    /// * `u32` - The minimum cap considered useful
    #[error("Not enough memory to load overlaps: {0} overlaps per read is below the minimum of {1}")]
    CapTooSmall(u32, u32),

    /// A read may keep more overlaps than a single arena block can hold
    ///
    /// # Fields
    /// * `records` - The number of records that must fit in one block
    /// * `capacity` - The block capacity in records
    #[error("A group of {records} overlaps cannot fit in an arena block of {capacity} records")]
    GroupExceedsBlock { records: usize, capacity: usize },

    /// Physical memory could not be determined
    #[error("Unable to determine the amount of physical memory")]
    UnknownPhysicalMemory,
}

/// Errors raised while consuming the overlap source
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    /// Groups must arrive in strictly increasing A-read order
    ///
    /// # Fields
    /// * `previous` - The A-read of the last group
    /// * `current` - The A-read of the offending group
    #[error("Overlap groups out of order: read {current} arrived after read {previous}")]
    UnorderedGroup { previous: u32, current: u32 },

    /// A group contained overlaps for more than one A-read
    ///
    /// # Arguments
    /// * `u32` - The A-read of the group's first overlap
    /// * `u32` - The mismatched A-read
    #[error("Overlap group for read {0} contains an overlap for read {1}")]
    MixedGroup(u32, u32),

    /// Attempted to index a read that is beyond the available range
    ///
    /// # Arguments
    /// * `u32` - The requested read id
    /// * `u32` - The maximum read id
    #[error("Read id ({0}) is out of range ({1})")]
    OutOfRange(u32, u32),

    /// A hang does not fit in the packed record
    ///
    /// # Arguments
    /// * `i32` - The offending hang
    #[error("Overlap hang {0} does not fit in the packed record")]
    HangOutOfRange(i32),

    /// The per-read counts reported by the source do not cover the reads
    #[error("Source reported overlap counts for reads {first}..{end} but only {num_reads} reads exist")]
    InvalidCounts { first: u32, end: u64, num_reads: u32 },
}

/// Errors specific to validating and reading cache snapshots
#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    /// The magic number in the metadata file does not match the expected value
    ///
    /// # Fields
    /// * `path` - The metadata file
    /// * `magic` - The invalid magic number that was found
    #[error("File '{}' isn't an overlap cache (magic number {magic:#x})", .path.display())]
    InvalidMagicNumber { path: PathBuf, magic: u64 },

    /// The snapshot was written with different record field widths
    ///
    /// # Fields
    /// * `evalue_bits` - The evalue width stored in the snapshot
    /// * `hang_bits` - The hang width stored in the snapshot
    #[error("Snapshot was written with {evalue_bits} evalue bits and {hang_bits} hang bits, incompatible with this build")]
    IncompatibleBitWidths { evalue_bits: u32, hang_bits: u32 },

    /// The metadata file ended before all fields were read
    ///
    /// # Arguments
    /// * `PathBuf` - The metadata file
    #[error("Short read loading overlap cache '{}'", .0.display())]
    ShortRead(PathBuf),

    /// The data file holds fewer records than the metadata accounts for
    ///
    /// # Fields
    /// * `expected` - The number of records required by the per-read counts
    /// * `bytes` - The size of the data file in bytes
    #[error("Overlap data holds {bytes} bytes but {expected} records are required")]
    DataTruncated { expected: u64, bytes: u64 },

    /// A snapshot was requested without a path prefix
    #[error("Saving or loading a snapshot requires a path prefix")]
    MissingPrefix,
}
