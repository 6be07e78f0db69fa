//! On-disk snapshots of a built cache
//!
//! A snapshot is two files sharing a path prefix:
//!
//! * `{prefix}.ovlCache` holds a fixed header followed by the number of overlaps of
//!   every read, all little-endian:
//!
//! | Bytes   | Name          | Description                                  |
//! | ------- | ------------- | -------------------------------------------- |
//! | 0..8    | `magic`       | Always `0x65686361436c766f`                  |
//! | 8..12   | `evalue_bits` | Width of the evalue field                    |
//! | 12..16  | `hang_bits`   | Width of each hang field                     |
//! | 16..24  | `mem_limit`   | Memory limit of the run that wrote it        |
//! | 24..32  | `mem_used`    | Memory accounted before overlaps were loaded |
//! | 32..36  | `cap`         | Per-read cap                                 |
//! | 36..40  | `legacy`      | Copy of the cap, ignored on read             |
//! | 40..    | `counts`      | `u32` per read id, `num_reads + 1` entries   |
//!
//! * `{prefix}.ovlCacheDat` holds the packed records of every read back to back, in
//!   read id order.
//!
//! On reload the data file is mapped privately. Reads deleted since the snapshot was
//! written are then repaired in the mapping without touching the file.

use std::{
    fs::File,
    io::{BufReader, BufWriter, ErrorKind, Read, Write},
    path::Path,
};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::{MmapMut, MmapOptions};

use crate::{
    error::{Error, Result, SnapshotError},
    index::OverlapIndex,
    store::ReadInfo,
    OverlapRecord, EVALUE_BITS, HANG_BITS, RECORD_SIZE,
};

/// Magic number identifying a metadata file ("ovlCache" in ASCII)
pub const MAGIC: u64 = 0x6568_6361_436c_766f;

/// Size of the fixed metadata header in bytes
pub const SIZE_HEADER: usize = 40;

/// The fixed part of a snapshot's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: u64,
    pub evalue_bits: u32,
    pub hang_bits: u32,
    pub mem_limit: u64,
    pub mem_used: u64,
    pub cap: u32,
    pub legacy: u32,
}
impl SnapshotHeader {
    /// Creates a header for the record layout of this build
    #[must_use]
    pub fn new(mem_limit: u64, mem_used: u64, cap: u32) -> Self {
        Self {
            magic: MAGIC,
            evalue_bits: EVALUE_BITS,
            hang_bits: HANG_BITS,
            mem_limit,
            mem_used,
            cap,
            legacy: cap,
        }
    }

    /// Parses and validates a header
    ///
    /// # Arguments
    ///
    /// * `buffer` - The header bytes
    /// * `path` - The metadata file, for error reporting
    pub fn from_bytes(buffer: &[u8; SIZE_HEADER], path: &Path) -> Result<Self> {
        let magic = LittleEndian::read_u64(&buffer[0..8]);
        if magic != MAGIC {
            return Err(SnapshotError::InvalidMagicNumber {
                path: path.to_path_buf(),
                magic,
            }
            .into());
        }
        let evalue_bits = LittleEndian::read_u32(&buffer[8..12]);
        let hang_bits = LittleEndian::read_u32(&buffer[12..16]);
        if evalue_bits != EVALUE_BITS || hang_bits != HANG_BITS {
            return Err(SnapshotError::IncompatibleBitWidths {
                evalue_bits,
                hang_bits,
            }
            .into());
        }
        Ok(Self {
            magic,
            evalue_bits,
            hang_bits,
            mem_limit: LittleEndian::read_u64(&buffer[16..24]),
            mem_used: LittleEndian::read_u64(&buffer[24..32]),
            cap: LittleEndian::read_u32(&buffer[32..36]),
            legacy: LittleEndian::read_u32(&buffer[36..40]),
        })
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buffer = [0u8; SIZE_HEADER];
        LittleEndian::write_u64(&mut buffer[0..8], self.magic);
        LittleEndian::write_u32(&mut buffer[8..12], self.evalue_bits);
        LittleEndian::write_u32(&mut buffer[12..16], self.hang_bits);
        LittleEndian::write_u64(&mut buffer[16..24], self.mem_limit);
        LittleEndian::write_u64(&mut buffer[24..32], self.mem_used);
        LittleEndian::write_u32(&mut buffer[32..36], self.cap);
        LittleEndian::write_u32(&mut buffer[36..40], self.legacy);
        writer.write_all(&buffer)?;
        Ok(())
    }
}

/// Header and per-read counts of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub header: SnapshotHeader,
    /// Overlaps per read id, `num_reads + 1` entries
    pub counts: Vec<u32>,
}
impl SnapshotMetadata {
    /// Total number of records the data file must hold
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&count| u64::from(count)).sum()
    }

    /// Writes the metadata file
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|source| Error::file(path, source))?;
        let mut writer = BufWriter::new(file);
        self.header.write_bytes(&mut writer)?;
        for &count in &self.counts {
            writer.write_u32::<LittleEndian>(count)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads the metadata file of a cache over `num_reads` reads
    ///
    /// Returns `None` if the file does not exist.
    pub fn read(path: &Path, num_reads: u32) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::file(path, source)),
        };
        let mut reader = BufReader::new(file);
        let short_read = |err: std::io::Error| -> Error {
            if err.kind() == ErrorKind::UnexpectedEof {
                SnapshotError::ShortRead(path.to_path_buf()).into()
            } else {
                err.into()
            }
        };

        let mut buffer = [0u8; SIZE_HEADER];
        reader.read_exact(&mut buffer).map_err(short_read)?;
        let header = SnapshotHeader::from_bytes(&buffer, path)?;

        let mut counts = vec![0u32; num_reads as usize + 1];
        reader
            .read_u32_into::<LittleEndian>(&mut counts)
            .map_err(short_read)?;
        Ok(Some(Self { header, counts }))
    }
}

/// Maps the data file privately so it can be repaired in memory
///
/// Returns `None` for an empty data file, which cannot be mapped.
///
/// # Arguments
///
/// * `path` - The data file
/// * `expected` - The number of records the metadata accounts for
pub fn map_data(path: &Path, expected: u64) -> Result<Option<MmapMut>> {
    let file = File::open(path).map_err(|source| Error::file(path, source))?;
    let bytes = file.metadata()?.len();
    if bytes % RECORD_SIZE as u64 != 0 || bytes / (RECORD_SIZE as u64) < expected {
        return Err(SnapshotError::DataTruncated { expected, bytes }.into());
    }
    if bytes == 0 {
        return Ok(None);
    }

    // Safety: the mapping is private so writes never reach the file, and the file is
    // not expected to be modified by other processes while mapped
    let mmap = unsafe { MmapOptions::new().map_copy(&file)? };
    Ok(Some(mmap))
}

/// Outcome of repairing a reloaded snapshot
///
/// # Fields
///
/// * `deleted_reads` - deleted reads whose overlaps were all dropped
/// * `removed_from_deleted` - overlaps dropped with the deleted reads
/// * `modified_reads` - living reads that lost overlaps to deleted reads
/// * `removed_from_alive` - overlaps dropped from the living reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub deleted_reads: u32,
    pub removed_from_deleted: u64,
    pub modified_reads: u32,
    pub removed_from_alive: u64,
}
impl RepairReport {
    /// Total overlaps dropped
    #[must_use]
    pub fn removed_overlaps(&self) -> u64 {
        self.removed_from_deleted + self.removed_from_alive
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.removed_overlaps() == 0
    }
}

fn log_removal<W: Write>(log: &mut W, removed: u32, kind: &[u8], read: u32) -> Result<()> {
    let mut buffer = itoa::Buffer::new();
    log.write_all(b"Removing ")?;
    log.write_all(buffer.format(removed).as_bytes())?;
    log.write_all(b" overlaps from ")?;
    log.write_all(kind)?;
    log.write_all(b" read ")?;
    log.write_all(buffer.format(read).as_bytes())?;
    log.write_all(b"\n")?;
    Ok(())
}

/// Drops overlaps that involve reads deleted since the snapshot was written
///
/// A deleted read loses all of its overlaps. A living read loses the overlaps whose
/// B-read was deleted: the survivors are shifted to the front of its run and the
/// vacated tail is zeroed. Every removal is written to `log`.
///
/// Running the repair a second time removes nothing.
pub fn repair<R: ReadInfo, W: Write>(
    records: &mut [OverlapRecord],
    index: &mut OverlapIndex,
    reads: &R,
    log: &mut W,
) -> Result<RepairReport> {
    let mut report = RepairReport::default();
    for id in 0..=index.num_reads() {
        let len = index.len(id);
        if len == 0 {
            continue;
        }

        if reads.read_length(id) == 0 {
            log_removal(log, len, b"deleted", id)?;
            index.set_len(id, 0);
            report.deleted_reads += 1;
            report.removed_from_deleted += u64::from(len);
            continue;
        }

        let start = index.location(id).offset;
        let run = &mut records[start..start + len as usize];
        let mut kept = 0;
        for i in 0..run.len() {
            if reads.read_length(run[i].b_id()) > 0 {
                run[kept] = run[i];
                kept += 1;
            }
        }
        let removed = run.len() - kept;
        if removed == 0 {
            continue;
        }
        run[kept..].fill(OverlapRecord::default());
        log_removal(log, removed as u32, b"living", id)?;
        index.set_len(id, kept as u32);
        report.modified_reads += 1;
        report.removed_from_alive += removed as u64;
    }
    log.flush()?;
    Ok(report)
}
