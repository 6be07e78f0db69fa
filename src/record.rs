//! Packed overlap records
//!
//! Every overlap retained by the cache is stored as a fixed 16-byte [`OverlapRecord`]:
//!
//! | Bits / bytes   | Field      | Description                                   |
//! | -------------- | ---------- | --------------------------------------------- |
//! | word 0..12     | `evalue`   | Quantized error rate (see [`encode_evalue`])  |
//! | word 12..34    | `a_hang`   | Signed hang on the A read (22-bit two's compl) |
//! | word 34..56    | `b_hang`   | Signed hang on the B read (22-bit two's compl) |
//! | word 56        | `flipped`  | B is reverse-complemented relative to A       |
//! | word 57        | `filtered` | Scratch flag for downstream cleaning passes   |
//! | bytes 8..12    | `a_id`     | A read identifier (u32)                       |
//! | bytes 12..16   | `b_id`     | B read identifier (u32)                       |
//!
//! The packed word and the identifiers are stored in native byte order, which lets
//! snapshot data be mapped and used without decoding.

use bytemuck::{Pod, Zeroable};

/// Number of bits used for the quantized error rate
pub const EVALUE_BITS: u32 = 12;

/// Number of bits needed to describe the longest supported read
pub const READLEN_BITS: u32 = 21;

/// Number of bits per hang (read length bits plus a sign bit)
pub const HANG_BITS: u32 = READLEN_BITS + 1;

/// Largest encodable evalue
pub const MAX_EVALUE: u16 = (1 << EVALUE_BITS) - 1;

/// Largest error rate that can be encoded without saturating
pub const MAX_ERATE: f64 = MAX_EVALUE as f64 / 10000.0;

/// Largest hang that fits in the packed record
pub const MAX_HANG: i32 = (1 << READLEN_BITS) - 1;

/// Smallest hang that fits in the packed record
pub const MIN_HANG: i32 = -(1 << READLEN_BITS);

/// Size of a packed record in bytes
pub const RECORD_SIZE: usize = std::mem::size_of::<OverlapRecord>();

const _: () = assert!(
    EVALUE_BITS + 2 * HANG_BITS + 2 <= u64::BITS,
    "not enough bits to store overlaps; decrease EVALUE_BITS or READLEN_BITS"
);

const EVALUE_MASK: u64 = (1 << EVALUE_BITS) - 1;
const HANG_MASK: u64 = (1 << HANG_BITS) - 1;
const A_HANG_SHIFT: u32 = EVALUE_BITS;
const B_HANG_SHIFT: u32 = EVALUE_BITS + HANG_BITS;
const FLIPPED_SHIFT: u32 = EVALUE_BITS + 2 * HANG_BITS;
const FILTERED_SHIFT: u32 = FLIPPED_SHIFT + 1;

/// Converts an error rate (fraction of mismatches) into its quantized evalue
///
/// Rates at or above [`MAX_ERATE`] saturate to [`MAX_EVALUE`].
#[must_use]
pub fn encode_evalue(erate: f64) -> u16 {
    if erate < MAX_ERATE {
        (erate * 10000.0 + 0.5) as u16
    } else {
        MAX_EVALUE
    }
}

/// Converts a quantized evalue back into an error rate
#[must_use]
pub fn decode_evalue(evalue: u16) -> f64 {
    f64::from(evalue) / 10000.0
}

#[inline]
fn pack_hang(hang: i32) -> u64 {
    u64::from(hang as u32) & HANG_MASK
}

#[inline]
fn unpack_hang(field: u64) -> i32 {
    // sign-extend from HANG_BITS
    let shift = u64::BITS - HANG_BITS;
    (((field << shift) as i64) >> shift) as i32
}

/// A single overlap retained by the cache
///
/// Records are plain old data so blocks of them can be written to disk and
/// memory-mapped back in without any translation.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct OverlapRecord {
    /// Packed evalue, hangs and flags
    bits: u64,
    a_id: u32,
    b_id: u32,
}
impl OverlapRecord {
    /// Packs a new record
    ///
    /// Hangs must lie within [`MIN_HANG`]..=[`MAX_HANG`] and the evalue within
    /// [`MAX_EVALUE`]; out-of-range values are truncated to their field width.
    #[must_use]
    pub fn new(
        a_id: u32,
        b_id: u32,
        a_hang: i32,
        b_hang: i32,
        flipped: bool,
        evalue: u16,
    ) -> Self {
        let bits = (u64::from(evalue) & EVALUE_MASK)
            | (pack_hang(a_hang) << A_HANG_SHIFT)
            | (pack_hang(b_hang) << B_HANG_SHIFT)
            | (u64::from(flipped) << FLIPPED_SHIFT);
        Self { bits, a_id, b_id }
    }

    #[must_use]
    pub fn a_id(&self) -> u32 {
        self.a_id
    }

    #[must_use]
    pub fn b_id(&self) -> u32 {
        self.b_id
    }

    #[must_use]
    pub fn evalue(&self) -> u16 {
        (self.bits & EVALUE_MASK) as u16
    }

    /// The error rate this record's evalue stands for
    #[must_use]
    pub fn erate(&self) -> f64 {
        decode_evalue(self.evalue())
    }

    #[must_use]
    pub fn a_hang(&self) -> i32 {
        unpack_hang((self.bits >> A_HANG_SHIFT) & HANG_MASK)
    }

    #[must_use]
    pub fn b_hang(&self) -> i32 {
        unpack_hang((self.bits >> B_HANG_SHIFT) & HANG_MASK)
    }

    #[must_use]
    pub fn flipped(&self) -> bool {
        (self.bits >> FLIPPED_SHIFT) & 1 == 1
    }

    #[must_use]
    pub fn filtered(&self) -> bool {
        (self.bits >> FILTERED_SHIFT) & 1 == 1
    }

    pub fn set_filtered(&mut self, filtered: bool) {
        self.bits &= !(1 << FILTERED_SHIFT);
        self.bits |= u64::from(filtered) << FILTERED_SHIFT;
    }

    /// Both hangs point the same way: the reads overlap end to end
    #[must_use]
    pub fn is_dovetail(&self) -> bool {
        let (a, b) = (self.a_hang(), self.b_hang());
        (a < 0 && b < 0) || (a > 0 && b > 0)
    }

    /// ```text
    ///   -------->
    ///         -------
    /// ```
    #[must_use]
    pub fn a_end_is_5prime(&self) -> bool {
        self.a_hang() < 0 && self.b_hang() < 0
    }

    /// ```text
    ///      -------->
    ///   -------
    /// ```
    #[must_use]
    pub fn a_end_is_3prime(&self) -> bool {
        self.a_hang() > 0 && self.b_hang() > 0
    }

    /// A spans all of B
    #[must_use]
    pub fn a_is_container(&self) -> bool {
        self.a_hang() >= 0 && self.b_hang() <= 0
    }

    /// B spans all of A
    #[must_use]
    pub fn a_is_contained(&self) -> bool {
        self.a_hang() <= 0 && self.b_hang() >= 0
    }

    /// Which end of B takes part in a dovetail overlap
    ///
    /// Returns `None` for containments, where the question is undefined.
    #[must_use]
    pub fn b_end_is_3prime(&self) -> Option<bool> {
        if self.a_is_container() || self.a_is_contained() {
            return None;
        }
        Some(
            (self.a_end_is_5prime() && !self.flipped())
                || (self.a_end_is_3prime() && self.flipped()),
        )
    }

    /// Which end of B takes part in a dovetail overlap
    ///
    /// Returns `None` for containments, where the question is undefined.
    #[must_use]
    pub fn b_end_is_5prime(&self) -> Option<bool> {
        self.b_end_is_3prime().map(|is_3prime| !is_3prime)
    }
}

impl std::fmt::Debug for OverlapRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlapRecord")
            .field("a_id", &self.a_id)
            .field("b_id", &self.b_id)
            .field("a_hang", &self.a_hang())
            .field("b_hang", &self.b_hang())
            .field("flipped", &self.flipped())
            .field("evalue", &self.evalue())
            .field("filtered", &self.filtered())
            .finish()
    }
}
