//! # Table Layout and Size Arithmetic
//!
//! Fixed platform constants for scatter-gather tables and the arithmetic that
//! turns a requested byte size into page, table and run-order counts.
//!
//! ```text
//!  index run (2^order contiguous pages)
//! ┌───────────────┬───────────────┬───────────────┬─────────┐
//! │ table 0       │ table 1       │ table 2       │ (spare) │
//! │ 1023 × data   │ 1023 × data   │ ≤ 1024 × data │         │
//! │ slot 1023:LINK├►slot 1023:LINK├►slot n: LAST  │         │
//! └───────────────┴───────────────┴───────────────┴─────────┘
//! ```
//!
//! Every non-final table gives up its last slot to the `LINK` entry, so its
//! data capacity is [`ENTRIES_PER_TABLE`]` - 1`. The final table may use all
//! [`ENTRIES_PER_TABLE`] slots.

use crate::BufferMode;

/// Size of one page (data page or index table), in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`; number of low address bits that are always zero for a page base.
pub const PAGE_SHIFT: u32 = 12;

/// Width of one table entry, in bytes.
pub const ENTRY_SIZE: u64 = size_of::<u32>() as u64;

/// Number of slots in one index table.
pub const ENTRIES_PER_TABLE: u64 = PAGE_SIZE / ENTRY_SIZE;

/// Number of low entry bits reserved for the tag field (tag plus reserved bits).
pub const TAG_FIELD_BITS: u32 = 4;

/// Mask selecting the tag from a raw entry.
pub const TAG_MASK: u32 = 0b11;

/// Number of physical address bits an entry can represent.
pub const PHYS_ADDR_BITS: u32 = u32::BITS - TAG_FIELD_BITS + PAGE_SHIFT;

/// First physical address that can no longer be stored in an entry.
pub const PHYS_ADDR_LIMIT: u64 = 1 << PHYS_ADDR_BITS;

/// Value stamped into the last 32-bit word of the final data page of a
/// circular buffer so the device can find the logical end of the ring.
pub const END_OF_BUFFER_MARKER: u32 = 0xE0B0_E0B0;

const _: () = {
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(ENTRIES_PER_TABLE == 1024);
    assert!(TAG_MASK < (1 << TAG_FIELD_BITS));
    assert!(PHYS_ADDR_BITS == 40);
};

/// Number of data pages needed to hold `size` bytes.
///
/// `size` must be non-zero; callers reject empty requests before any
/// arithmetic takes place.
///
/// ```rust
/// # use kernel_sgt::layout::pages_needed;
/// assert_eq!(pages_needed(1), 1);
/// assert_eq!(pages_needed(4096), 1);
/// assert_eq!(pages_needed(4097), 2);
/// assert_eq!(pages_needed(50 * 1024), 13);
/// ```
#[inline]
#[must_use]
pub const fn pages_needed(size: u64) -> u64 {
    debug_assert!(size > 0, "empty reservation");
    size.div_ceil(PAGE_SIZE)
}

/// Number of index tables needed to hold `slots` entries.
///
/// ```rust
/// # use kernel_sgt::layout::tables_needed;
/// assert_eq!(tables_needed(1), 1);
/// assert_eq!(tables_needed(1024), 1);
/// assert_eq!(tables_needed(1025), 2);
/// assert_eq!(tables_needed(102_400), 101);
/// ```
#[inline]
#[must_use]
pub const fn tables_needed(slots: u64) -> u64 {
    if slots <= ENTRIES_PER_TABLE {
        return 1;
    }
    1 + (slots - ENTRIES_PER_TABLE).div_ceil(ENTRIES_PER_TABLE - 1)
}

/// Smallest `order` such that `2^order >= tables`.
///
/// The index run is allocated as `2^order` contiguous pages.
#[inline]
#[must_use]
pub const fn run_order(tables: u64) -> u32 {
    debug_assert!(tables > 0);
    tables.next_power_of_two().trailing_zeros()
}

/// Page, table and run-order counts for one reservation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TableGeometry {
    /// Data pages backing the buffer.
    pub data_pages: u64,
    /// Slots the builder fills: data pages, plus the wrap link in circular mode.
    pub slots: u64,
    /// Index tables the slots span.
    pub tables: u64,
    /// Order of the contiguous index run.
    pub order: u32,
}

impl TableGeometry {
    /// Compute the geometry of a `size`-byte buffer in the given mode.
    #[must_use]
    pub const fn new(size: u64, mode: BufferMode) -> Self {
        let data_pages = pages_needed(size);
        let slots = match mode {
            BufferMode::Linear => data_pages,
            BufferMode::Circular => data_pages + 1,
        };
        let tables = tables_needed(slots);
        Self {
            data_pages,
            slots,
            tables,
            order: run_order(tables),
        }
    }

    /// Number of pages in the index run (`2^order`).
    #[inline]
    #[must_use]
    pub const fn run_pages(&self) -> u64 {
        1 << self.order
    }
}
