//! # Scatter-Gather Tables
//!
//! On-demand scatter-gather table allocator for DMA-capable devices.
//!
//! Given a byte size, the allocator collects physically discontiguous 4 KiB
//! pages and builds a chain of index tables that enumerates them for a device,
//! much like a page table enumerates frames for the MMU.
//!
//! ## What you get
//! - [`layout`]: platform constants and the size/table arithmetic.
//! - [`Entry`]/[`RawEntry`]: the tagged 32-bit table slot and its codec.
//! - [`IndexTable`]/[`TableChain`]: typed views over the index-table run.
//! - [`reserve_entries`]/[`unreserve_entries`]: building and tearing down a chain.
//! - [`Registry`]: the lock-protected set of live tables.
//! - [`SgtAllocator`]: reserve / unreserve / unreserve-all with rollback.
//! - [`request`]: the opcode-keyed request surface consumed by an ioctl layer.
//!
//! ## Table chain
//!
//! ```text
//!   table 0 (first page of run)        table 1                    data pages
//!  ┌──────────────────────────┐      ┌──────────────────────────┐
//!  │ 0    NORMAL ─────────────┼──────┼──────────────────────────┼──► page
//!  │ 1    NORMAL ─────────────┼──────┼──────────────────────────┼──► page
//!  │ ...                      │      │ ...                      │
//!  │ 1023 LINK ───────────────┼─────►│ 0    NORMAL ─────────────┼──► page
//!  └──────────────────────────┘      │ n    LAST ───────────────┼──► page
//!                                    │ n+1  (zero)              │
//!                                    └──────────────────────────┘
//! ```
//!
//! In [circular](BufferMode::Circular) mode the slot after the last data page
//! holds a `LINK` back to table 0 instead, and the last data page carries
//! [`END_OF_BUFFER_MARKER`](layout::END_OF_BUFFER_MARKER) in its final word.
//!
//! ## Host interface
//!
//! The allocator does not own memory. Pages come from a [`PageAllocator`] and
//! are made accessible through a [`PhysMapper`], both provided by the
//! environment (see the `kernel-alloc` crate for implementations).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod addresses;
pub mod allocator;
pub mod builder;
pub mod entry;
mod error;
pub mod layout;
pub mod registry;
pub mod request;
pub mod table;
pub mod teardown;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
pub use crate::allocator::{RollbackScope, SgtAllocator, SgtConfig};
pub use crate::builder::{BuildSummary, reserve_entries};
pub use crate::entry::{Entry, EntryTag, RawEntry};
pub use crate::error::{InvalidRequest, SgtError};
pub use crate::registry::{AllocationRecord, Registry};
pub use crate::table::{IndexTable, SlotIndex, TableChain, TableIndex};
pub use crate::teardown::{TeardownSummary, unreserve_entries};

/// How the end of a buffer is expressed in its table chain.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum BufferMode {
    /// The final data page is tagged `LAST`.
    #[default]
    Linear,
    /// The slot after the final data page links back to the first table.
    Circular,
}

impl BufferMode {
    #[inline]
    #[must_use]
    pub const fn from_circular(circular: bool) -> Self {
        if circular {
            Self::Circular
        } else {
            Self::Linear
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_circular(self) -> bool {
        matches!(self, Self::Circular)
    }
}

/// Source of physical pages for index tables and data.
///
/// Implementations must hand out page-aligned frames and are called from
/// whichever thread issued the request; all calls may block but must not
/// suspend indefinitely.
///
/// Returns `None` on out-of-memory.
pub trait PageAllocator {
    /// Allocate one page for buffer data.
    fn alloc_page(&self) -> Option<PhysicalPage>;

    /// Return a page obtained from [`alloc_page`](Self::alloc_page).
    fn free_page(&self, page: PhysicalPage);

    /// Allocate `2^order` physically contiguous pages for an index run.
    fn alloc_pages(&self, order: u32) -> Option<PhysicalPage>;

    /// Return a run obtained from [`alloc_pages`](Self::alloc_pages) with the same `order`.
    fn free_pages(&self, run: PhysicalPage, order: u32);

    /// Make CPU writes to `count` pages starting at `run` visible to a
    /// non-cache-coherent device.
    ///
    /// The default does nothing, which is correct on cache-coherent platforms.
    fn flush_for_device(&self, run: PhysicalPage, count: u64) {
        let _ = (run, count);
    }

    /// Point-in-time number of free pages. Advisory only.
    fn free_page_count(&self) -> u64;
}

/// Translates between physical addresses and pointers the CPU can use.
///
/// Typical patterns:
/// - **Kernel**: a higher-half direct map adds a constant offset.
/// - **Host simulation**: physical addresses are offsets into a buffer.
pub trait PhysMapper {
    /// Virtual address under which the physical address `pa` is mapped.
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// Inverse of [`phys_to_virt`](Self::phys_to_virt).
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress;

    /// Convert a physical address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable and suitably aligned for `T`.
    /// - The bytes at `pa` must be a valid `T` and must not be aliased for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        // SAFETY: Forwarded to the caller.
        unsafe { &mut *self.phys_to_virt(pa).as_mut_ptr::<T>() }
    }
}

impl<A: PageAllocator + ?Sized> PageAllocator for &A {
    fn alloc_page(&self) -> Option<PhysicalPage> {
        (**self).alloc_page()
    }

    fn free_page(&self, page: PhysicalPage) {
        (**self).free_page(page);
    }

    fn alloc_pages(&self, order: u32) -> Option<PhysicalPage> {
        (**self).alloc_pages(order)
    }

    fn free_pages(&self, run: PhysicalPage, order: u32) {
        (**self).free_pages(run, order);
    }

    fn flush_for_device(&self, run: PhysicalPage, count: u64) {
        (**self).flush_for_device(run, count);
    }

    fn free_page_count(&self) -> u64 {
        (**self).free_page_count()
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        (**self).phys_to_virt(pa)
    }

    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        (**self).virt_to_phys(va)
    }

    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        // SAFETY: Forwarded to the caller.
        unsafe { (**self).phys_to_mut(pa) }
    }
}
