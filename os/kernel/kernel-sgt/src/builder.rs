//! # Table Builder
//!
//! Fills a zeroed index run with entries for freshly acquired data pages.
//!
//! Slots are written in order. Every non-final table ends with a `LINK` to
//! the next table of the run; the buffer ends with either a `LAST` data entry
//! or, in circular mode, a `LINK` back to table 0.

use crate::addresses::PhysicalPage;
use crate::entry::{Entry, EntryTag, RawEntry};
use crate::error::SgtError;
use crate::table::{DataPage, SlotIndex, TableChain, TableIndex};
use crate::{BufferMode, PageAllocator, PhysMapper};
use log::{debug, error, trace};

/// What [`reserve_entries`] wrote.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BuildSummary {
    /// Data pages acquired and entered into the chain.
    pub data_pages: u64,
    /// Index tables that received at least one entry.
    pub tables_used: u64,
    /// Data page carrying the end-of-buffer marker (circular mode only).
    pub end_of_buffer: Option<PhysicalPage>,
}

/// Acquire data pages and enter them into `chain`.
///
/// `slots` is the number of slots to fill: the data page count, plus one for
/// the wrap link in [`BufferMode::Circular`]. The chain must be zeroed and
/// large enough for `slots` (see [`TableGeometry`](crate::layout::TableGeometry)).
///
/// On failure the slot being written is left as the zero sentinel, so
/// [`unreserve_entries`](crate::unreserve_entries) releases exactly the pages
/// entered so far.
///
/// # Errors
/// - [`SgtError::OutOfMemory`] if a data page cannot be acquired.
/// - [`SgtError::Unaddressable`] if the allocator returns a page beyond the
///   entry address range. That page is released before returning.
pub fn reserve_entries<A, M>(
    chain: &mut TableChain<'_, M>,
    alloc: &A,
    slots: u64,
    mode: BufferMode,
) -> Result<BuildSummary, SgtError>
where
    A: PageAllocator + ?Sized,
    M: PhysMapper,
{
    debug_assert!(slots > 0);
    debug_assert!(!mode.is_circular() || slots > 1);

    let mut summary = BuildSummary {
        data_pages: 0,
        tables_used: 1,
        end_of_buffer: None,
    };
    let mut last_data: Option<PhysicalPage> = None;
    let mut table = TableIndex::FIRST;
    let mut slot = SlotIndex::FIRST;
    let mut remaining = slots;

    while remaining > 0 {
        write_slot(chain, table, slot, RawEntry::EMPTY)?;

        if remaining == 1 {
            match mode {
                BufferMode::Linear => {
                    let entry = acquire_entry(alloc, EntryTag::Last)?;
                    write_slot(chain, table, slot, entry)?;
                    summary.data_pages += 1;
                }
                BufferMode::Circular => {
                    let wrap = RawEntry::encode(Entry::Link(chain.first()))?;
                    write_slot(chain, table, slot, wrap)?;
                    if let Some(page) = last_data {
                        // SAFETY: The page was acquired by this build and is not yet shared.
                        let data: &mut DataPage = unsafe { chain.mapper().phys_to_mut(page.base()) };
                        data.stamp_end_of_buffer();
                        summary.end_of_buffer = Some(page);
                        trace!("End-of-buffer marker written to {page}");
                    }
                }
            }
            break;
        }

        if let Some(next_slot) = slot.next() {
            let entry = acquire_entry(alloc, EntryTag::Normal)?;
            write_slot(chain, table, slot, entry)?;
            last_data = entry.decode().map(Entry::page);
            summary.data_pages += 1;
            remaining -= 1;
            slot = next_slot;
        } else {
            let next = table.next();
            let link = RawEntry::encode(Entry::Link(chain.page_of(next)))?;
            write_slot(chain, table, slot, link)?;
            trace!("Table {} linked to table {}", table.as_u64(), next.as_u64());
            table = next;
            slot = SlotIndex::FIRST;
            summary.tables_used += 1;
        }
    }

    debug!(
        "Built chain at {}: {} data pages in {} tables",
        chain.first(),
        summary.data_pages,
        summary.tables_used
    );
    Ok(summary)
}

fn write_slot<M: PhysMapper>(
    chain: &mut TableChain<'_, M>,
    table: TableIndex,
    slot: SlotIndex,
    entry: RawEntry,
) -> Result<(), SgtError> {
    let first = chain.first();
    let Some(target) = chain.table_mut(table) else {
        error!(
            "Chain at {first} has no table {} ({} pages in run)",
            table.as_u64(),
            chain.len()
        );
        return Err(SgtError::OutOfMemory);
    };
    target.set(slot, entry);
    Ok(())
}

/// Acquire one data page and encode it with `tag`.
fn acquire_entry<A: PageAllocator + ?Sized>(alloc: &A, tag: EntryTag) -> Result<RawEntry, SgtError> {
    let page = alloc.alloc_page().ok_or(SgtError::OutOfMemory)?;
    RawEntry::encode(Entry::new(page, tag)).inspect_err(|_| alloc.free_page(page))
}
