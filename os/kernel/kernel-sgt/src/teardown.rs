//! # Table Teardown
//!
//! Walks a chain built by [`reserve_entries`](crate::reserve_entries) and
//! releases every data page it references. The index run itself is left to
//! the caller.

use crate::entry::Entry;
use crate::table::{SlotIndex, TableChain, TableIndex};
use crate::{PageAllocator, PhysMapper};
use log::{debug, trace, warn};

/// What [`unreserve_entries`] released.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct TeardownSummary {
    pub pages_freed: u64,
    pub tables_visited: u64,
}

/// Release up to `data_pages` data pages referenced by `chain`.
///
/// The walk stops at the first unwritten slot, at a `LINK` back to the first
/// table (end of a circular buffer), after `data_pages` releases, or at a
/// `LINK` that does not lead forward within the run. It therefore also
/// handles chains whose build was interrupted.
pub fn unreserve_entries<A, M>(chain: &TableChain<'_, M>, alloc: &A, data_pages: u64) -> TeardownSummary
where
    A: PageAllocator + ?Sized,
    M: PhysMapper,
{
    let mut summary = TeardownSummary::default();
    let mut remaining = data_pages;
    let mut current = Some(TableIndex::FIRST);

    'tables: while let Some(index) = current.take() {
        let Some(table) = chain.table(index) else {
            warn!("Chain at {} has no table {}", chain.first(), index.as_u64());
            break;
        };
        summary.tables_visited += 1;

        for slot in SlotIndex::all() {
            if remaining == 0 {
                break 'tables;
            }
            match table.get(slot) {
                None => {
                    trace!("Unwritten slot {} in table {}", slot.as_usize(), index.as_u64());
                    break 'tables;
                }
                Some(Entry::Link(target)) if target == chain.first() => {
                    trace!("Wrap link in table {}", index.as_u64());
                    break 'tables;
                }
                Some(Entry::Link(target)) => match chain.index_of(target) {
                    Some(next) if next > index => {
                        current = Some(next);
                        continue 'tables;
                    }
                    _ => {
                        warn!(
                            "Table {} of chain at {} links outside the run to {target}",
                            index.as_u64(),
                            chain.first()
                        );
                        break 'tables;
                    }
                },
                Some(entry) => {
                    alloc.free_page(entry.page());
                    summary.pages_freed += 1;
                    remaining -= 1;
                }
            }
        }
    }

    if remaining > 0 {
        debug!(
            "Chain at {}: {} of {data_pages} data pages were never entered",
            chain.first(),
            remaining
        );
    }
    debug!(
        "Released {} data pages from {} tables of chain at {}",
        summary.pages_freed,
        summary.tables_visited,
        chain.first()
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::RawEntry;
    use crate::test_support::TestRam;

    fn raw(entry: Entry) -> RawEntry {
        RawEntry::encode(entry).unwrap()
    }

    #[test]
    fn empty_chain_frees_nothing() {
        let ram = TestRam::new(4);
        let run = ram.alloc_pages(0).unwrap();
        let mut chain = unsafe { TableChain::new(&ram, run, 1) };
        chain.zero();

        let summary = unreserve_entries(&chain, &ram, 5);
        assert_eq!(summary, TeardownSummary { pages_freed: 0, tables_visited: 1 });
        ram.free_pages(run, 0);
    }

    #[test]
    fn links_pointing_backwards_stop_the_walk() {
        let ram = TestRam::new(8);
        let run = ram.alloc_pages(1).unwrap();
        let mut chain = unsafe { TableChain::new(&ram, run, 2) };
        chain.zero();

        let data = ram.alloc_page().unwrap();
        let second = chain.page_of(TableIndex::new(1));
        let table = chain.table_mut(TableIndex::FIRST).unwrap();
        table.set(SlotIndex::new(0), raw(Entry::Normal(data)));
        table.set(SlotIndex::new(1), raw(Entry::Link(second)));
        let table = chain.table_mut(TableIndex::new(1)).unwrap();
        // A table linking to itself must not loop forever.
        table.set(SlotIndex::new(0), raw(Entry::Link(second)));

        let summary = unreserve_entries(&chain, &ram, 10);
        assert_eq!(summary, TeardownSummary { pages_freed: 1, tables_visited: 2 });
        assert!(!ram.is_allocated(data));
        ram.free_pages(run, 1);
        assert_eq!(ram.outstanding(), 0);
    }

    #[test]
    fn links_outside_the_run_stop_the_walk() {
        let ram = TestRam::new(8);
        let run = ram.alloc_pages(0).unwrap();
        let mut chain = unsafe { TableChain::new(&ram, run, 1) };
        chain.zero();
        let stray = run.offset_pages(4);
        chain
            .table_mut(TableIndex::FIRST)
            .unwrap()
            .set(SlotIndex::FIRST, raw(Entry::Link(stray)));

        let summary = unreserve_entries(&chain, &ram, 1);
        assert_eq!(summary.pages_freed, 0);
        assert_eq!(ram.double_frees(), 0);
        ram.free_pages(run, 0);
    }

    #[test]
    fn release_count_is_bounded_by_data_pages() {
        let ram = TestRam::new(8);
        let run = ram.alloc_pages(0).unwrap();
        let mut chain = unsafe { TableChain::new(&ram, run, 1) };
        chain.zero();
        let pages: Vec<_> = (0..3).map(|_| ram.alloc_page().unwrap()).collect();
        let table = chain.table_mut(TableIndex::FIRST).unwrap();
        for (slot, &page) in pages.iter().enumerate() {
            table.set(SlotIndex::new(u16::try_from(slot).unwrap()), raw(Entry::Normal(page)));
        }

        let summary = unreserve_entries(&chain, &ram, 2);
        assert_eq!(summary.pages_freed, 2);
        assert!(ram.is_allocated(pages[2]));
        ram.free_page(pages[2]);
        ram.free_pages(run, 0);
        assert_eq!(ram.outstanding(), 0);
    }
}
