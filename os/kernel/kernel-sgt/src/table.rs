//! # Index Tables
//!
//! Typed views over the index-table run of one scatter-gather allocation.
//!
//! The run is `2^order` physically contiguous pages. Table `i` lives at
//! `first + i * PAGE_SIZE`, so a [`TableChain`] can address any table by its
//! [`TableIndex`] and can tell whether a `LINK` entry points back into the run.
//!
//! Access to the memory goes through the [`PhysMapper`]; the chain itself
//! never holds pointers.

use crate::addresses::PhysicalPage;
use crate::entry::{Entry, RawEntry};
use crate::layout::{END_OF_BUFFER_MARKER, ENTRIES_PER_TABLE, PAGE_SIZE};
use crate::PhysMapper;

const SLOTS: usize = 1024;
const WORDS: usize = 1024;

const _: () = {
    assert!(SLOTS as u64 == ENTRIES_PER_TABLE);
    assert!((WORDS * size_of::<u32>()) as u64 == PAGE_SIZE);
    assert!(size_of::<IndexTable>() as u64 == PAGE_SIZE);
    assert!(align_of::<IndexTable>() as u64 == PAGE_SIZE);
    assert!(size_of::<DataPage>() as u64 == PAGE_SIZE);
};

/// Position of an index table within its run (0 = first table).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u64);

/// Position of a slot within one index table (`0..1024`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SlotIndex(u16);

impl TableIndex {
    /// The table at the start of the run; its address identifies the allocation.
    pub const FIRST: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl SlotIndex {
    pub const FIRST: Self = Self(0);

    /// The final slot of a table, which holds the `LINK` in non-final tables.
    #[allow(clippy::cast_possible_truncation)]
    pub const LAST: Self = Self((SLOTS - 1) as u16);

    #[inline]
    #[must_use]
    pub const fn new(index: u16) -> Self {
        debug_assert!((index as usize) < SLOTS);
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn is_last(self) -> bool {
        self.0 == Self::LAST.0
    }

    /// The following slot in the same table, if any.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        if self.is_last() {
            None
        } else {
            Some(Self(self.0 + 1))
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// All slots of a table in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..=Self::LAST.0).map(Self)
    }
}

/// One page-sized index table.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct IndexTable {
    slots: [RawEntry; SLOTS],
}

impl IndexTable {
    /// Create a fully unwritten table.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            slots: [RawEntry::EMPTY; SLOTS],
        }
    }

    /// Reset every slot to the unwritten sentinel.
    #[inline]
    pub fn zero(&mut self) {
        self.slots.fill(RawEntry::EMPTY);
    }

    /// Decoded slot; `None` if it has not been written.
    #[inline]
    #[must_use]
    pub const fn get(&self, slot: SlotIndex) -> Option<Entry> {
        self.slots[slot.as_usize()].decode()
    }

    #[inline]
    #[must_use]
    pub const fn raw(&self, slot: SlotIndex) -> RawEntry {
        self.slots[slot.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, slot: SlotIndex, entry: RawEntry) {
        self.slots[slot.as_usize()] = entry;
    }

    #[inline]
    pub const fn clear(&mut self, slot: SlotIndex) {
        self.set(slot, RawEntry::EMPTY);
    }

    /// Iterate `(slot, entry)` pairs up to, not including, the first unwritten slot.
    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, Entry)> + '_ {
        SlotIndex::all().map_while(|slot| self.get(slot).map(|entry| (slot, entry)))
    }
}

impl Default for IndexTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// A data page viewed as 32-bit words.
#[repr(C, align(4096))]
pub struct DataPage {
    words: [u32; WORDS],
}

impl DataPage {
    /// Write [`END_OF_BUFFER_MARKER`] into the final word of the page.
    #[inline]
    pub const fn stamp_end_of_buffer(&mut self) {
        self.words[WORDS - 1] = END_OF_BUFFER_MARKER;
    }

    #[inline]
    #[must_use]
    pub const fn last_word(&self) -> u32 {
        self.words[WORDS - 1]
    }
}

/// View over the contiguous index run of one allocation.
pub struct TableChain<'m, M: PhysMapper> {
    mapper: &'m M,
    first: PhysicalPage,
    run_pages: u64,
}

impl<'m, M: PhysMapper> TableChain<'m, M> {
    /// Create a view over `run_pages` pages starting at `first`.
    ///
    /// # Safety
    /// - The run must be mapped writable through `mapper` for the lifetime of the view.
    /// - Nothing else may access the run while the view exists.
    #[must_use]
    pub const unsafe fn new(mapper: &'m M, first: PhysicalPage, run_pages: u64) -> Self {
        debug_assert!(run_pages > 0);
        Self {
            mapper,
            first,
            run_pages,
        }
    }

    /// Address of table 0, the identity of the allocation.
    #[inline]
    #[must_use]
    pub const fn first(&self) -> PhysicalPage {
        self.first
    }

    /// Number of pages in the run, including spare pages past the last table.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.run_pages
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.run_pages == 0
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, index: TableIndex) -> bool {
        index.0 < self.run_pages
    }

    /// Physical page of table `index`. Does not check the bound.
    #[inline]
    #[must_use]
    pub const fn page_of(&self, index: TableIndex) -> PhysicalPage {
        self.first.offset_pages(index.0)
    }

    /// Index of the table at `page`, if the page lies inside the run.
    #[must_use]
    pub fn index_of(&self, page: PhysicalPage) -> Option<TableIndex> {
        page.pages_since(self.first)
            .map(TableIndex)
            .filter(|&index| self.contains(index))
    }

    #[must_use]
    pub fn table(&self, index: TableIndex) -> Option<&IndexTable> {
        if !self.contains(index) {
            return None;
        }
        // SAFETY: The page lies in the run, which `new` requires to be mapped and unaliased.
        let table: &IndexTable = unsafe { self.mapper.phys_to_mut(self.page_of(index).base()) };
        Some(table)
    }

    #[must_use]
    pub fn table_mut(&mut self, index: TableIndex) -> Option<&mut IndexTable> {
        if !self.contains(index) {
            return None;
        }
        // SAFETY: As in `table`; `&mut self` rules out a second live view.
        Some(unsafe { self.mapper.phys_to_mut(self.page_of(index).base()) })
    }

    /// Reset every page of the run, spare pages included.
    pub fn zero(&mut self) {
        for index in (0..self.run_pages).map(TableIndex) {
            if let Some(table) = self.table_mut(index) {
                table.zero();
            }
        }
    }

    pub(crate) const fn mapper(&self) -> &'m M {
        self.mapper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::PhysicalAddress;
    use crate::test_support::TestRam;
    use crate::PageAllocator;

    fn page(addr: u64) -> PhysicalPage {
        PhysicalPage::from_aligned(PhysicalAddress::new(addr)).unwrap()
    }

    #[test]
    fn slot_iteration_covers_the_whole_table() {
        assert_eq!(SlotIndex::all().count(), SLOTS);
        assert_eq!(SlotIndex::all().last(), Some(SlotIndex::LAST));
        assert!(SlotIndex::LAST.is_last());
        assert_eq!(SlotIndex::LAST.next(), None);
        assert_eq!(SlotIndex::FIRST.next(), Some(SlotIndex::new(1)));
    }

    #[test]
    fn table_iteration_stops_at_first_unwritten_slot() {
        let mut table = IndexTable::zeroed();
        let normal = RawEntry::encode(Entry::Normal(page(0x5000))).unwrap();
        let last = RawEntry::encode(Entry::Last(page(0x9000))).unwrap();
        table.set(SlotIndex::new(0), normal);
        table.set(SlotIndex::new(1), last);
        table.set(SlotIndex::new(3), normal);

        let entries: Vec<_> = table.iter().map(|(_, e)| e).collect();
        assert_eq!(
            entries,
            vec![Entry::Normal(page(0x5000)), Entry::Last(page(0x9000))]
        );

        table.clear(SlotIndex::new(0));
        assert_eq!(table.iter().count(), 0);
        assert!(table.raw(SlotIndex::new(0)).is_empty());
    }

    #[test]
    fn end_of_buffer_marker_lands_in_the_last_word() {
        let mut data = DataPage { words: [0; WORDS] };
        data.stamp_end_of_buffer();
        assert_eq!(data.last_word(), END_OF_BUFFER_MARKER);
        assert!(data.words[..WORDS - 1].iter().all(|&w| w == 0));
    }

    #[test]
    fn chain_addresses_tables_inside_the_run() {
        let ram = TestRam::new(16);
        let run = ram.alloc_pages(2).unwrap();
        let mut chain = unsafe { TableChain::new(&ram, run, 4) };
        chain.zero();

        assert_eq!(chain.first(), run);
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.page_of(TableIndex::new(3)), run.offset_pages(3));
        assert_eq!(chain.index_of(run.offset_pages(2)), Some(TableIndex::new(2)));
        assert_eq!(chain.index_of(run.offset_pages(4)), None);
        assert!(chain.table(TableIndex::new(4)).is_none());

        let entry = RawEntry::encode(Entry::Link(run.offset_pages(1))).unwrap();
        chain
            .table_mut(TableIndex::FIRST)
            .unwrap()
            .set(SlotIndex::LAST, entry);
        assert_eq!(
            chain.table(TableIndex::FIRST).unwrap().get(SlotIndex::LAST),
            Some(Entry::Link(run.offset_pages(1)))
        );
        assert_eq!(ram.read_u32(run.base() + 4092), entry.into_bits());

        ram.free_pages(run, 2);
    }
}
