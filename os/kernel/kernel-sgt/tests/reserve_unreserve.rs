use kernel_alloc::{BitmapFrameAlloc, SimulatedRam};
use kernel_sgt::layout::{END_OF_BUFFER_MARKER, ENTRIES_PER_TABLE, PAGE_SIZE};
use kernel_sgt::{BufferMode, Entry, PhysicalAddress, PhysicalPage, RawEntry, SgtAllocator, SgtError};
use std::collections::BTreeSet;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

fn setup(pages: u64) -> (SimulatedRam, BitmapFrameAlloc) {
    let ram = SimulatedRam::new(SimulatedRam::DEFAULT_BASE, pages).unwrap();
    let pool = BitmapFrameAlloc::for_ram(&ram);
    (ram, pool)
}

/// Read the chain at `first` the way a device would: slot by slot, following links.
fn walk(ram: &SimulatedRam, first: PhysicalAddress) -> (Vec<Entry>, usize) {
    let mut entries = Vec::new();
    let mut tables = 1;
    let mut table = first;
    let mut slot = 0;
    loop {
        let raw = ram.read_u32(table + slot * 4).expect("slot inside RAM");
        let Some(entry) = RawEntry::from_bits(raw).decode() else {
            break;
        };
        entries.push(entry);
        match entry {
            Entry::Last(_) => break,
            Entry::Link(next) if next.base() == first => break,
            Entry::Link(next) => {
                table = next.base();
                slot = 0;
                tables += 1;
            }
            Entry::Normal(_) => slot += 1,
        }
        assert!(slot < ENTRIES_PER_TABLE);
    }
    (entries, tables)
}

#[test]
fn walkthrough_of_the_four_operations() {
    let (ram, pool) = setup(4096);
    let sgt = SgtAllocator::new(&pool, &ram);
    assert_eq!(sgt.get_capacity(), 16 * MIB);

    let small = sgt.reserve(50 * KIB, BufferMode::Linear).unwrap();
    let large = sgt.reserve(8 * MIB, BufferMode::Linear).unwrap();
    assert_ne!(small, large);
    assert_eq!(sgt.live_allocations(), 2);

    sgt.unreserve(large).unwrap();
    assert_eq!(sgt.live_allocations(), 1);
    assert!(sgt.find(small).is_some());

    assert_eq!(sgt.unreserve_all(), 1);
    assert_eq!(pool.available_pages(), 4096);
    assert_eq!(pool.double_frees(), 0);
}

#[test]
fn device_view_of_a_small_linear_table() {
    let (ram, pool) = setup(64);
    let sgt = SgtAllocator::new(&pool, &ram);
    let first = sgt.reserve(50 * KIB, BufferMode::Linear).unwrap();

    let (entries, tables) = walk(&ram, first);
    assert_eq!(tables, 1);
    assert_eq!(entries.len(), 13);
    assert!(entries[..12].iter().all(|e| matches!(e, Entry::Normal(_))));
    assert!(matches!(entries[12], Entry::Last(_)));

    let distinct: BTreeSet<_> = entries.iter().map(|e| e.page()).collect();
    assert_eq!(distinct.len(), 13);
    assert!(!distinct.contains(&PhysicalPage::containing(first)));
    assert!(distinct.iter().all(|&page| pool.is_allocated(page)));
}

#[test]
fn multi_table_chain_is_linked_in_run_order() {
    let (ram, pool) = setup(4096);
    let sgt = SgtAllocator::new(&pool, &ram);
    let pages = 3 * ENTRIES_PER_TABLE;
    let first = sgt.reserve(pages * PAGE_SIZE, BufferMode::Linear).unwrap();

    let (entries, tables) = walk(&ram, first);
    assert_eq!(tables, 4);
    let links: Vec<_> = entries
        .iter()
        .filter_map(|e| match e {
            Entry::Link(page) => Some(*page),
            _ => None,
        })
        .collect();
    let base = PhysicalPage::containing(first);
    assert_eq!(links, vec![base.offset_pages(1), base.offset_pages(2), base.offset_pages(3)]);
    assert_eq!(entries.iter().filter(|e| e.is_data()).count() as u64, pages);

    sgt.unreserve(first).unwrap();
    assert_eq!(pool.available_pages(), 4096);
}

#[test]
fn circular_table_wraps_and_marks_its_end() {
    let (ram, pool) = setup(64);
    let sgt = SgtAllocator::new(&pool, &ram);
    let first = sgt.reserve(5 * PAGE_SIZE, BufferMode::Circular).unwrap();

    let (entries, _) = walk(&ram, first);
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[5], Entry::Link(PhysicalPage::containing(first)));

    let marked: Vec<_> = entries[..5]
        .iter()
        .filter(|e| ram.read_u32(e.page().base() + (PAGE_SIZE - 4)) == Some(END_OF_BUFFER_MARKER))
        .collect();
    assert_eq!(marked, vec![&entries[4]]);

    sgt.unreserve(first).unwrap();
    assert_eq!(pool.available_pages(), 64);
}

#[test]
fn removing_the_middle_of_three_buffers() {
    let (ram, pool) = setup(256);
    let sgt = SgtAllocator::new(&pool, &ram);
    let a = sgt.reserve(10 * KIB, BufferMode::Linear).unwrap();
    let b = sgt.reserve(20 * KIB, BufferMode::Linear).unwrap();
    let c = sgt.reserve(30 * KIB, BufferMode::Linear).unwrap();

    sgt.unreserve(b).unwrap();
    assert_eq!(sgt.unreserve(b), Err(SgtError::NotFound(b)));

    let left: Vec<_> = sgt.records().into_iter().map(|r| r.address).collect();
    assert_eq!(left.len(), 2);
    assert!(left.contains(&a) && left.contains(&c));

    assert_eq!(sgt.unreserve_all(), 2);
    assert_eq!(pool.available_pages(), 256);
}

#[test]
fn flushes_cover_tables_and_marker_page() {
    let (ram, pool) = setup(64);
    let sgt = SgtAllocator::new(&pool, &ram);
    sgt.reserve(PAGE_SIZE, BufferMode::Linear).unwrap();
    assert_eq!(pool.flushed_pages(), 1);
    sgt.reserve(PAGE_SIZE, BufferMode::Circular).unwrap();
    assert_eq!(pool.flushed_pages(), 3);
}
