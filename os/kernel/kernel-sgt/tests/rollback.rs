use kernel_alloc::{BitmapFrameAlloc, FailAfter, SimulatedRam};
use kernel_sgt::layout::PAGE_SIZE;
use kernel_sgt::{BufferMode, RollbackScope, SgtAllocator, SgtConfig, SgtError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

fn setup(pages: u64) -> (SimulatedRam, FailAfter<BitmapFrameAlloc>) {
    let ram = SimulatedRam::new(SimulatedRam::DEFAULT_BASE, pages).unwrap();
    let pool = FailAfter::disarmed(BitmapFrameAlloc::for_ram(&ram));
    (ram, pool)
}

#[test]
fn failure_after_two_of_three_pages_leaks_nothing() {
    let (ram, pool) = setup(32);
    let sgt = SgtAllocator::new(&pool, &ram);

    pool.arm(2);
    assert_eq!(sgt.reserve(3 * PAGE_SIZE, BufferMode::Linear), Err(SgtError::OutOfMemory));
    assert_eq!(sgt.live_allocations(), 0);
    assert_eq!(pool.inner().available_pages(), 32);
    assert_eq!(pool.inner().double_frees(), 0);
}

#[test]
fn global_rollback_releases_every_table() {
    let (ram, pool) = setup(128);
    let sgt = SgtAllocator::new(&pool, &ram);
    for pages in 1..=4 {
        sgt.reserve(pages * PAGE_SIZE, BufferMode::Linear).unwrap();
    }
    sgt.reserve(3 * PAGE_SIZE, BufferMode::Circular).unwrap();
    assert_eq!(sgt.live_allocations(), 5);

    pool.arm(1);
    assert!(sgt.reserve(4 * PAGE_SIZE, BufferMode::Circular).is_err());
    assert_eq!(sgt.live_allocations(), 0);
    assert_eq!(pool.inner().available_pages(), 128);
    assert_eq!(pool.inner().double_frees(), 0);
}

#[test]
fn failing_scope_rollback_keeps_other_tables() {
    let (ram, pool) = setup(128);
    let config = SgtConfig::new().with_rollback(RollbackScope::Failing);
    let sgt = SgtAllocator::with_config(&pool, &ram, config);
    let kept = sgt.reserve(4 * PAGE_SIZE, BufferMode::Linear).unwrap();
    let used = pool.inner().available_pages();

    pool.arm(3);
    assert!(sgt.reserve(8 * PAGE_SIZE, BufferMode::Linear).is_err());
    pool.disarm();

    assert!(sgt.find(kept).is_some());
    assert_eq!(pool.inner().available_pages(), used);
    sgt.unreserve(kept).unwrap();
    assert_eq!(pool.inner().available_pages(), 128);
}

#[test]
fn exhausting_memory_for_the_index_run_rolls_back() {
    let (ram, pool) = setup(16);
    let sgt = SgtAllocator::new(&pool, &ram);
    sgt.reserve(8 * PAGE_SIZE, BufferMode::Linear).unwrap();
    assert_eq!(sgt.reserve(16 * PAGE_SIZE, BufferMode::Linear), Err(SgtError::OutOfMemory));
    assert_eq!(sgt.live_allocations(), 0);
    assert_eq!(pool.inner().available_pages(), 16);
}

#[test]
fn release_order_does_not_matter() {
    let (ram, pool) = setup(1024);
    let sgt = SgtAllocator::new(&pool, &ram);
    let mut tables: Vec<_> = (1..=20)
        .map(|i| {
            let mode = if i % 3 == 0 { BufferMode::Circular } else { BufferMode::Linear };
            sgt.reserve(i * 3 * PAGE_SIZE / 2, mode).unwrap()
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(0x5617);
    tables.shuffle(&mut rng);
    for (released, table) in tables.iter().enumerate() {
        sgt.unreserve(*table).unwrap();
        assert_eq!(sgt.live_allocations(), 20 - released - 1);
    }
    assert_eq!(pool.inner().available_pages(), 1024);
    assert_eq!(pool.inner().double_frees(), 0);
}
