//! # Fault Injection
//!
//! [`FailAfter`] wraps a page allocator and makes single-page acquisition
//! fail once a budget is spent. Index runs are not affected, so a reservation
//! gets as far as building its chain before it runs dry.

use core::sync::atomic::{AtomicU64, Ordering};
use kernel_sgt::{PageAllocator, PhysicalPage};
use log::debug;

/// Page allocator that fails after a number of successful single-page allocations.
#[derive(Debug)]
pub struct FailAfter<A> {
    inner: A,
    /// Remaining successful `alloc_page` calls; `u64::MAX` disables injection.
    budget: AtomicU64,
}

impl<A: PageAllocator> FailAfter<A> {
    /// Let `budget` single-page allocations through, then fail.
    pub const fn new(inner: A, budget: u64) -> Self {
        Self {
            inner,
            budget: AtomicU64::new(budget),
        }
    }

    /// Wrap without failing until [`arm`](Self::arm) is called.
    pub const fn disarmed(inner: A) -> Self {
        Self::new(inner, u64::MAX)
    }

    pub fn arm(&self, budget: u64) {
        self.budget.store(budget, Ordering::Relaxed);
    }

    pub fn disarm(&self) {
        self.arm(u64::MAX);
    }

    /// Remaining budget; `None` when disarmed.
    pub fn remaining(&self) -> Option<u64> {
        match self.budget.load(Ordering::Relaxed) {
            u64::MAX => None,
            n => Some(n),
        }
    }

    pub const fn inner(&self) -> &A {
        &self.inner
    }

    fn consume(&self) -> bool {
        self.budget
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| match n {
                0 => None,
                u64::MAX => Some(u64::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl<A: PageAllocator> PageAllocator for FailAfter<A> {
    fn alloc_page(&self) -> Option<PhysicalPage> {
        if !self.consume() {
            debug!("Injected page allocation failure");
            return None;
        }
        self.inner.alloc_page()
    }

    fn free_page(&self, page: PhysicalPage) {
        self.inner.free_page(page);
    }

    fn alloc_pages(&self, order: u32) -> Option<PhysicalPage> {
        self.inner.alloc_pages(order)
    }

    fn free_pages(&self, run: PhysicalPage, order: u32) {
        self.inner.free_pages(run, order);
    }

    fn flush_for_device(&self, run: PhysicalPage, count: u64) {
        self.inner.flush_for_device(run, count);
    }

    fn free_page_count(&self) -> u64 {
        self.inner.free_page_count()
    }
}
