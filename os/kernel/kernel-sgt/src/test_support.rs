//! In-memory page pool used by the unit tests.
//!
//! Pages are backed by a heap buffer and placed at a configurable physical
//! base. The pool records every allocation so tests can assert that nothing
//! leaks and nothing is freed twice.

use crate::{PageAllocator, PhysMapper, PhysicalAddress, PhysicalPage, VirtualAddress};
use std::cell::UnsafeCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

pub const PHYS_BASE: u64 = 0x10_0000;

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

#[derive(Default)]
struct State {
    free: BTreeSet<u64>,
    singles: BTreeSet<u64>,
    runs: BTreeMap<u64, u32>,
    fail_after: Option<u64>,
    double_frees: u64,
    flushed: Vec<(PhysicalPage, u64)>,
}

pub struct TestRam {
    base: u64,
    frames: Box<[UnsafeCell<Frame>]>,
    state: Mutex<State>,
}

// SAFETY: Frame contents are only touched through `PhysMapper`, whose callers
// uphold exclusivity; bookkeeping is behind the mutex.
unsafe impl Sync for TestRam {}
unsafe impl Send for TestRam {}

impl TestRam {
    pub fn new(frames: u64) -> Self {
        Self::at(PHYS_BASE, frames)
    }

    pub fn at(base: u64, frames: u64) -> Self {
        let buffer = (0..frames)
            .map(|_| UnsafeCell::new(Frame([0; 4096])))
            .collect();
        let state = State {
            free: (0..frames).collect(),
            ..State::default()
        };
        Self {
            base,
            frames: buffer,
            state: Mutex::new(state),
        }
    }

    fn frame_index(&self, page: PhysicalPage) -> u64 {
        (page.base().as_u64() - self.base) / 4096
    }

    fn page_at(&self, index: u64) -> PhysicalPage {
        PhysicalPage::from_aligned(PhysicalAddress::new(self.base + index * 4096)).unwrap()
    }

    /// Let `n` more single-page allocations succeed, then fail.
    pub fn fail_after(&self, n: u64) {
        self.state.lock().unwrap().fail_after = Some(n);
    }

    /// Pages and runs currently handed out.
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.singles.len() + state.runs.len()
    }

    pub fn double_frees(&self) -> u64 {
        self.state.lock().unwrap().double_frees
    }

    pub fn flushed(&self) -> Vec<(PhysicalPage, u64)> {
        self.state.lock().unwrap().flushed.clone()
    }

    pub fn is_allocated(&self, page: PhysicalPage) -> bool {
        let index = self.frame_index(page);
        let state = self.state.lock().unwrap();
        state.singles.contains(&index)
            || state
                .runs
                .iter()
                .any(|(&first, &order)| (first..first + (1 << order)).contains(&index))
    }

    pub fn read_u32(&self, pa: PhysicalAddress) -> u32 {
        let va = self.phys_to_virt(pa);
        unsafe { va.as_mut_ptr::<u32>().read() }
    }
}

impl PageAllocator for TestRam {
    fn alloc_page(&self) -> Option<PhysicalPage> {
        let mut state = self.state.lock().unwrap();
        if let Some(budget) = state.fail_after.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }
        // Hand out high frames first so runs stay available at the bottom.
        let index = state.free.pop_last()?;
        state.singles.insert(index);
        drop(state);
        Some(self.page_at(index))
    }

    fn free_page(&self, page: PhysicalPage) {
        let index = self.frame_index(page);
        let mut state = self.state.lock().unwrap();
        if state.singles.remove(&index) {
            state.free.insert(index);
        } else {
            state.double_frees += 1;
        }
    }

    fn alloc_pages(&self, order: u32) -> Option<PhysicalPage> {
        let mut state = self.state.lock().unwrap();
        let count = 1u64 << order;
        let total = self.frames.len() as u64;
        let first = (0..total)
            .step_by(usize::try_from(count).unwrap())
            .find(|&first| first + count <= total && (first..first + count).all(|i| state.free.contains(&i)))?;
        for i in first..first + count {
            state.free.remove(&i);
        }
        state.runs.insert(first, order);
        drop(state);
        Some(self.page_at(first))
    }

    fn free_pages(&self, run: PhysicalPage, order: u32) {
        let first = self.frame_index(run);
        let mut state = self.state.lock().unwrap();
        if state.runs.get(&first) == Some(&order) {
            state.runs.remove(&first);
            for i in first..first + (1 << order) {
                state.free.insert(i);
            }
        } else {
            state.double_frees += 1;
        }
    }

    fn flush_for_device(&self, run: PhysicalPage, count: u64) {
        self.state.lock().unwrap().flushed.push((run, count));
    }

    fn free_page_count(&self) -> u64 {
        self.state.lock().unwrap().free.len() as u64
    }
}

impl PhysMapper for TestRam {
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        let offset = pa.as_u64() - self.base;
        let index = usize::try_from(offset / 4096).unwrap();
        let frame = self.frames[index].get();
        VirtualAddress::from_ptr(frame) + offset % 4096
    }

    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        let origin = VirtualAddress::from_ptr(self.frames[0].get()).as_u64();
        PhysicalAddress::new(self.base + (va.as_u64() - origin))
    }
}
