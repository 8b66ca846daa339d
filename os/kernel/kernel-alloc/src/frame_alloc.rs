//! # Bitmap Page Pool
//!
//! Tracks a contiguous range of 4 KiB frames with one bit per frame.
//!
//! - Single pages are handed out next-fit, so consecutive requests walk
//!   through the pool and freed pages are reused only after a wrap. Buffers
//!   built from it are physically discontiguous, as they would be on a
//!   long-running system.
//! - Runs of `2^order` pages are naturally aligned and searched first-fit.
//! - Freeing a page that is not allocated is logged as an error and counted;
//!   the pool state is left untouched.

use crate::sim_ram::SimulatedRam;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_sgt::{PageAllocator, PhysicalPage};
use kernel_sync::SpinLock;
use log::{error, trace};

const BITS: u64 = u64::BITS as u64;

struct Bitmap {
    /// Set bit = frame in use.
    words: Vec<u64>,
    frames: u64,
    free: u64,
    /// Where the next single-page search starts.
    cursor: u64,
}

impl Bitmap {
    fn new(frames: u64) -> Self {
        let words = usize::try_from(frames.div_ceil(BITS)).unwrap_or(0);
        Self {
            words: vec![0; words],
            frames,
            free: frames,
            cursor: 0,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn is_used(&self, frame: u64) -> bool {
        self.words[(frame / BITS) as usize] & (1 << (frame % BITS)) != 0
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set(&mut self, frame: u64, used: bool) {
        let word = &mut self.words[(frame / BITS) as usize];
        let bit = 1 << (frame % BITS);
        if used {
            *word |= bit;
            self.free -= 1;
        } else {
            *word &= !bit;
            self.free += 1;
        }
    }

    fn take_single(&mut self) -> Option<u64> {
        if self.free == 0 {
            return None;
        }
        let frame = (self.cursor..self.frames)
            .chain(0..self.cursor)
            .find(|&frame| !self.is_used(frame))?;
        self.set(frame, true);
        self.cursor = (frame + 1) % self.frames;
        Some(frame)
    }

    fn take_run(&mut self, count: u64) -> Option<u64> {
        if count > self.free {
            return None;
        }
        let step = usize::try_from(count).ok()?;
        let first = (0..self.frames)
            .step_by(step)
            .take_while(|&first| first + count <= self.frames)
            .find(|&first| (first..first + count).all(|frame| !self.is_used(frame)))?;
        for frame in first..first + count {
            self.set(frame, true);
        }
        Some(first)
    }
}

/// Bitmap-tracked pool of physical pages.
pub struct BitmapFrameAlloc {
    base: PhysicalPage,
    state: SpinLock<Bitmap>,
    double_frees: AtomicU64,
    flushed: AtomicU64,
}

impl BitmapFrameAlloc {
    /// Pool over `frames` pages starting at `base`, all free.
    #[must_use]
    pub fn new(base: PhysicalPage, frames: u64) -> Self {
        Self {
            base,
            state: SpinLock::new(Bitmap::new(frames)),
            double_frees: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
        }
    }

    /// Pool covering every page of `ram`.
    #[must_use]
    pub fn for_ram(ram: &SimulatedRam) -> Self {
        Self::new(ram.base(), ram.pages())
    }

    #[must_use]
    pub fn capacity_pages(&self) -> u64 {
        self.state.with_lock(|bitmap| bitmap.frames)
    }

    #[must_use]
    pub fn available_pages(&self) -> u64 {
        self.state.with_lock(|bitmap| bitmap.free)
    }

    /// Frees of pages that were not allocated, since creation.
    #[must_use]
    pub fn double_frees(&self) -> u64 {
        self.double_frees.load(Ordering::Relaxed)
    }

    /// Pages passed to [`flush_for_device`](PageAllocator::flush_for_device) so far.
    #[must_use]
    pub fn flushed_pages(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_allocated(&self, page: PhysicalPage) -> bool {
        self.frame_of(page)
            .is_some_and(|frame| self.state.with_lock(|bitmap| bitmap.is_used(frame)))
    }

    fn frame_of(&self, page: PhysicalPage) -> Option<u64> {
        let frame = page.pages_since(self.base)?;
        (frame < self.capacity_pages()).then_some(frame)
    }

    fn release(&self, page: PhysicalPage, count: u64) {
        let Some(first) = self.frame_of(page) else {
            error!("Freeing {page}, which lies outside the pool");
            self.double_frees.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let released = self.state.with_lock(|bitmap| {
            if first + count > bitmap.frames
                || (first..first + count).any(|frame| !bitmap.is_used(frame))
            {
                return false;
            }
            for frame in first..first + count {
                bitmap.set(frame, false);
            }
            true
        });
        if !released {
            error!("Double free of {count} page(s) at {page}");
            self.double_frees.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl PageAllocator for BitmapFrameAlloc {
    fn alloc_page(&self) -> Option<PhysicalPage> {
        let frame = self.state.with_lock(Bitmap::take_single)?;
        Some(self.base.offset_pages(frame))
    }

    fn free_page(&self, page: PhysicalPage) {
        self.release(page, 1);
    }

    fn alloc_pages(&self, order: u32) -> Option<PhysicalPage> {
        let count = 1u64.checked_shl(order)?;
        let first = self.state.with_lock(|bitmap| bitmap.take_run(count))?;
        trace!("Run of {count} pages at frame {first}");
        Some(self.base.offset_pages(first))
    }

    fn free_pages(&self, run: PhysicalPage, order: u32) {
        self.release(run, 1 << order);
    }

    fn flush_for_device(&self, run: PhysicalPage, count: u64) {
        trace!("Flushing {count} page(s) at {run}");
        self.flushed.fetch_add(count, Ordering::Relaxed);
    }

    fn free_page_count(&self) -> u64 {
        self.available_pages()
    }
}

impl core::fmt::Debug for BitmapFrameAlloc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BitmapFrameAlloc")
            .field("base", &self.base)
            .field("capacity", &self.capacity_pages())
            .field("available", &self.available_pages())
            .finish_non_exhaustive()
    }
}
