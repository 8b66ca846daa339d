//! # Simulated Physical Memory
//!
//! A page-aligned heap buffer that stands in for physical RAM on a host.
//! Physical addresses are offsets into the buffer plus a base address, so
//! tables built in it look exactly like tables a device would read.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use kernel_sgt::layout::PAGE_SIZE;
use kernel_sgt::{PhysMapper, PhysicalAddress, PhysicalPage, VirtualAddress};

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

const _: () = assert!(size_of::<Frame>() as u64 == PAGE_SIZE);

/// Errors creating a [`SimulatedRam`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RamError {
    #[error("simulated RAM needs at least one page")]
    Empty,
    #[error("{pages} pages at {base} exceed the physical address space")]
    TooLarge { base: PhysicalPage, pages: u64 },
}

/// Host buffer posing as physical memory.
pub struct SimulatedRam {
    base: PhysicalPage,
    frames: Box<[UnsafeCell<Frame>]>,
}

// SAFETY: Frame contents are only reached through `PhysMapper`, whose unsafe
// accessors put exclusivity on the caller.
unsafe impl Sync for SimulatedRam {}
unsafe impl Send for SimulatedRam {}

impl SimulatedRam {
    /// Conventional start of usable RAM (1 MiB).
    pub const DEFAULT_BASE: PhysicalPage = PhysicalPage::from_frame_number(0x100);

    /// Allocate `pages` zeroed pages placed at physical address `base`.
    ///
    /// # Errors
    /// - [`RamError::Empty`] for zero pages.
    /// - [`RamError::TooLarge`] if the range wraps the 64-bit address space
    ///   or does not fit the host.
    pub fn new(base: PhysicalPage, pages: u64) -> Result<Self, RamError> {
        if pages == 0 {
            return Err(RamError::Empty);
        }
        let too_large = RamError::TooLarge { base, pages };
        let bytes = pages.checked_mul(PAGE_SIZE).ok_or(too_large)?;
        base.base().as_u64().checked_add(bytes).ok_or(too_large)?;
        let count = usize::try_from(pages).map_err(|_| too_large)?;

        let frames = (0..count).map(|_| UnsafeCell::new(Frame([0; 4096]))).collect();
        log::debug!("Simulated RAM: {pages} pages at {base}");
        Ok(Self { base, frames })
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalPage {
        self.base
    }

    #[must_use]
    pub fn pages(&self) -> u64 {
        self.frames.len() as u64
    }

    /// First physical address past the end of the buffer.
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.base().as_u64() + self.pages() * PAGE_SIZE)
    }

    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        pa >= self.base.base() && pa < self.end()
    }

    /// Copy out the 32-bit word at `pa`.
    ///
    /// Returns `None` if `pa` is outside the buffer or not 4-byte aligned.
    #[must_use]
    pub fn read_u32(&self, pa: PhysicalAddress) -> Option<u32> {
        if !self.contains(pa) || pa.as_u64() % 4 != 0 {
            return None;
        }
        let ptr = self.phys_to_virt(pa).as_mut_ptr::<u32>();
        // SAFETY: In bounds and aligned; a plain read of initialized bytes.
        Some(unsafe { ptr.read_volatile() })
    }

    fn origin(&self) -> u64 {
        VirtualAddress::from_ptr(self.frames.as_ptr()).as_u64()
    }
}

impl PhysMapper for SimulatedRam {
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        debug_assert!(self.contains(pa), "{pa} outside simulated RAM");
        let offset = pa.as_u64().wrapping_sub(self.base.base().as_u64());
        VirtualAddress::new(self.origin().wrapping_add(offset))
    }

    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        let offset = va.as_u64().wrapping_sub(self.origin());
        PhysicalAddress::new(self.base.base().as_u64().wrapping_add(offset))
    }
}

impl core::fmt::Debug for SimulatedRam {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulatedRam")
            .field("base", &self.base)
            .field("pages", &self.pages())
            .finish_non_exhaustive()
    }
}
