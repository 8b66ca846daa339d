//! # HHDM-based PhysMapper
//!
//! [`PhysMapper`] for kernels that map all physical memory at a fixed offset
//! (higher-half direct map). Every physical address `pa` is visible at
//! `offset + pa`.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::HhdmPhysMapper;
//! use kernel_sgt::{PhysMapper, PhysicalAddress, VirtualAddress};
//!
//! let mapper = HhdmPhysMapper::default();
//! let va = mapper.phys_to_virt(PhysicalAddress::new(0x1234_0000));
//! assert_eq!(va, VirtualAddress::new(0xffff_8880_1234_0000));
//! assert_eq!(mapper.virt_to_phys(va), PhysicalAddress::new(0x1234_0000));
//! ```

use kernel_sgt::{PhysMapper, PhysicalAddress, VirtualAddress};

/// [`PhysMapper`] that adds a constant offset.
///
/// # Safety
/// The direct map must be present and cover every physical page handed to
/// the scatter-gather allocator; the mapper itself cannot check this.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HhdmPhysMapper {
    offset: u64,
}

impl HhdmPhysMapper {
    /// Start of the direct map in the kernel's address space layout.
    pub const KERNEL_HHDM_BASE: u64 = 0xffff_8880_0000_0000;

    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl Default for HhdmPhysMapper {
    fn default() -> Self {
        Self::new(Self::KERNEL_HHDM_BASE)
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(self.offset.wrapping_add(pa.as_u64()))
    }

    #[inline]
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(va.as_u64().wrapping_sub(self.offset))
    }
}
