//! # Physical and Virtual Address Types
//!
//! Thin `u64` wrappers that keep physical and virtual addresses apart at the
//! type level. Scatter-gather tables only ever deal with one page size
//! ([`PAGE_SIZE`]), so [`PhysicalPage`] is not generic over page sizes.

use crate::layout::{PAGE_SHIFT, PAGE_SIZE};
use core::fmt;
use core::ops::Add;

/// Physical memory address (host RAM as seen by the device).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

/// Virtual memory address (as seen by the CPU running this code).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

/// Page-aligned base of one physical page.
///
/// ### Invariants
/// - The low [`PAGE_SHIFT`] bits are always zero.
///
/// ```rust
/// # use kernel_sgt::{PhysicalAddress, PhysicalPage};
/// let page = PhysicalPage::containing(PhysicalAddress::new(0x1234_5678));
/// assert_eq!(page.base().as_u64(), 0x1234_5000);
/// assert_eq!(page.frame_number(), 0x12345);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Return `true` if the address is the base of a page.
    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }
}

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl PhysicalPage {
    /// Page that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self(addr.0 & !(PAGE_SIZE - 1))
    }

    /// Create from an address that must already be page aligned.
    ///
    /// Returns `None` for unaligned addresses.
    #[inline]
    #[must_use]
    pub const fn from_aligned(addr: PhysicalAddress) -> Option<Self> {
        if addr.is_page_aligned() {
            Some(Self(addr.0))
        } else {
            None
        }
    }

    /// Create from a page frame number (`address >> PAGE_SHIFT`).
    #[inline]
    #[must_use]
    pub const fn from_frame_number(frame: u64) -> Self {
        Self(frame << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn frame_number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// The page `n` pages after this one.
    #[inline]
    #[must_use]
    pub const fn offset_pages(self, n: u64) -> Self {
        Self(self.0 + n * PAGE_SIZE)
    }

    /// Number of whole pages from `origin` to `self`, if `self` is not below `origin`.
    #[inline]
    #[must_use]
    pub const fn pages_since(self, origin: Self) -> Option<u64> {
        match self.0.checked_sub(origin.0) {
            Some(delta) => Some(delta >> PAGE_SHIFT),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:010X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:010X}", self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:010X})", self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.base(), f)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalPage> for PhysicalAddress {
    #[inline]
    fn from(page: PhysicalPage) -> Self {
        page.base()
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}
