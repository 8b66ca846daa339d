//! # Page Pools and Physical Mappers
//!
//! Implementations of the [`PageAllocator`](kernel_sgt::PageAllocator) and
//! [`PhysMapper`](kernel_sgt::PhysMapper) capabilities the scatter-gather
//! allocator consumes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 SgtAllocator (kernel-sgt)           │
//! └───────────┬─────────────────────────────┬───────────┘
//!             │ PageAllocator               │ PhysMapper
//! ┌───────────▼─────────────┐   ┌───────────▼───────────┐
//! │ FailAfter<A> (optional) │   │ SimulatedRam          │
//! │   • fault injection     │   │   • host buffer as RAM│
//! ├─────────────────────────┤   ├───────────────────────┤
//! │ BitmapFrameAlloc        │   │ HhdmPhysMapper        │
//! │   • 1 bit per 4 KiB     │   │   • kernel direct map │
//! │   • aligned 2^n runs    │   │                       │
//! └─────────────────────────┘   └───────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::{BitmapFrameAlloc, SimulatedRam};
//! use kernel_sgt::{BufferMode, SgtAllocator};
//!
//! let ram = SimulatedRam::new(SimulatedRam::DEFAULT_BASE, 64).unwrap();
//! let pool = BitmapFrameAlloc::for_ram(&ram);
//! let sgt = SgtAllocator::new(&pool, &ram);
//!
//! let table = sgt.reserve(50 * 1024, BufferMode::Linear).unwrap();
//! sgt.unreserve(table).unwrap();
//! assert_eq!(pool.available_pages(), 64);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod fault;
pub mod frame_alloc;
pub mod phys_mapper;
pub mod sim_ram;

pub use fault::FailAfter;
pub use frame_alloc::BitmapFrameAlloc;
pub use phys_mapper::HhdmPhysMapper;
pub use sim_ram::{RamError, SimulatedRam};
