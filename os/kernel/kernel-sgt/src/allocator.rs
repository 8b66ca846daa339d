//! # Allocation Orchestrator
//!
//! [`SgtAllocator`] ties the pieces together: it sizes a request, acquires the
//! index run, builds the chain, tracks the result in the [`Registry`] and
//! undoes everything when an acquisition fails.
//!
//! ```text
//! reserve(size) ─► geometry ─► alloc run ─► zero ─► insert (pending)
//!                                                      │
//!                  ┌───────────── build chain ◄────────┘
//!                  │ ok                         │ error
//!                  ▼                            ▼
//!          flush + seal                teardown own chain, free run,
//!          return address              discard record, roll back
//! ```

use crate::addresses::PhysicalAddress;
use crate::builder::reserve_entries;
use crate::error::{InvalidRequest, SgtError};
use crate::layout::{PAGE_SIZE, TableGeometry};
use crate::registry::{AllocationRecord, Registry};
use crate::table::TableChain;
use crate::teardown::unreserve_entries;
use crate::{BufferMode, PageAllocator, PhysMapper};
use alloc::vec::Vec;
use log::{debug, error, info, warn};

/// Records the registry accepts unless configured otherwise.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 1024;

/// Largest index run (`2^order` pages) requested from the page allocator by default.
pub const DEFAULT_MAX_RUN_ORDER: u32 = 10;

/// Which allocations are torn down when a reservation fails.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum RollbackScope {
    /// Every live allocation, returning the system to a clean state.
    #[default]
    All,
    /// Only the reservation that failed.
    Failing,
}

/// Runtime knobs of an [`SgtAllocator`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SgtConfig {
    pub registry_capacity: usize,
    pub max_run_order: u32,
    pub rollback: RollbackScope,
}

impl SgtConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            max_run_order: DEFAULT_MAX_RUN_ORDER,
            rollback: RollbackScope::All,
        }
    }

    #[must_use]
    pub const fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_max_run_order(mut self, order: u32) -> Self {
        self.max_run_order = order;
        self
    }

    #[must_use]
    pub const fn with_rollback(mut self, rollback: RollbackScope) -> Self {
        self.rollback = rollback;
        self
    }
}

impl Default for SgtConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// On-demand scatter-gather table allocator.
///
/// All operations take `&self` and may be called from several threads; only
/// registry updates are serialized. Dropping the allocator releases every
/// table that is still registered.
pub struct SgtAllocator<A: PageAllocator, M: PhysMapper> {
    alloc: A,
    mapper: M,
    config: SgtConfig,
    registry: Registry,
}

impl<A: PageAllocator, M: PhysMapper> SgtAllocator<A, M> {
    #[must_use]
    pub fn new(alloc: A, mapper: M) -> Self {
        Self::with_config(alloc, mapper, SgtConfig::new())
    }

    #[must_use]
    pub fn with_config(alloc: A, mapper: M, config: SgtConfig) -> Self {
        Self {
            alloc,
            mapper,
            config,
            registry: Registry::new(config.registry_capacity),
        }
    }

    /// Reserve a table describing `size` bytes of freshly acquired pages.
    ///
    /// Returns the physical address of the first index table, which the
    /// device consumes and which identifies the table for [`unreserve`](Self::unreserve).
    ///
    /// # Errors
    /// - [`SgtError::InvalidRequest`] for a zero `size`; nothing is rolled back.
    /// - [`SgtError::OutOfMemory`] if the index run, a data page or a registry
    ///   slot cannot be acquired, or if the run would exceed
    ///   [`SgtConfig::max_run_order`].
    /// - [`SgtError::Unaddressable`] if the page allocator returned a page
    ///   beyond the entry address range.
    /// - [`SgtError::AlreadyRegistered`] if the page allocator returned a run
    ///   that is still in use.
    ///
    /// Every error except the first rolls back according to [`SgtConfig::rollback`].
    pub fn reserve(&self, size: u64, mode: BufferMode) -> Result<PhysicalAddress, SgtError> {
        if size == 0 {
            return Err(InvalidRequest::ZeroSize.into());
        }

        let geometry = TableGeometry::new(size, mode);
        debug!(
            "Reserving {size} bytes ({mode:?}): {} data pages, {} tables, run order {}",
            geometry.data_pages, geometry.tables, geometry.order
        );

        if geometry.order > self.config.max_run_order {
            warn!(
                "Index run of order {} exceeds the limit of {}",
                geometry.order, self.config.max_run_order
            );
            return Err(self.fail(SgtError::OutOfMemory));
        }

        let Some(run) = self.alloc.alloc_pages(geometry.order) else {
            warn!("No contiguous run of order {} for the index tables", geometry.order);
            return Err(self.fail(SgtError::OutOfMemory));
        };

        let record = AllocationRecord::new(run, size, mode);
        if let Err(e) = self.registry.insert(record) {
            match e {
                // The run belongs to a live table; it must not be freed twice.
                SgtError::AlreadyRegistered(_) => {
                    error!("Page allocator handed out the live run at {run}");
                }
                _ => self.alloc.free_pages(run, geometry.order),
            }
            return Err(self.fail(e));
        }

        // SAFETY: The run was just acquired and nothing else knows about it yet.
        let mut chain = unsafe { TableChain::new(&self.mapper, run, geometry.run_pages()) };
        chain.zero();

        match reserve_entries(&mut chain, &self.alloc, geometry.slots, mode) {
            Ok(summary) => {
                self.alloc.flush_for_device(run, geometry.tables);
                if let Some(page) = summary.end_of_buffer {
                    self.alloc.flush_for_device(page, 1);
                }
                self.registry.seal(record.address);
                info!(
                    "Reserved {size} bytes at {}: {} pages in {} tables",
                    record.address, summary.data_pages, summary.tables_used
                );
                Ok(record.address)
            }
            Err(e) => {
                let released = unreserve_entries(&chain, &self.alloc, geometry.data_pages);
                self.alloc.free_pages(run, geometry.order);
                self.registry.discard(record.address);
                warn!(
                    "Reservation of {size} bytes failed after {} pages: {e}",
                    released.pages_freed
                );
                Err(self.fail(e))
            }
        }
    }

    /// Release the table at `address` and every page it references.
    ///
    /// # Errors
    /// [`SgtError::NotFound`] if no table is registered at `address`, including
    /// when a concurrent caller released it first.
    pub fn unreserve(&self, address: PhysicalAddress) -> Result<(), SgtError> {
        let record = self.registry.remove(address)?;
        let geometry = record.geometry();
        let first = record.first_page();

        // SAFETY: Claiming the record gave this call sole ownership of the run.
        let chain = unsafe { TableChain::new(&self.mapper, first, geometry.run_pages()) };
        let summary = unreserve_entries(&chain, &self.alloc, geometry.data_pages);
        self.alloc.free_pages(first, geometry.order);

        info!(
            "Released table at {address}: {} of {} data pages",
            summary.pages_freed, geometry.data_pages
        );
        Ok(())
    }

    /// Release every registered table. Returns how many this call released.
    pub fn unreserve_all(&self) -> usize {
        let mut released = 0;
        while let Some(record) = self.registry.take_any() {
            // NotFound only means another caller got there first.
            if self.unreserve(record.address).is_ok() {
                released += 1;
            }
        }
        if released > 0 {
            debug!("Released {released} tables");
        }
        released
    }

    /// Bytes the page allocator could currently hand out. Advisory only.
    #[must_use]
    pub fn get_capacity(&self) -> u64 {
        self.alloc.free_page_count().saturating_mul(PAGE_SIZE)
    }

    #[must_use]
    pub fn find(&self, address: PhysicalAddress) -> Option<AllocationRecord> {
        self.registry.find(address)
    }

    /// Number of tables currently reserved.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.registry.len()
    }

    /// Records of all reserved tables in address order.
    #[must_use]
    pub fn records(&self) -> Vec<AllocationRecord> {
        self.registry.snapshot()
    }

    #[must_use]
    pub const fn config(&self) -> &SgtConfig {
        &self.config
    }

    #[must_use]
    pub const fn page_allocator(&self) -> &A {
        &self.alloc
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Apply the rollback policy after a failed reservation and hand `e` back.
    fn fail(&self, e: SgtError) -> SgtError {
        if self.config.rollback == RollbackScope::All {
            let released = self.unreserve_all();
            if released > 0 {
                warn!("Rolled back {released} tables after: {e}");
            }
        }
        e
    }
}

impl<A: PageAllocator, M: PhysMapper> Drop for SgtAllocator<A, M> {
    fn drop(&mut self) {
        let released = self.unreserve_all();
        if released > 0 {
            info!("Released {released} tables on shutdown");
        }
    }
}

impl<A: PageAllocator, M: PhysMapper> core::fmt::Debug for SgtAllocator<A, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SgtAllocator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
