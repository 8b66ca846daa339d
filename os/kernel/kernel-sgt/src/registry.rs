//! # Allocation Registry
//!
//! Lock-protected set of live scatter-gather tables, keyed by the physical
//! address of their first index table.
//!
//! A record is inserted *pending* before its table is built and *sealed* once
//! the build succeeds. Only sealed records can be found, picked for a drain,
//! or removed; a pending record belongs to the reservation that inserted it.

use crate::addresses::{PhysicalAddress, PhysicalPage};
use crate::error::SgtError;
use crate::layout::TableGeometry;
use crate::BufferMode;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kernel_sync::SpinLock;

/// Metadata of one live table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AllocationRecord {
    /// Physical address of the first index table; the record's identity.
    pub address: PhysicalAddress,
    /// Requested size in bytes.
    pub size: u64,
    pub mode: BufferMode,
}

impl AllocationRecord {
    #[must_use]
    pub const fn new(first: PhysicalPage, size: u64, mode: BufferMode) -> Self {
        Self {
            address: first.base(),
            size,
            mode,
        }
    }

    /// Geometry the table was built with.
    #[must_use]
    pub const fn geometry(&self) -> TableGeometry {
        TableGeometry::new(self.size, self.mode)
    }

    #[must_use]
    pub const fn first_page(&self) -> PhysicalPage {
        PhysicalPage::containing(self.address)
    }
}

#[derive(Debug, Copy, Clone)]
struct Slot {
    record: AllocationRecord,
    sealed: bool,
}

/// Registry of live tables.
pub struct Registry {
    capacity: usize,
    slots: SpinLock<BTreeMap<PhysicalAddress, Slot>>,
}

impl Registry {
    /// Create an empty registry holding at most `capacity` records, pending ones included.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: SpinLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `record` as pending.
    ///
    /// # Errors
    /// - [`SgtError::AlreadyRegistered`] if a record with the same address exists.
    /// - [`SgtError::OutOfMemory`] if the registry is full.
    pub fn insert(&self, record: AllocationRecord) -> Result<(), SgtError> {
        self.slots.with_lock(|slots| {
            if slots.contains_key(&record.address) {
                return Err(SgtError::AlreadyRegistered(record.address));
            }
            if slots.len() >= self.capacity {
                return Err(SgtError::OutOfMemory);
            }
            slots.insert(
                record.address,
                Slot {
                    record,
                    sealed: false,
                },
            );
            Ok(())
        })
    }

    /// Make a pending record visible. Returns `false` if there was no pending record.
    pub fn seal(&self, address: PhysicalAddress) -> bool {
        self.slots.with_lock(|slots| match slots.get_mut(&address) {
            Some(slot) if !slot.sealed => {
                slot.sealed = true;
                true
            }
            _ => false,
        })
    }

    /// Drop a pending record without tearing anything down.
    pub fn discard(&self, address: PhysicalAddress) -> Option<AllocationRecord> {
        self.slots.with_lock(|slots| {
            let pending = slots.get(&address).is_some_and(|slot| !slot.sealed);
            if pending {
                slots.remove(&address).map(|slot| slot.record)
            } else {
                None
            }
        })
    }

    /// Claim a sealed record. Exactly one of several concurrent callers succeeds.
    ///
    /// # Errors
    /// [`SgtError::NotFound`] if no sealed record has this address.
    pub fn remove(&self, address: PhysicalAddress) -> Result<AllocationRecord, SgtError> {
        self.slots.with_lock(|slots| {
            let sealed = slots.get(&address).is_some_and(|slot| slot.sealed);
            sealed
                .then(|| slots.remove(&address))
                .flatten()
                .map(|slot| slot.record)
                .ok_or(SgtError::NotFound(address))
        })
    }

    #[must_use]
    pub fn find(&self, address: PhysicalAddress) -> Option<AllocationRecord> {
        self.slots.with_lock(|slots| {
            slots
                .get(&address)
                .filter(|slot| slot.sealed)
                .map(|slot| slot.record)
        })
    }

    /// Some sealed record, left in place; `None` if there is none.
    ///
    /// Pair with [`remove`](Self::remove) to drain the registry.
    #[must_use]
    pub fn take_any(&self) -> Option<AllocationRecord> {
        self.slots.with_lock(|slots| {
            slots
                .values()
                .find(|slot| slot.sealed)
                .map(|slot| slot.record)
        })
    }

    /// Number of sealed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .with_lock(|slots| slots.values().filter(|slot| slot.sealed).count())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records whose table is still being built.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slots
            .with_lock(|slots| slots.values().filter(|slot| !slot.sealed).count())
    }

    /// Sealed records in address order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AllocationRecord> {
        self.slots.with_lock(|slots| {
            slots
                .values()
                .filter(|slot| slot.sealed)
                .map(|slot| slot.record)
                .collect()
        })
    }
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("capacity", &self.capacity)
            .field("sealed", &self.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}
