//! # Table Entries
//!
//! One 32-bit slot of an index table and the codec between that raw form and
//! the typed [`Entry`].
//!
//! ### Bit layout
//!
//! | Bits  | Field     | Meaning |
//! |-------|-----------|---------|
//! | 0–1   | tag       | [`EntryTag`]: `LAST = 1`, `NORMAL = 2`, `LINK = 3` |
//! | 2–3   | reserved  | always zero |
//! | 4–31  | frame     | physical address bits `[39:12]` |
//!
//! Equivalently, `raw = (address >> 8) | tag`. A raw value of zero is the
//! "not yet written" sentinel and never comes out of [`RawEntry::encode`],
//! because every tag is non-zero.

use crate::addresses::PhysicalPage;
use crate::error::SgtError;
use crate::layout::{PHYS_ADDR_LIMIT, TAG_FIELD_BITS, TAG_MASK};
use bitfield_struct::bitfield;

/// Raw bitfield view of one table slot.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryBits {
    /// Entry type, see [`EntryTag`].
    #[bits(2)]
    pub tag: u8,

    #[bits(2)]
    __: u8,

    /// Physical page frame number (address bits `[39:12]`).
    #[bits(28)]
    pub frame: u32,
}

/// Type discriminator stored in the low bits of an entry.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EntryTag {
    /// Final data page of the whole allocation.
    Last = 1,
    /// Data page; more entries follow.
    Normal = 2,
    /// Start of the next index table in the chain.
    Link = 3,
}

/// A written table slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Entry {
    /// Data page; more entries follow.
    Normal(PhysicalPage),
    /// Final data page of the allocation.
    Last(PhysicalPage),
    /// Next index table (or, in a circular buffer, the chain's own first table).
    Link(PhysicalPage),
}

/// One 32-bit table slot as stored in memory.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawEntry(EntryBits);

impl EntryTag {
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::Last),
            2 => Some(Self::Normal),
            3 => Some(Self::Link),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

impl Entry {
    #[inline]
    #[must_use]
    pub const fn new(page: PhysicalPage, tag: EntryTag) -> Self {
        match tag {
            EntryTag::Last => Self::Last(page),
            EntryTag::Normal => Self::Normal(page),
            EntryTag::Link => Self::Link(page),
        }
    }

    #[inline]
    #[must_use]
    pub const fn tag(self) -> EntryTag {
        match self {
            Self::Normal(_) => EntryTag::Normal,
            Self::Last(_) => EntryTag::Last,
            Self::Link(_) => EntryTag::Link,
        }
    }

    /// The referenced page: a data page or, for [`Entry::Link`], an index table.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        match self {
            Self::Normal(page) | Self::Last(page) | Self::Link(page) => page,
        }
    }

    /// Return `true` for entries that reference a data page.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        !matches!(self, Self::Link(_))
    }
}

impl RawEntry {
    /// The unwritten slot.
    pub const EMPTY: Self = Self(EntryBits::new());

    /// Encode `entry` into its 32-bit slot form.
    ///
    /// # Errors
    /// [`SgtError::Unaddressable`] if the page lies at or above
    /// [`PHYS_ADDR_LIMIT`](crate::layout::PHYS_ADDR_LIMIT).
    #[allow(clippy::cast_possible_truncation)]
    pub const fn encode(entry: Entry) -> Result<Self, SgtError> {
        let page = entry.page();
        if page.base().as_u64() >= PHYS_ADDR_LIMIT {
            return Err(SgtError::Unaddressable(page.base()));
        }
        let bits = EntryBits::new()
            .with_tag(entry.tag().into_bits())
            .with_frame(page.frame_number() as u32);
        Ok(Self(bits))
    }

    /// Decode the slot; `None` for an unwritten (zero) slot.
    ///
    /// A non-zero value without a tag cannot be produced by [`encode`](Self::encode)
    /// and is treated like an unwritten slot, which ends any walk over the table.
    #[inline]
    #[must_use]
    pub const fn decode(self) -> Option<Entry> {
        match EntryTag::from_bits(self.0.tag()) {
            Some(tag) => {
                let page = PhysicalPage::from_frame_number(self.0.frame() as u64);
                Some(Entry::new(page, tag))
            }
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0.into_bits() == 0
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(v: u32) -> Self {
        Self(EntryBits::from_bits(v))
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u32 {
        self.0.into_bits()
    }

    /// Expose the underlying bitfield.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> EntryBits {
        self.0
    }
}

impl Default for RawEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

const _: () = {
    assert!(TAG_MASK == (1 << 2) - 1);
    assert!(TAG_FIELD_BITS == 4);
    assert!(size_of::<RawEntry>() == size_of::<u32>());
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::PhysicalAddress;

    fn page(addr: u64) -> PhysicalPage {
        PhysicalPage::from_aligned(PhysicalAddress::new(addr)).unwrap()
    }

    #[test]
    fn encoding_matches_shifted_address_with_tag() {
        let raw = RawEntry::encode(Entry::Normal(page(0x1234_5000))).unwrap();
        assert_eq!(raw.into_bits(), (0x1234_5000 >> 8) | 2);
        assert_eq!(raw.into_bits() & TAG_MASK, 2);

        let raw = RawEntry::encode(Entry::Link(page(0x8000))).unwrap();
        assert_eq!(raw.into_bits(), 0x80 | 3);
    }

    #[test]
    fn decode_inverts_encode() {
        let samples = [0, 0x1000, 0x7654_3000, PHYS_ADDR_LIMIT - 0x1000];
        for addr in samples {
            for tag in [EntryTag::Last, EntryTag::Normal, EntryTag::Link] {
                let entry = Entry::new(page(addr), tag);
                let raw = RawEntry::encode(entry).unwrap();
                assert_eq!(raw.decode(), Some(entry), "{addr:#x} {tag:?}");
            }
        }
    }

    #[test]
    fn encode_never_yields_the_empty_sentinel() {
        let raw = RawEntry::encode(Entry::Last(page(0))).unwrap();
        assert!(!raw.is_empty());
        assert_eq!(raw.into_bits(), 1);
    }

    #[test]
    fn empty_and_untagged_slots_decode_to_none() {
        assert_eq!(RawEntry::EMPTY.decode(), None);
        assert!(RawEntry::default().is_empty());
        assert_eq!(RawEntry::from_bits(0x1230).decode(), None);
    }

    #[test]
    fn pages_beyond_the_address_width_are_rejected() {
        let high = page(PHYS_ADDR_LIMIT);
        assert_eq!(
            RawEntry::encode(Entry::Normal(high)),
            Err(SgtError::Unaddressable(high.base()))
        );
    }

    #[test]
    fn data_and_link_entries() {
        assert!(Entry::Normal(page(0x1000)).is_data());
        assert!(Entry::Last(page(0x1000)).is_data());
        assert!(!Entry::Link(page(0x1000)).is_data());
        assert_eq!(Entry::Link(page(0x2000)).page(), page(0x2000));
    }
}
