//! Reads a table chain back out of simulated RAM, the way a device would.

use kernel_alloc::SimulatedRam;
use kernel_sgt::layout::{END_OF_BUFFER_MARKER, ENTRIES_PER_TABLE, PAGE_SIZE};
use kernel_sgt::{Entry, PhysicalAddress, PhysicalPage, RawEntry};
use std::fmt;

/// What a device walking the chain would see.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ChainReport {
    /// Data entries per index table, in chain order.
    pub tables: Vec<u64>,
    pub data_pages: u64,
    /// The chain ends in a link back to its first table.
    pub wraps: bool,
    /// Data page whose last word holds the end-of-buffer marker.
    pub marker: Option<PhysicalPage>,
}

#[must_use]
pub fn walk(ram: &SimulatedRam, first: PhysicalAddress) -> ChainReport {
    let mut report = ChainReport {
        tables: vec![0],
        ..ChainReport::default()
    };
    let mut table = first;
    let mut slot = 0;
    let mut last_data = None;

    while slot < ENTRIES_PER_TABLE {
        let Some(raw) = ram.read_u32(table + slot * 4) else {
            break;
        };
        match RawEntry::from_bits(raw).decode() {
            None => break,
            Some(Entry::Link(next)) if next.base() == first => {
                report.wraps = true;
                break;
            }
            Some(Entry::Link(next)) => {
                table = next.base();
                slot = 0;
                report.tables.push(0);
            }
            Some(entry) => {
                report.data_pages += 1;
                if let Some(count) = report.tables.last_mut() {
                    *count += 1;
                }
                last_data = Some(entry.page());
                if matches!(entry, Entry::Last(_)) {
                    break;
                }
                slot += 1;
            }
        }
    }

    report.marker = last_data.filter(|page| {
        ram.read_u32(page.base() + (PAGE_SIZE - 4)) == Some(END_OF_BUFFER_MARKER)
    });
    report
}

impl fmt::Display for ChainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} data pages in {} tables{}",
            self.data_pages,
            self.tables.len(),
            if self.wraps { ", circular" } else { "" }
        )?;
        for (i, entries) in self.tables.iter().enumerate() {
            writeln!(f, "  table {i}: {entries} data entries")?;
        }
        if let Some(page) = self.marker {
            writeln!(f, "  end-of-buffer marker in {page}")?;
        }
        Ok(())
    }
}
