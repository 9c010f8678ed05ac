//! Memory backing page-table pages.
//!
//! # Design
//!
//! Table pages live in regions of contiguous 4 KiB pages, each region stored
//! as a `Vec` of 512-entry tables and addressed by a simulated physical
//! address. Entries reference child tables by those addresses, exactly as
//! hardware tables would, so a tree can be handed to anything that walks
//! physical addresses.
//!
//! Regions are handed out through `reserve`, which returns a `ScratchBuffer`.
//! The mapper takes pages from the buffer's tail one at a time. Nothing is
//! ever freed individually: pages orphaned by a later edit stay allocated
//! until the whole `PageTableMemory` is dropped.

use crate::paging::error::PagingError;
use crate::paging::{ENTRIES_PER_TABLE, PAGE_SIZE};

/// First physical address handed out.
pub const PHYSICAL_BASE: u64 = 0x10_0000;

/// One table page.
pub type Table = [u64; ENTRIES_PER_TABLE];

struct Region {
    base: u64,
    tables: Vec<Table>,
}

/// Owner of every table page of one or more page-table trees.
pub struct PageTableMemory {
    regions: Vec<Region>,
    next_base: u64,
}

impl Default for PageTableMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTableMemory {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
            next_base: PHYSICAL_BASE,
        }
    }

    /// Reserve `size` bytes of zeroed table pages.
    ///
    /// # Pre-conditions
    /// - `size` is a positive multiple of 4 KiB
    pub fn reserve(&mut self, size: u64) -> Result<ScratchBuffer, PagingError> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(PagingError::InvalidParameter(
                "buffer size must be a positive multiple of 4 KiB",
            ));
        }
        let pages = usize::try_from(size / PAGE_SIZE)
            .map_err(|_| PagingError::InvalidParameter("buffer size too large"))?;

        let base = self.next_base;
        self.next_base += size;
        self.regions.push(Region {
            base,
            tables: vec![[0u64; ENTRIES_PER_TABLE]; pages],
        });

        Ok(ScratchBuffer {
            base,
            size,
            remaining: size,
        })
    }

    /// Locate the region and index of the table at `address`.
    fn locate(&self, address: u64) -> Result<(usize, usize), PagingError> {
        if address % PAGE_SIZE != 0 {
            return Err(PagingError::InvalidParameter("table address is not page aligned"));
        }
        for (region_index, region) in self.regions.iter().enumerate() {
            let end = region.base + region.tables.len() as u64 * PAGE_SIZE;
            if (region.base..end).contains(&address) {
                let index = usize::try_from((address - region.base) / PAGE_SIZE)
                    .map_err(|_| PagingError::InvalidParameter("table address out of range"))?;
                return Ok((region_index, index));
            }
        }
        Err(PagingError::InvalidParameter(
            "table address outside page-table memory",
        ))
    }

    /// The table at physical address `address`.
    pub fn table(&self, address: u64) -> Result<&Table, PagingError> {
        let (region, index) = self.locate(address)?;
        Ok(&self.regions[region].tables[index])
    }

    /// The table at physical address `address`, mutably.
    pub fn table_mut(&mut self, address: u64) -> Result<&mut Table, PagingError> {
        let (region, index) = self.locate(address)?;
        Ok(&mut self.regions[region].tables[index])
    }

    /// Total bytes reserved so far.
    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.regions
            .iter()
            .map(|r| r.tables.len() as u64 * PAGE_SIZE)
            .sum()
    }
}

/// A reserved run of table pages, consumed from the end backward.
#[derive(Debug)]
pub struct ScratchBuffer {
    base: u64,
    size: u64,
    remaining: u64,
}

impl ScratchBuffer {
    /// Hand out the highest unused page.
    pub(crate) const fn take_page(&mut self) -> Option<u64> {
        if self.remaining < PAGE_SIZE {
            return None;
        }
        self.remaining -= PAGE_SIZE;
        Some(self.base + self.remaining)
    }

    /// Physical address of the first page.
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Size of the buffer in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn consumed(&self) -> u64 {
        self.size - self.remaining
    }
}
