//! x86 page-table construction and parsing.
//!
//! `page_table_map` edits a 4- or 5-level page-table tree so that a
//! linear-address range maps to a physical range with a given attribute,
//! allocating table pages from a caller-provided `ScratchBuffer`.
//! `page_table_parse` walks a tree and reports every mapped range, merged
//! into the fewest entries with uniform attributes and contiguous physical
//! addresses.
//!
//! # Two-pass protocol
//!
//! Every map call first walks the tree without touching it to count the table
//! pages the edit needs. Without a buffer, or with one that is too small, the
//! call stops there with `PagingError::BufferTooSmall { required }`. With a
//! large enough buffer the same walk runs again and commits, consuming exactly
//! `required` bytes. `PageTable` wraps both passes.
//!
//! # Module Structure
//!
//! - `attribute`: `MapAttribute`, the normalized attribute and mask
//! - `entry`: decoding and encoding of the entry shapes
//! - `memory`: `PageTableMemory` and `ScratchBuffer`
//! - `map`: `page_table_map`
//! - `parse`: `page_table_parse`
//! - `table`: `PageTable`, an owner running both passes

pub mod attribute;
pub mod entry;
pub mod error;
pub mod map;
pub mod memory;
pub mod parse;
pub mod table;

pub use attribute::MapAttribute;
pub use entry::PagingEntry;
pub use error::PagingError;
pub use map::{MapOutcome, page_table_map};
pub use memory::{PageTableMemory, ScratchBuffer};
pub use parse::{MapEntry, page_table_parse};
pub use table::PageTable;

/// Size of a table page and of the smallest mapping.
pub const PAGE_SIZE: u64 = 0x1000;

/// Size of a 2 MiB leaf.
pub const SIZE_2M: u64 = 0x20_0000;

/// Size of a 1 GiB leaf.
pub const SIZE_1G: u64 = 0x4000_0000;

/// Entries per table page.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Bytes of linear address space covered by one entry at `level`.
///
/// Level 1 entries cover 4 KiB, each level above covers 512 times more.
#[must_use]
pub const fn level_size(level: u8) -> u64 {
    1u64 << (12 + 9 * (level as u32 - 1))
}

/// Paging hierarchy the tables are built for.
///
/// The suffix names the largest leaf a mapping may use. Without one only
/// 4 KiB leaves are created. Existing large leaves are understood in every
/// mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PagingMode {
    Paging32Bit,
    PagingPae,
    Paging4Level,
    Paging4Level2M,
    Paging4Level1G,
    Paging5Level,
    Paging5Level2M,
    Paging5Level1G,
}

impl PagingMode {
    /// Number of table levels.
    #[must_use]
    pub const fn max_level(self) -> u8 {
        match self {
            Self::Paging32Bit => 2,
            Self::PagingPae => 3,
            Self::Paging4Level | Self::Paging4Level2M | Self::Paging4Level1G => 4,
            Self::Paging5Level | Self::Paging5Level2M | Self::Paging5Level1G => 5,
        }
    }

    /// Highest level at which a leaf may be written.
    #[must_use]
    pub const fn max_leaf_level(self) -> u8 {
        match self {
            Self::Paging4Level | Self::Paging5Level => 1,
            Self::Paging32Bit | Self::PagingPae | Self::Paging4Level2M | Self::Paging5Level2M => 2,
            Self::Paging4Level1G | Self::Paging5Level1G => 3,
        }
    }

    /// Whether the mapper and parser implement this mode.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Paging32Bit | Self::PagingPae)
    }

    /// End of the linear address space the mode translates.
    #[must_use]
    pub const fn linear_limit(self) -> u64 {
        level_size(self.max_level()) * ENTRIES_PER_TABLE as u64
    }

    pub(crate) const fn check_supported(self) -> Result<(), PagingError> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(PagingError::Unsupported(self))
        }
    }
}

impl std::fmt::Display for PagingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Paging32Bit => "32-bit",
            Self::PagingPae => "PAE",
            Self::Paging4Level => "4-level",
            Self::Paging4Level2M => "4-level 2M",
            Self::Paging4Level1G => "4-level 1G",
            Self::Paging5Level => "5-level",
            Self::Paging5Level2M => "5-level 2M",
            Self::Paging5Level1G => "5-level 1G",
        };
        f.write_str(name)
    }
}
