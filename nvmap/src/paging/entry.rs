//! Page-table entry shapes and their bit packing.
//!
//! One 64-bit entry is read differently depending on its level and on the
//! page-size bit (bit 7):
//!
//! - level 1: a 4 KiB leaf, laid out exactly like `MapAttribute`
//! - level 2 or 3 with bit 7 set: a 2 MiB or 1 GiB leaf. PAT moves to bit
//!   12 and the base address starts at bit 21 or 30
//! - any other level 2-5 entry: a pointer to the next table
//!
//! An entry with the present bit clear is not present regardless of level.

use crate::paging::attribute::{
    ACCESSED, BASE_MASK, CACHE_DISABLE, DIRTY, GLOBAL, MapAttribute, NO_EXECUTE, PAT, PRESENT,
    PROTECTION_KEY_MASK, READ_WRITE, USER_SUPERVISOR, WRITE_THROUGH,
};
use crate::paging::level_size;

/// Page-size bit of level 2 and 3 entries.
pub const PAGE_SIZE_BIT: u64 = 1 << 7;

/// PAT bit of 2 MiB and 1 GiB leaves.
pub const BIG_LEAF_PAT: u64 = 1 << 12;

/// Attribute bits stored at the same position in every leaf shape.
const LEAF_COMMON: u64 = PRESENT
    | READ_WRITE
    | USER_SUPERVISOR
    | WRITE_THROUGH
    | CACHE_DISABLE
    | ACCESSED
    | DIRTY
    | GLOBAL
    | PROTECTION_KEY_MASK
    | NO_EXECUTE;

/// Attribute bits a table pointer carries.
const NON_LEAF_BITS: u64 =
    PRESENT | READ_WRITE | USER_SUPERVISOR | WRITE_THROUGH | CACHE_DISABLE | ACCESSED | NO_EXECUTE;

/// One decoded page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingEntry {
    NotPresent,
    /// Pointer to the table one level down.
    NonLeaf { table: u64, attribute: MapAttribute },
    Leaf1G(MapAttribute),
    Leaf2M(MapAttribute),
    Leaf4K(MapAttribute),
}

impl PagingEntry {
    /// Decode a raw entry found at `level` (1 = page table, 5 = PML5).
    #[must_use]
    pub const fn decode(raw: u64, level: u8) -> Self {
        if raw & PRESENT == 0 {
            return Self::NotPresent;
        }
        if level == 1 {
            return Self::Leaf4K(MapAttribute::from_bits(raw));
        }
        if (level == 2 || level == 3) && raw & PAGE_SIZE_BIT != 0 {
            let pat = if raw & BIG_LEAF_PAT != 0 { PAT } else { 0 };
            let base = raw & BASE_MASK & !(level_size(level) - 1);
            let attribute = MapAttribute::from_bits((raw & LEAF_COMMON) | pat | base);
            return if level == 2 { Self::Leaf2M(attribute) } else { Self::Leaf1G(attribute) };
        }
        Self::NonLeaf {
            table: raw & BASE_MASK,
            attribute: MapAttribute::from_bits(raw & NON_LEAF_BITS),
        }
    }

    /// Encode into the raw entry layout.
    #[must_use]
    pub const fn encode(self) -> u64 {
        match self {
            Self::NotPresent => 0,
            Self::NonLeaf { table, attribute } => (table & BASE_MASK) | (attribute.bits() & NON_LEAF_BITS),
            Self::Leaf4K(attribute) => attribute.bits(),
            Self::Leaf2M(attribute) => encode_big_leaf(attribute, 2),
            Self::Leaf1G(attribute) => encode_big_leaf(attribute, 3),
        }
    }

    /// The leaf shape of `level` carrying `attribute`.
    #[must_use]
    pub const fn leaf(level: u8, attribute: MapAttribute) -> Self {
        match level {
            3 => Self::Leaf1G(attribute),
            2 => Self::Leaf2M(attribute),
            _ => Self::Leaf4K(attribute),
        }
    }

    /// The attribute of a leaf, `None` for other shapes.
    #[must_use]
    pub const fn leaf_attribute(self) -> Option<MapAttribute> {
        match self {
            Self::Leaf1G(attribute) | Self::Leaf2M(attribute) | Self::Leaf4K(attribute) => Some(attribute),
            Self::NotPresent | Self::NonLeaf { .. } => None,
        }
    }
}

const fn encode_big_leaf(attribute: MapAttribute, level: u8) -> u64 {
    let bits = attribute.bits();
    let pat = if bits & PAT != 0 { BIG_LEAF_PAT } else { 0 };
    let base = bits & BASE_MASK & !(level_size(level) - 1);
    (bits & LEAF_COMMON) | PAGE_SIZE_BIT | pat | base
}
