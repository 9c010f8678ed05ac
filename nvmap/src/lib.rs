// Forbid unwrap() in production code to prevent panics from corrupt media.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

// Two independent components live in this crate:
//
//  - `btt`: the Block Translation Table. Turns a byte-addressable persistent
//    memory region into a block device with power-fail atomic block writes.
//    Layout on media: one or more arenas, each holding an info block, a flog
//    (free-block log), a map and a data area, plus a backup info block.
//
//  - `paging`: builds x86 4/5-level page tables over caller-owned memory and
//    parses them back into a compacted list of mapped ranges.
//
// `checksum` holds the Fletcher-64 routines the info block is sealed with.
// `config` reads BTT format parameters from the environment.

pub mod btt;
pub mod checksum;
pub mod config;
pub mod paging;

#[cfg(test)]
mod simulation;
#[cfg(test)]
mod testing;

pub use btt::{Btt, BttError, FileMedia, MediaError, MemoryMedia, RawMedia, Uuid};
pub use config::{BttConfig, ConfigError};
pub use paging::{
    MapAttribute, MapEntry, MapOutcome, PageTable, PageTableMemory, PagingError, PagingMode,
    ScratchBuffer, page_table_map, page_table_parse,
};
