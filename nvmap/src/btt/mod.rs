//! Block Translation Table.
//!
//! Presents a byte-addressable persistent memory region as a block device
//! whose single-block writes are atomic with respect to power loss. A write
//! never overwrites live data in place: it lands in a free block, is logged in
//! the flog, and only then is the map switched over.
//!
//! # Module Structure
//!
//! - `media`: the `RawMedia` accessor trait and a file-backed implementation
//! - `memory`: sparse in-memory media with fault injection
//! - `layout`: arena partitioning and region offsets
//! - `info_block`: the per-arena info block and its backup
//! - `map`: map entry encoding
//! - `flog`: free-block log slots and sequence numbers
//! - `arena`: format, load, recovery and block I/O of one arena
//! - `device`: the `Btt` front end over all arenas

pub mod arena;
pub mod device;
pub mod error;
pub mod flog;
pub mod info_block;
pub mod layout;
pub mod map;
pub mod media;
pub mod memory;
pub mod uuid;

pub use arena::Arena;
pub use device::Btt;
pub use error::BttError;
pub use info_block::{InfoBlock, InfoBlockError};
pub use media::{FileMedia, MediaError, RawMedia};
pub use memory::{FaultConfig, MemoryMedia, MemoryMediaStats};
pub use uuid::Uuid;
