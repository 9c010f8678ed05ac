//! BTT map entries.
//!
//! Layout of one 32-bit little-endian entry:
//! ```text
//! +--------+--------------------------------------------+
//! | 0-29   | post-map LBA (internal block)              |
//! | 30     | error flag                                 |
//! | 31     | zero flag                                  |
//! +--------+--------------------------------------------+
//! ```
//!
//! The two flags form a state code:
//!
//! | error | zero | meaning                                       |
//! |-------|------|-----------------------------------------------|
//! | 1     | 1    | normal mapping to the post-map LBA            |
//! | 1     | 0    | error block, reads fail                       |
//! | 0     | 1    | zero block, reads return zeros                |
//! | 0     | 0    | identity, the post-map LBA is the pre-map LBA |
//!
//! A freshly zeroed map therefore maps every external block onto the
//! internal block with the same number.

/// Bits holding the post-map LBA.
pub const POST_MAP_LBA_MASK: u32 = (1 << 30) - 1;

/// Error flag.
pub const ERROR_FLAG: u32 = 1 << 30;

/// Zero flag.
pub const ZERO_FLAG: u32 = 1 << 31;

/// What a read of a mapped block must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    /// Data lives in the given internal block.
    Normal(u32),
    /// The block is marked bad.
    Error,
    /// The block reads as zeros.
    Zero,
}

/// One raw map entry. The default (all zero) entry is an identity mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MapEntry(u32);

impl MapEntry {
    /// Wrap a raw on-media value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// A normal mapping onto `post_map_lba`.
    #[must_use]
    pub const fn normal(post_map_lba: u32) -> Self {
        Self((post_map_lba & POST_MAP_LBA_MASK) | ERROR_FLAG | ZERO_FLAG)
    }

    /// The raw on-media value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The post-map LBA field, without identity resolution.
    #[must_use]
    pub const fn post_map_lba(self) -> u32 {
        self.0 & POST_MAP_LBA_MASK
    }

    #[must_use]
    pub const fn is_error(self) -> bool {
        self.0 & ERROR_FLAG != 0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 & ZERO_FLAG != 0
    }

    /// Whether the entry carries neither flag.
    #[must_use]
    pub const fn is_identity(self) -> bool {
        !self.is_error() && !self.is_zero()
    }

    /// Replace an identity entry by the explicit normal mapping it stands for.
    ///
    /// Every other entry is returned unchanged.
    #[must_use]
    pub const fn explicit(self, pre_map_lba: u32) -> Self {
        if self.is_identity() {
            Self::normal(pre_map_lba)
        } else {
            self
        }
    }

    /// The internal block backing this entry, identity resolved.
    ///
    /// Error and zero blocks still own an internal block; it is retired to
    /// the free pool when the entry is next overwritten.
    #[must_use]
    pub const fn backing_block(self, pre_map_lba: u32) -> u32 {
        self.explicit(pre_map_lba).post_map_lba()
    }

    /// Decode the read behaviour of the entry.
    #[must_use]
    pub const fn state(self, pre_map_lba: u32) -> MapState {
        match (self.is_error(), self.is_zero()) {
            (true, true) => MapState::Normal(self.post_map_lba()),
            (true, false) => MapState::Error,
            (false, true) => MapState::Zero,
            (false, false) => MapState::Normal(pre_map_lba),
        }
    }
}
