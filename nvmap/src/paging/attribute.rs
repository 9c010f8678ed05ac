//! Normalized mapping attributes.
//!
//! A `MapAttribute` uses the bit positions of a 4 KiB page-table entry no
//! matter which entry shape it is stored in:
//!
//! ```text
//! +--------+---------------------------+
//! | 0      | present                   |
//! | 1      | read/write                |
//! | 2      | user/supervisor           |
//! | 3      | write-through             |
//! | 4      | cache disable             |
//! | 5      | accessed                  |
//! | 6      | dirty                     |
//! | 7      | PAT                       |
//! | 8      | global                    |
//! | 12-51  | physical base address     |
//! | 59-62  | protection key            |
//! | 63     | no-execute                |
//! +--------+---------------------------+
//! ```
//!
//! The same type doubles as a mask: a set bit selects the field for update.
//! A mask selects the base address when all of bits 12-51 are set.

pub const PRESENT: u64 = 1 << 0;
pub const READ_WRITE: u64 = 1 << 1;
pub const USER_SUPERVISOR: u64 = 1 << 2;
pub const WRITE_THROUGH: u64 = 1 << 3;
pub const CACHE_DISABLE: u64 = 1 << 4;
pub const ACCESSED: u64 = 1 << 5;
pub const DIRTY: u64 = 1 << 6;
pub const PAT: u64 = 1 << 7;
pub const GLOBAL: u64 = 1 << 8;
pub const BASE_MASK: u64 = 0x000F_FFFF_FFFF_F000;
pub const PROTECTION_KEY_SHIFT: u32 = 59;
pub const PROTECTION_KEY_MASK: u64 = 0xF << PROTECTION_KEY_SHIFT;
pub const NO_EXECUTE: u64 = 1 << 63;

const FLAG_BITS: u64 = 0x1FF;

/// Attribute of a linear-address range, or a mask over such attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MapAttribute(u64);

impl MapAttribute {
    /// No bits set.
    pub const EMPTY: Self = Self(0);

    /// Every field, base address included. As a mask: replace everything.
    pub const ALL: Self = Self(FLAG_BITS | BASE_MASK | PROTECTION_KEY_MASK | NO_EXECUTE);

    /// Attribute of intermediate tables and of the root: fully permissive,
    /// so a non-leaf entry never restricts any range below it.
    pub const NON_LEAF_DEFAULT: Self = Self(PRESENT | READ_WRITE | USER_SUPERVISOR);

    #[must_use]
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Build from raw bits; bits outside the defined fields are dropped.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & Self::ALL.0)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    const fn with_flag(self, flag: u64, on: bool) -> Self {
        if on { Self(self.0 | flag) } else { Self(self.0 & !flag) }
    }

    const fn has(self, flag: u64) -> bool {
        self.0 & flag != 0
    }

    #[must_use]
    pub const fn with_present(self, on: bool) -> Self {
        self.with_flag(PRESENT, on)
    }

    #[must_use]
    pub const fn with_read_write(self, on: bool) -> Self {
        self.with_flag(READ_WRITE, on)
    }

    #[must_use]
    pub const fn with_user_supervisor(self, on: bool) -> Self {
        self.with_flag(USER_SUPERVISOR, on)
    }

    #[must_use]
    pub const fn with_write_through(self, on: bool) -> Self {
        self.with_flag(WRITE_THROUGH, on)
    }

    #[must_use]
    pub const fn with_cache_disable(self, on: bool) -> Self {
        self.with_flag(CACHE_DISABLE, on)
    }

    #[must_use]
    pub const fn with_accessed(self, on: bool) -> Self {
        self.with_flag(ACCESSED, on)
    }

    #[must_use]
    pub const fn with_dirty(self, on: bool) -> Self {
        self.with_flag(DIRTY, on)
    }

    #[must_use]
    pub const fn with_pat(self, on: bool) -> Self {
        self.with_flag(PAT, on)
    }

    #[must_use]
    pub const fn with_global(self, on: bool) -> Self {
        self.with_flag(GLOBAL, on)
    }

    #[must_use]
    pub const fn with_nx(self, on: bool) -> Self {
        self.with_flag(NO_EXECUTE, on)
    }

    /// Set the protection key (low 4 bits of `key`).
    #[must_use]
    pub const fn with_protection_key(self, key: u8) -> Self {
        Self((self.0 & !PROTECTION_KEY_MASK) | (((key as u64) << PROTECTION_KEY_SHIFT) & PROTECTION_KEY_MASK))
    }

    /// Set the physical base address (bits 12-51 of `base`).
    #[must_use]
    pub const fn with_base(self, base: u64) -> Self {
        Self((self.0 & !BASE_MASK) | (base & BASE_MASK))
    }

    /// Mask form: select or deselect the base address field.
    #[must_use]
    pub const fn with_base_included(self, on: bool) -> Self {
        self.with_flag(BASE_MASK, on)
    }

    #[must_use]
    pub const fn present(self) -> bool {
        self.has(PRESENT)
    }

    #[must_use]
    pub const fn read_write(self) -> bool {
        self.has(READ_WRITE)
    }

    #[must_use]
    pub const fn user_supervisor(self) -> bool {
        self.has(USER_SUPERVISOR)
    }

    #[must_use]
    pub const fn write_through(self) -> bool {
        self.has(WRITE_THROUGH)
    }

    #[must_use]
    pub const fn cache_disable(self) -> bool {
        self.has(CACHE_DISABLE)
    }

    #[must_use]
    pub const fn accessed(self) -> bool {
        self.has(ACCESSED)
    }

    #[must_use]
    pub const fn dirty(self) -> bool {
        self.has(DIRTY)
    }

    #[must_use]
    pub const fn pat(self) -> bool {
        self.has(PAT)
    }

    #[must_use]
    pub const fn global(self) -> bool {
        self.has(GLOBAL)
    }

    #[must_use]
    pub const fn nx(self) -> bool {
        self.has(NO_EXECUTE)
    }

    // The key field is 4 bits wide.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn protection_key(self) -> u8 {
        ((self.0 & PROTECTION_KEY_MASK) >> PROTECTION_KEY_SHIFT) as u8
    }

    #[must_use]
    pub const fn base(self) -> u64 {
        self.0 & BASE_MASK
    }

    /// Everything except the base address.
    #[must_use]
    pub const fn attributes(self) -> u64 {
        self.0 & !BASE_MASK
    }

    /// Mask form: whether the base address field is selected.
    #[must_use]
    pub const fn includes_base(self) -> bool {
        self.0 & BASE_MASK == BASE_MASK
    }

    /// Mask form: whether every field is selected.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        self.0 & Self::ALL.0 == Self::ALL.0
    }

    /// Effective attribute of an entry below a parent whose own effective
    /// attribute is `parent`.
    ///
    /// Present, read/write and user/supervisor only survive if every level
    /// grants them; no-execute applies if any level sets it. Everything else
    /// comes from `self`.
    #[must_use]
    pub const fn inherit(self, parent: Self) -> Self {
        let and_bits = PRESENT | READ_WRITE | USER_SUPERVISOR;
        let anded = self.0 & (parent.0 | !and_bits);
        Self(anded | (parent.0 & NO_EXECUTE))
    }

    /// Apply an update of `requested` under `mask` to `self`.
    ///
    /// When the mask selects the base address the entry is reset first, so
    /// fields outside the mask end up clear rather than carried over from a
    /// different physical page.
    #[must_use]
    pub const fn update(self, requested: Self, mask: Self) -> Self {
        let start = if mask.includes_base() { 0 } else { self.0 };
        Self((start & !mask.0) | (requested.0 & mask.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_and_getters() {
        let attr = MapAttribute::new()
            .with_present(true)
            .with_read_write(true)
            .with_global(true)
            .with_nx(true)
            .with_protection_key(0xA)
            .with_base(0x1234_5000);

        assert!(attr.present() && attr.read_write() && attr.global() && attr.nx());
        assert!(!attr.user_supervisor() && !attr.dirty() && !attr.pat());
        assert_eq!(attr.protection_key(), 0xA);
        assert_eq!(attr.base(), 0x1234_5000);
        assert!(!attr.with_read_write(false).read_write());
    }

    #[test]
    fn test_base_is_page_aligned() {
        assert_eq!(MapAttribute::new().with_base(0x1234_5678).base(), 0x1234_5000);
        assert_eq!(MapAttribute::new().with_base(u64::MAX).base(), BASE_MASK);
    }

    #[test]
    fn test_inherit_combines_permissions() {
        let leaf = MapAttribute::new()
            .with_present(true)
            .with_read_write(true)
            .with_dirty(true);
        let parent = MapAttribute::NON_LEAF_DEFAULT.with_read_write(false).with_nx(true);

        let effective = leaf.inherit(parent);
        assert!(effective.present());
        assert!(!effective.read_write());
        assert!(!effective.user_supervisor());
        assert!(effective.nx());
        assert!(effective.dirty());
        assert_eq!(leaf.inherit(MapAttribute::NON_LEAF_DEFAULT), leaf);
    }

    #[test]
    fn test_update_reset_then_set() {
        let current = MapAttribute::new()
            .with_present(true)
            .with_dirty(true)
            .with_base(0x8000);
        let requested = MapAttribute::new().with_present(true).with_base(0x9000);

        let mask = MapAttribute::new().with_present(true).with_base_included(true);
        let updated = current.update(requested, mask);
        assert_eq!(updated, requested);
        assert!(!updated.dirty());

        let mask = MapAttribute::new().with_read_write(true);
        let updated = current.update(MapAttribute::new().with_read_write(true), mask);
        assert!(updated.read_write() && updated.dirty());
        assert_eq!(updated.base(), 0x8000);
    }

    #[test]
    fn test_mask_helpers() {
        assert!(MapAttribute::ALL.is_complete());
        assert!(MapAttribute::ALL.includes_base());
        assert!(!MapAttribute::ALL.with_nx(false).is_complete());
        assert!(!MapAttribute::NON_LEAF_DEFAULT.includes_base());
        assert_eq!(MapAttribute::ALL.attributes() & BASE_MASK, 0);
    }
}
