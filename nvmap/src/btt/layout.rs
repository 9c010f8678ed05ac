//! Arena partitioning and geometry.
//!
//! Each arena is laid out as:
//!
//! ```text
//! +------------------+ 0
//! | info block       |   4 KiB
//! +------------------+ flog_off
//! | flog             |   nfree * 64 bytes, aligned up to 4 KiB
//! +------------------+ map_off
//! | map              |   4 bytes per external LBA, aligned up to 4 KiB
//! +------------------+ data_off
//! | data             |   internal_nlba * internal_lba_size
//! +------------------+
//! | (slack)          |
//! +------------------+ info_off = size - 4 KiB
//! | backup info      |
//! +------------------+ size
//! ```

use crate::btt::error::BttError;

/// Alignment of every region inside an arena.
pub const BTT_ALIGNMENT: u64 = 4096;

/// Size of an info block (and its backup copy).
pub const INFO_BLOCK_SIZE: u64 = 4096;

/// Largest arena. All arenas but the last have exactly this size.
pub const MAX_ARENA_SIZE: u64 = 512 << 30;

/// Smallest arena. A trailing remainder below this size is left unused.
pub const MIN_ARENA_SIZE: u64 = 16 << 20;

/// Cache line size. Flog pairs and map updates are cache-line granular.
pub const CACHE_LINE_SIZE: u64 = 64;

/// Size of one map entry on media.
pub const MAP_ENTRY_SIZE: u64 = 4;

/// Space reserved for one flog slot (a pair of 16-byte records, padded).
pub const FLOG_PAIR_SIZE: u64 = 64;

/// Smallest internal block size.
pub const MIN_INTERNAL_LBA_SIZE: u32 = 512;

/// Map entries address internal blocks with 30 bits.
pub const MAX_INTERNAL_NLBA: u64 = 1 << 30;

/// Round `value` up to a multiple of `align` (a power of two).
#[must_use]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to a multiple of `align` (a power of two).
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

/// Internal block size for a given external block size.
///
/// At least 512 bytes and always a whole number of cache lines.
// The aligned value only exceeds u32 for external sizes within 63 bytes of
// u32::MAX, which no caller can use.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn internal_lba_size(external_lba_size: u32) -> u32 {
    let aligned = align_up(external_lba_size as u64, CACHE_LINE_SIZE);
    if aligned < MIN_INTERNAL_LBA_SIZE as u64 {
        MIN_INTERNAL_LBA_SIZE
    } else {
        aligned as u32
    }
}

/// Position of one arena within the BTT's linear space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSpan {
    /// Absolute byte offset of the arena.
    pub base: u64,
    /// Arena size in bytes.
    pub size: u64,
}

/// Split `total_size` bytes into arenas of at most `max_arena_size`.
///
/// # Post-conditions
/// - Arenas are contiguous starting at 0
/// - Every arena but the last is exactly `max_arena_size` (aligned down)
/// - Every arena is at least `MIN_ARENA_SIZE`
pub fn plan_arenas(total_size: u64, max_arena_size: u64) -> Result<Vec<ArenaSpan>, BttError> {
    let max_arena_size = align_down(max_arena_size, BTT_ALIGNMENT);
    if total_size < MIN_ARENA_SIZE || max_arena_size < MIN_ARENA_SIZE {
        return Err(BttError::InvalidParameter(format!(
            "total size {total_size:#x} is below the minimum arena size {MIN_ARENA_SIZE:#x}"
        )));
    }

    let count = usize::try_from(total_size / max_arena_size + 1)
        .map_err(|_| BttError::OutOfResources)?;
    let mut spans = Vec::new();
    spans.try_reserve_exact(count)?;

    let mut base = 0u64;
    let mut remaining = total_size;
    while remaining >= MIN_ARENA_SIZE {
        let size = align_down(remaining.min(max_arena_size), BTT_ALIGNMENT);
        spans.push(ArenaSpan { base, size });
        base += size;
        remaining -= size;
    }

    Ok(spans)
}

/// Region offsets and block counts of one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaGeometry {
    pub external_nlba: u32,
    pub internal_nlba: u32,
    pub nfree: u32,
    pub flog_off: u64,
    pub map_off: u64,
    pub data_off: u64,
    pub info_off: u64,
}

impl ArenaGeometry {
    /// Compute the geometry of an arena of `arena_size` bytes.
    ///
    /// The internal block count is the largest `n` for which the map
    /// (sized for `n + 1 - nfree` entries, aligned) plus `n` data blocks fit
    /// between the flog and the backup info block. Alignment rounding makes
    /// the plain division an estimate only, so the count is refined by
    /// stepping from that estimate.
    pub fn compute(arena_size: u64, nfree: u32, internal_lba_size: u32) -> Result<Self, BttError> {
        if nfree == 0 {
            return Err(BttError::InvalidParameter("nfree must be at least 1".to_string()));
        }

        let flog_off = INFO_BLOCK_SIZE;
        let flog_size = align_up(u64::from(nfree) * FLOG_PAIR_SIZE, BTT_ALIGNMENT);
        let map_off = flog_off + flog_size;
        let info_off = arena_size.saturating_sub(INFO_BLOCK_SIZE);
        let budget = info_off.checked_sub(map_off).ok_or_else(|| {
            BttError::InvalidParameter(format!(
                "arena of {arena_size:#x} bytes cannot hold {nfree} flog slots"
            ))
        })?;

        let block = u64::from(internal_lba_size);
        let nfree64 = u64::from(nfree);
        let map_size = |n: u64| align_up((n + 1).saturating_sub(nfree64) * MAP_ENTRY_SIZE, BTT_ALIGNMENT);
        let fits = |n: u64| map_size(n) + n * block <= budget;

        let mut internal_nlba = budget / (block + MAP_ENTRY_SIZE);
        while internal_nlba > 0 && !fits(internal_nlba) {
            internal_nlba -= 1;
        }
        while fits(internal_nlba + 1) {
            internal_nlba += 1;
        }
        internal_nlba = internal_nlba.min(MAX_INTERNAL_NLBA);

        if internal_nlba <= nfree64 {
            return Err(BttError::InvalidParameter(format!(
                "arena of {arena_size:#x} bytes has no room for external blocks"
            )));
        }
        // Flog slot `i` starts out naming external block `i`.
        if internal_nlba - nfree64 < nfree64 {
            return Err(BttError::InvalidParameter(format!(
                "arena of {arena_size:#x} bytes holds {} external blocks, fewer than nfree {nfree}",
                internal_nlba - nfree64
            )));
        }

        let data_off = map_off + map_size(internal_nlba);
        tracing::debug!(
            arena_size,
            internal_nlba,
            nfree,
            flog_off,
            map_off,
            data_off,
            "computed arena geometry"
        );

        // internal_nlba is capped at 2^30 above.
        #[allow(clippy::cast_possible_truncation)]
        let internal_nlba = internal_nlba as u32;
        Ok(Self {
            external_nlba: internal_nlba - nfree,
            internal_nlba,
            nfree,
            flog_off,
            map_off,
            data_off,
            info_off,
        })
    }
}
