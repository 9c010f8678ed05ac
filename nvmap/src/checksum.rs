//! Fletcher-64 checksum.
//!
//! The checksum runs over little-endian 32-bit words: a low sum accumulates
//! each word and a high sum accumulates the running low sum, both wrapping at
//! 32 bits. The result is `(high << 32) | low`.
//!
//! Structures that embed their own checksum compute it with the checksum
//! field treated as zero, so the same routine validates and seals them.

/// Size of the checksum field embedded in checksummed structures.
pub const CHECKSUM_SIZE: usize = 8;

/// Compute the Fletcher-64 checksum of `bytes`.
///
/// # Pre-conditions
/// - `bytes.len()` is a multiple of 4. Trailing bytes that do not form a
///   whole word are ignored.
#[must_use]
pub fn calculate_fletcher64(bytes: &[u8]) -> u64 {
    fletcher64_words(bytes, None)
}

/// Compute the Fletcher-64 checksum of `bytes` as if the 8-byte field at
/// `checksum_offset` were zero.
///
/// # Pre-conditions
/// - `checksum_offset` is 4-byte aligned and `checksum_offset + 8 <= bytes.len()`.
#[must_use]
pub fn fletcher64_with_field_zeroed(bytes: &[u8], checksum_offset: usize) -> u64 {
    fletcher64_words(bytes, Some(checksum_offset))
}

/// Store the checksum of `bytes` into its own checksum field.
///
/// # Post-conditions
/// - `is_fletcher64_valid(bytes, checksum_offset)` returns true.
pub fn seal_fletcher64(bytes: &mut [u8], checksum_offset: usize) {
    let checksum = fletcher64_with_field_zeroed(bytes, checksum_offset);
    bytes[checksum_offset..checksum_offset + CHECKSUM_SIZE].copy_from_slice(&checksum.to_le_bytes());
}

/// Check the checksum stored at `checksum_offset` against the contents.
#[must_use]
pub fn is_fletcher64_valid(bytes: &[u8], checksum_offset: usize) -> bool {
    stored_checksum(bytes, checksum_offset) == fletcher64_with_field_zeroed(bytes, checksum_offset)
}

/// Read the checksum stored at `checksum_offset`.
#[must_use]
pub fn stored_checksum(bytes: &[u8], checksum_offset: usize) -> u64 {
    let mut field = [0u8; CHECKSUM_SIZE];
    field.copy_from_slice(&bytes[checksum_offset..checksum_offset + CHECKSUM_SIZE]);
    u64::from_le_bytes(field)
}

fn fletcher64_words(bytes: &[u8], skip: Option<usize>) -> u64 {
    let mut lo: u32 = 0;
    let mut hi: u32 = 0;

    for (index, chunk) in bytes.chunks_exact(4).enumerate() {
        let offset = index * 4;
        let word = match skip {
            Some(field) if offset >= field && offset < field + CHECKSUM_SIZE => 0,
            _ => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        };
        lo = lo.wrapping_add(word);
        hi = hi.wrapping_add(lo);
    }

    (u64::from(hi) << 32) | u64::from(lo)
}
