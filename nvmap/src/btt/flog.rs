//! Free-block log (flog).
//!
//! Each arena keeps `nfree` flog slots. A slot is 64 bytes and holds two
//! 16-byte records, the rest is padding:
//!
//! ```text
//! +-----------+-----------+-----------+-----------+
//! | lba (4)   | old_map(4)| new_map(4)| seq (4)   |  record 0
//! +-----------+-----------+-----------+-----------+
//! | lba (4)   | old_map(4)| new_map(4)| seq (4)   |  record 1
//! +-----------+-----------+-----------+-----------+
//! | padding (32)                                  |
//! +-----------------------------------------------+
//! ```
//!
//! # Design
//!
//! Exactly one record of a slot is active: the one whose sequence number is
//! the successor of the other's in the cycle 1 -> 2 -> 3 -> 1. Sequence 0
//! marks a record that has never been written. A write stages the next
//! record in the inactive position, and only the final 4-byte sequence
//! store makes it active. A record torn before that store stays inactive.
//!
//! The active record's `old_map` names the slot's free block. After a
//! completed write that is the block the written LBA used to map to.
//!
//! # Invariants
//!
//! - The two sequence numbers of a loaded slot differ and are at most 3
//! - At most one of them is 0, and the active one never is
//! - Both `lba` fields are below the arena's external block count
//! - The active record's post-map LBAs are below the internal block count

use crate::btt::error::BttError;
use crate::btt::map::MapEntry;

/// Size of one flog record on media.
pub const FLOG_RECORD_SIZE: usize = 16;

/// Bytes of a record written before its sequence number.
pub const FLOG_RECORD_BODY_SIZE: usize = 12;

/// Size of one flog slot on media.
pub const FLOG_SLOT_SIZE: usize = 64;

/// Successor of a sequence number.
///
/// Sequence 0 only appears on a record that was never written; its
/// successor starts the cycle.
#[must_use]
pub const fn next_seq(seq: u32) -> u32 {
    match seq {
        1 => 2,
        2 => 3,
        _ => 1,
    }
}

/// One flog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlogRecord {
    /// Pre-map LBA being written.
    pub lba: u32,
    /// Map entry before the write.
    pub old_map: MapEntry,
    /// Map entry after the write.
    pub new_map: MapEntry,
    /// Sequence number, 0 if never written.
    pub seq: u32,
}

impl FlogRecord {
    /// Encode into the on-media layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; FLOG_RECORD_SIZE] {
        let mut bytes = [0u8; FLOG_RECORD_SIZE];
        bytes[0..4].copy_from_slice(&self.lba.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.old_map.raw().to_le_bytes());
        bytes[8..12].copy_from_slice(&self.new_map.raw().to_le_bytes());
        bytes[12..16].copy_from_slice(&self.seq.to_le_bytes());
        bytes
    }

    /// Decode from the on-media layout.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; FLOG_RECORD_SIZE]) -> Self {
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Self {
            lba: word(0),
            old_map: MapEntry::from_raw(word(4)),
            new_map: MapEntry::from_raw(word(8)),
            seq: word(12),
        }
    }
}

/// The in-memory state of one flog slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlogPair {
    records: [FlogRecord; 2],
    active: usize,
}

impl FlogPair {
    /// State of slot `slot` in a freshly formatted arena.
    ///
    /// Record 0 is active and owns free block `external_nlba + slot` with no
    /// write in flight. Record 1 is zeroed.
    #[must_use]
    pub const fn initial(slot: u32, external_nlba: u32) -> Self {
        let free = MapEntry::normal(external_nlba + slot);
        Self {
            records: [
                FlogRecord {
                    lba: slot,
                    old_map: free,
                    new_map: free,
                    seq: 1,
                },
                FlogRecord {
                    lba: 0,
                    old_map: MapEntry::from_raw(0),
                    new_map: MapEntry::from_raw(0),
                    seq: 0,
                },
            ],
            active: 0,
        }
    }

    /// Decode and validate one slot read from media.
    ///
    /// Fails with `BttError::InvalidParameter` when the slot violates any of
    /// the module invariants.
    pub fn from_bytes(
        bytes: &[u8; FLOG_SLOT_SIZE],
        external_nlba: u32,
        internal_nlba: u32,
    ) -> Result<Self, BttError> {
        let record = |index: usize| {
            let mut raw = [0u8; FLOG_RECORD_SIZE];
            raw.copy_from_slice(&bytes[index * FLOG_RECORD_SIZE..(index + 1) * FLOG_RECORD_SIZE]);
            FlogRecord::from_bytes(&raw)
        };
        let records = [record(0), record(1)];
        let (s0, s1) = (records[0].seq, records[1].seq);

        if s0 > 3 || s1 > 3 || s0 == s1 {
            return Err(BttError::InvalidParameter(format!(
                "invalid flog sequence pair ({s0}, {s1})"
            )));
        }

        let active = if s1 == 0 || (s0 != 0 && next_seq(s1) == s0) {
            0
        } else {
            1
        };

        for record in &records {
            if record.lba >= external_nlba {
                return Err(BttError::InvalidParameter(format!(
                    "flog lba {} beyond {external_nlba} external blocks",
                    record.lba
                )));
            }
        }

        let current = records[active];
        for entry in [current.old_map, current.new_map] {
            let post = entry.backing_block(current.lba);
            if post >= internal_nlba {
                return Err(BttError::InvalidParameter(format!(
                    "flog post-map lba {post} beyond {internal_nlba} internal blocks"
                )));
            }
        }

        Ok(Self { records, active })
    }

    /// Encode the whole slot, padding included.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; FLOG_SLOT_SIZE] {
        let mut bytes = [0u8; FLOG_SLOT_SIZE];
        for (index, record) in self.records.iter().enumerate() {
            bytes[index * FLOG_RECORD_SIZE..(index + 1) * FLOG_RECORD_SIZE]
                .copy_from_slice(&record.to_bytes());
        }
        bytes
    }

    /// The active record.
    #[must_use]
    pub const fn active(&self) -> &FlogRecord {
        &self.records[self.active]
    }

    /// Position (0 or 1) of the record the next write stages into.
    #[must_use]
    pub const fn inactive_index(&self) -> usize {
        1 - self.active
    }

    /// The internal block the next write lands in.
    #[must_use]
    pub const fn free_block(&self) -> u32 {
        let active = self.active();
        active.old_map.backing_block(active.lba)
    }

    /// Whether the active record describes a map update that may not have
    /// reached the map yet.
    #[must_use]
    pub fn needs_recovery(&self) -> bool {
        let active = self.active();
        active.old_map != active.new_map
    }

    /// Build the record the next write of `lba` stages.
    #[must_use]
    pub const fn next_record(&self, lba: u32, old_map: MapEntry, new_map: MapEntry) -> FlogRecord {
        FlogRecord {
            lba,
            old_map,
            new_map,
            seq: next_seq(self.active().seq),
        }
    }

    /// Install `record` as the active one once its sequence number is durable.
    pub fn commit(&mut self, record: FlogRecord) {
        let index = self.inactive_index();
        self.records[index] = record;
        self.active = index;
    }
}
