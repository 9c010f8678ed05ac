//! Arena info block structure and serialization.
//!
//! Every arena starts with an info block and ends with a byte-identical
//! backup copy. Both are sealed with a Fletcher-64 checksum computed with the
//! checksum field zeroed.

// INFO_BLOCK_SIZE is a compile-time constant that fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::btt::layout::{ArenaGeometry, BTT_ALIGNMENT, FLOG_PAIR_SIZE, INFO_BLOCK_SIZE, MAP_ENTRY_SIZE};
use crate::btt::uuid::Uuid;
use crate::checksum::{fletcher64_with_field_zeroed, seal_fletcher64, stored_checksum};

/// Signature identifying a BTT arena: "BTT_ARENA_INFO\0\0"
pub const SIGNATURE: [u8; 16] = *b"BTT_ARENA_INFO\0\0";

/// Supported format version.
pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 2;

/// Arena is in an error state and must not be written.
pub const FLAG_ERROR: u32 = 0x0000_0001;

/// Info block size in bytes.
const INFO_SIZE: usize = INFO_BLOCK_SIZE as usize;

/// Info block size as u32 for storage in the block itself.
const INFO_SIZE_U32: u32 = INFO_BLOCK_SIZE as u32;

/// Info block field offsets.
mod offsets {
    pub const SIGNATURE: usize = 0;
    pub const UUID: usize = 16;
    pub const PARENT_UUID: usize = 32;
    pub const FLAGS: usize = 48;
    pub const MAJOR: usize = 52;
    pub const MINOR: usize = 54;
    pub const EXTERNAL_LBA_SIZE: usize = 56;
    pub const EXTERNAL_NLBA: usize = 60;
    pub const INTERNAL_LBA_SIZE: usize = 64;
    pub const INTERNAL_NLBA: usize = 68;
    pub const NFREE: usize = 72;
    pub const INFO_SIZE: usize = 76;
    pub const NEXT_OFF: usize = 80;
    pub const DATA_OFF: usize = 88;
    pub const MAP_OFF: usize = 96;
    pub const FLOG_OFF: usize = 104;
    pub const INFO_OFF: usize = 112;
    // 120-4087: unused
    pub const CHECKSUM: usize = 4088;
}

/// Raw bytes of one info block.
pub type InfoBlockBytes = [u8; INFO_SIZE];

/// The arena info block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InfoBlock {
    /// Identity of this arena.
    pub uuid: Uuid,
    /// Identity of the namespace the BTT lives in.
    pub parent_uuid: Uuid,
    /// Arena flags (`FLAG_ERROR`).
    pub flags: u32,
    pub major: u16,
    pub minor: u16,
    /// Block size visible to callers.
    pub external_lba_size: u32,
    /// Number of caller-addressable blocks.
    pub external_nlba: u32,
    /// Block size used in the data area.
    pub internal_lba_size: u32,
    /// Number of blocks in the data area.
    pub internal_nlba: u32,
    /// Number of free blocks (flog slots).
    pub nfree: u32,
    /// Size of this structure.
    pub info_size: u32,
    /// Offset of the next arena relative to this one, or 0 for the last arena.
    pub next_off: u64,
    pub data_off: u64,
    pub map_off: u64,
    pub flog_off: u64,
    /// Offset of the backup info block.
    pub info_off: u64,
}

/// What a loaded info block must agree with.
#[derive(Debug, Clone, Copy)]
pub struct InfoExpectations {
    pub parent_uuid: Uuid,
    pub external_lba_size: u32,
    pub internal_lba_size: u32,
    /// Size of the arena slot the block was read from.
    pub arena_size: u64,
    /// Whether another arena follows this one.
    pub has_next: bool,
}

impl InfoBlock {
    /// Create the info block for a freshly formatted arena.
    #[must_use]
    pub const fn new(
        uuid: Uuid,
        parent_uuid: Uuid,
        external_lba_size: u32,
        internal_lba_size: u32,
        geometry: &ArenaGeometry,
        next_off: u64,
    ) -> Self {
        Self {
            uuid,
            parent_uuid,
            flags: 0,
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            external_lba_size,
            external_nlba: geometry.external_nlba,
            internal_lba_size,
            internal_nlba: geometry.internal_nlba,
            nfree: geometry.nfree,
            info_size: INFO_SIZE_U32,
            next_off,
            data_off: geometry.data_off,
            map_off: geometry.map_off,
            flog_off: geometry.flog_off,
            info_off: geometry.info_off,
        }
    }

    /// Serialize and seal the info block.
    #[must_use]
    pub fn to_bytes(&self) -> Box<InfoBlockBytes> {
        let mut bytes = Box::new([0u8; INFO_SIZE]);

        write_bytes(&mut bytes[..], offsets::SIGNATURE, &SIGNATURE);
        write_bytes(&mut bytes[..], offsets::UUID, self.uuid.as_bytes());
        write_bytes(&mut bytes[..], offsets::PARENT_UUID, self.parent_uuid.as_bytes());
        write_bytes(&mut bytes[..], offsets::FLAGS, &self.flags.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::MAJOR, &self.major.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::MINOR, &self.minor.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::EXTERNAL_LBA_SIZE, &self.external_lba_size.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::EXTERNAL_NLBA, &self.external_nlba.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::INTERNAL_LBA_SIZE, &self.internal_lba_size.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::INTERNAL_NLBA, &self.internal_nlba.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::NFREE, &self.nfree.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::INFO_SIZE, &self.info_size.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::NEXT_OFF, &self.next_off.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::DATA_OFF, &self.data_off.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::MAP_OFF, &self.map_off.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::FLOG_OFF, &self.flog_off.to_le_bytes());
        write_bytes(&mut bytes[..], offsets::INFO_OFF, &self.info_off.to_le_bytes());

        seal_fletcher64(&mut bytes[..], offsets::CHECKSUM);
        bytes
    }

    /// Deserialize an info block, checking signature, checksum and version.
    ///
    /// Cross-field validation against the caller's expectations is a
    /// separate step (`validate`).
    pub fn from_bytes(bytes: &InfoBlockBytes) -> Result<Self, InfoBlockError> {
        if bytes[offsets::SIGNATURE..offsets::SIGNATURE + 16] != SIGNATURE {
            return Err(InfoBlockError::InvalidSignature);
        }

        let stored = stored_checksum(bytes, offsets::CHECKSUM);
        let computed = fletcher64_with_field_zeroed(bytes, offsets::CHECKSUM);
        if stored != computed {
            return Err(InfoBlockError::ChecksumMismatch { stored, computed });
        }

        let major = read_u16(bytes, offsets::MAJOR);
        let minor = read_u16(bytes, offsets::MINOR);
        if major != MAJOR_VERSION || minor != MINOR_VERSION {
            return Err(InfoBlockError::UnsupportedVersion { major, minor });
        }

        let info_size = read_u32(bytes, offsets::INFO_SIZE);
        if info_size != INFO_SIZE_U32 {
            return Err(InfoBlockError::FieldMismatch {
                field: "info_size",
                detail: format!("{info_size} != {INFO_SIZE_U32}"),
            });
        }

        Ok(Self {
            uuid: Uuid::from_bytes(read_uuid(bytes, offsets::UUID)),
            parent_uuid: Uuid::from_bytes(read_uuid(bytes, offsets::PARENT_UUID)),
            flags: read_u32(bytes, offsets::FLAGS),
            major,
            minor,
            external_lba_size: read_u32(bytes, offsets::EXTERNAL_LBA_SIZE),
            external_nlba: read_u32(bytes, offsets::EXTERNAL_NLBA),
            internal_lba_size: read_u32(bytes, offsets::INTERNAL_LBA_SIZE),
            internal_nlba: read_u32(bytes, offsets::INTERNAL_NLBA),
            nfree: read_u32(bytes, offsets::NFREE),
            info_size,
            next_off: read_u64(bytes, offsets::NEXT_OFF),
            data_off: read_u64(bytes, offsets::DATA_OFF),
            map_off: read_u64(bytes, offsets::MAP_OFF),
            flog_off: read_u64(bytes, offsets::FLOG_OFF),
            info_off: read_u64(bytes, offsets::INFO_OFF),
        })
    }

    /// Check every field against the expectations of the BTT being loaded.
    pub fn validate(&self, expected: &InfoExpectations) -> Result<(), InfoBlockError> {
        let mismatch = |field: &'static str, detail: String| {
            Err(InfoBlockError::FieldMismatch { field, detail })
        };

        if self.parent_uuid != expected.parent_uuid {
            return mismatch(
                "parent_uuid",
                format!("{} != {}", self.parent_uuid, expected.parent_uuid),
            );
        }
        if self.external_lba_size != expected.external_lba_size {
            return mismatch(
                "external_lba_size",
                format!("{} != {}", self.external_lba_size, expected.external_lba_size),
            );
        }
        if self.internal_lba_size != expected.internal_lba_size {
            return mismatch(
                "internal_lba_size",
                format!("{} != {}", self.internal_lba_size, expected.internal_lba_size),
            );
        }
        if self.nfree == 0 {
            return mismatch("nfree", "must be at least 1".to_string());
        }
        if u64::from(self.internal_nlba) != u64::from(self.external_nlba) + u64::from(self.nfree) {
            return mismatch(
                "internal_nlba",
                format!(
                    "{} != external_nlba {} + nfree {}",
                    self.internal_nlba, self.external_nlba, self.nfree
                ),
            );
        }

        let size = expected.arena_size;
        if self.info_off != size - INFO_BLOCK_SIZE {
            return mismatch("info_off", format!("{:#x} for arena size {size:#x}", self.info_off));
        }
        let expected_next = if expected.has_next { size } else { 0 };
        if self.next_off != expected_next {
            return mismatch("next_off", format!("{:#x} != {expected_next:#x}", self.next_off));
        }

        let ordered = INFO_BLOCK_SIZE <= self.flog_off
            && self.flog_off < self.map_off
            && self.map_off < self.data_off
            && self.data_off < self.info_off;
        let aligned = [self.flog_off, self.map_off, self.data_off, self.info_off]
            .iter()
            .all(|off| off % BTT_ALIGNMENT == 0);
        if !ordered || !aligned {
            return mismatch(
                "offsets",
                format!(
                    "flog {:#x} map {:#x} data {:#x} info {:#x}",
                    self.flog_off, self.map_off, self.data_off, self.info_off
                ),
            );
        }

        let flog_end = self.flog_off + u64::from(self.nfree) * FLOG_PAIR_SIZE;
        let map_end = self.map_off + u64::from(self.external_nlba) * MAP_ENTRY_SIZE;
        let data_end = u64::from(self.internal_nlba)
            .checked_mul(u64::from(self.internal_lba_size))
            .and_then(|len| len.checked_add(self.data_off));
        if flog_end > self.map_off {
            return mismatch("flog_off", format!("flog ends at {flog_end:#x}"));
        }
        if map_end > self.data_off {
            return mismatch("map_off", format!("map ends at {map_end:#x}"));
        }
        if data_end.is_none_or(|end| end > self.info_off) {
            return mismatch("data_off", format!("data area overruns {:#x}", self.info_off));
        }

        Ok(())
    }

    /// Whether the arena is flagged as failed.
    #[must_use]
    pub const fn has_error_flag(&self) -> bool {
        self.flags & FLAG_ERROR != 0
    }
}

fn write_bytes(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_uuid(buf: &[u8], offset: usize) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&buf[offset..offset + 16]);
    bytes
}

/// Reasons an info block is rejected.
#[derive(Debug)]
pub enum InfoBlockError {
    /// Signature bytes do not match.
    InvalidSignature,
    /// Stored checksum does not match the contents.
    ChecksumMismatch { stored: u64, computed: u64 },
    /// Unsupported format version.
    UnsupportedVersion { major: u16, minor: u16 },
    /// A field disagrees with the layout or with the caller's expectations.
    FieldMismatch { field: &'static str, detail: String },
}

impl std::fmt::Display for InfoBlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSignature => write!(f, "invalid info block signature"),
            Self::ChecksumMismatch { stored, computed } => {
                write!(f, "checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")
            }
            Self::UnsupportedVersion { major, minor } => {
                write!(f, "unsupported format version: {major}.{minor}")
            }
            Self::FieldMismatch { field, detail } => write!(f, "invalid {field}: {detail}"),
        }
    }
}

impl std::error::Error for InfoBlockError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btt::layout::{ArenaGeometry, internal_lba_size};
    use crate::checksum::is_fletcher64_valid;

    const ARENA_SIZE: u64 = 16 << 20;

    fn parent() -> Uuid {
        Uuid::from_bytes([7u8; 16])
    }

    fn sample() -> InfoBlock {
        let geometry = ArenaGeometry::compute(ARENA_SIZE, 4, 512).expect("geometry");
        InfoBlock::new(Uuid::from_bytes([1u8; 16]), parent(), 512, 512, &geometry, 0)
    }

    fn expectations() -> InfoExpectations {
        InfoExpectations {
            parent_uuid: parent(),
            external_lba_size: 512,
            internal_lba_size: internal_lba_size(512),
            arena_size: ARENA_SIZE,
            has_next: false,
        }
    }

    #[test]
    fn test_info_block_roundtrip() {
        let info = sample();
        let bytes = info.to_bytes();

        assert_eq!(&bytes[..16], b"BTT_ARENA_INFO\0\0");
        assert!(is_fletcher64_valid(&bytes[..], offsets::CHECKSUM));

        let restored = InfoBlock::from_bytes(&bytes).expect("should parse");
        assert_eq!(restored, info);
        restored.validate(&expectations()).expect("should validate");
    }

    #[test]
    fn test_info_block_invalid_signature() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            InfoBlock::from_bytes(&bytes),
            Err(InfoBlockError::InvalidSignature)
        ));
    }

    #[test]
    fn test_info_block_checksum_mismatch() {
        let mut bytes = sample().to_bytes();
        bytes[offsets::EXTERNAL_NLBA] ^= 1;
        assert!(matches!(
            InfoBlock::from_bytes(&bytes),
            Err(InfoBlockError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_info_block_unsupported_version() {
        let mut info = sample();
        info.minor = 1;
        assert!(matches!(
            InfoBlock::from_bytes(&info.to_bytes()),
            Err(InfoBlockError::UnsupportedVersion { major: 1, minor: 1 })
        ));
    }

    #[test]
    fn test_validate_rejects_foreign_parent() {
        let mut expected = expectations();
        expected.parent_uuid = Uuid::from_bytes([8u8; 16]);
        let error = sample().validate(&expected).expect_err("foreign parent");
        assert!(matches!(error, InfoBlockError::FieldMismatch { field: "parent_uuid", .. }));
    }

    #[test]
    fn test_validate_rejects_lba_size_mismatch() {
        let mut expected = expectations();
        expected.external_lba_size = 4096;
        assert!(sample().validate(&expected).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_next_off() {
        let mut expected = expectations();
        expected.has_next = true;
        let error = sample().validate(&expected).expect_err("chain mismatch");
        assert!(matches!(error, InfoBlockError::FieldMismatch { field: "next_off", .. }));
    }

    #[test]
    fn test_validate_rejects_unordered_offsets() {
        let mut info = sample();
        std::mem::swap(&mut info.flog_off, &mut info.map_off);
        let error = info.validate(&expectations()).expect_err("unordered");
        assert!(matches!(error, InfoBlockError::FieldMismatch { field: "offsets", .. }));
    }

    #[test]
    fn test_validate_rejects_inconsistent_counts() {
        let mut info = sample();
        info.external_nlba += 1;
        assert!(info.validate(&expectations()).is_err());
    }
}
