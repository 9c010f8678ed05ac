//! One arena: format, load with recovery, and block I/O.
//!
//! # Design
//!
//! The arena keeps its info block and the decoded flog in memory. The map
//! and the data area stay on media; a map entry is always accessed through
//! the 64-byte cache line that holds it.
//!
//! Block writes follow this order, each step flushed before the next:
//!
//! 1. Write the data into the free block of flog slot 0
//! 2. Read the current map entry of the LBA
//! 3. Write lba, old map and new map of the inactive flog record
//! 4. Write the sequence number of that record, which makes it active
//! 5. Update the map entry
//!
//! A power loss before step 4 leaves the old mapping fully intact. A power
//! loss after it is completed by recovery at the next load, which replays
//! the active flog record of every slot onto the map.

// Offsets inside an arena are bounded by MAX_ARENA_SIZE and entry indices
// by the 64-byte cache line, so narrowing casts cannot truncate.
#![allow(clippy::cast_possible_truncation)]

use crate::btt::error::BttError;
use crate::btt::flog::{FLOG_RECORD_BODY_SIZE, FLOG_RECORD_SIZE, FLOG_SLOT_SIZE, FlogPair, FlogRecord};
use crate::btt::info_block::{FLAG_ERROR, InfoBlock, InfoBlockBytes, InfoExpectations};
use crate::btt::layout::{ArenaSpan, CACHE_LINE_SIZE, FLOG_PAIR_SIZE, INFO_BLOCK_SIZE, MAP_ENTRY_SIZE};
use crate::btt::map::{MapEntry, MapState};
use crate::btt::media::RawMedia;

/// Zero-fill chunk used while formatting the map.
const MAP_ZERO_CHUNK: usize = 64 * 1024;

/// Cache line size as usize for buffers.
const LINE: usize = CACHE_LINE_SIZE as usize;

/// One arena of a BTT.
#[derive(Debug)]
pub struct Arena {
    base: u64,
    size: u64,
    info: InfoBlock,
    flogs: Vec<FlogPair>,
    read_only: bool,
}

impl Arena {
    /// Lay out a fresh arena on media.
    ///
    /// Writes, in order: the zeroed map, the flog, the backup info block and
    /// finally the primary info block. Until the primary lands the arena does
    /// not load, so an interrupted format never yields a half-built arena.
    pub fn format<M: RawMedia>(
        media: &mut M,
        span: ArenaSpan,
        info: InfoBlock,
    ) -> Result<Self, BttError> {
        let map_len = info.data_off - info.map_off;
        let mut zeros = Vec::new();
        zeros.try_reserve_exact(MAP_ZERO_CHUNK)?;
        zeros.resize(MAP_ZERO_CHUNK, 0u8);

        let mut written = 0u64;
        while written < map_len {
            let chunk = (map_len - written).min(MAP_ZERO_CHUNK as u64) as usize;
            media.write(span.base + info.map_off + written, &zeros[..chunk])?;
            written += chunk as u64;
        }

        let mut flogs = Vec::new();
        flogs.try_reserve_exact(info.nfree as usize)?;
        let mut flog_bytes = Vec::new();
        flog_bytes.try_reserve_exact(info.nfree as usize * FLOG_SLOT_SIZE)?;
        for slot in 0..info.nfree {
            let pair = FlogPair::initial(slot, info.external_nlba);
            flog_bytes.extend_from_slice(&pair.to_bytes());
            flogs.push(pair);
        }
        media.write(span.base + info.flog_off, &flog_bytes)?;
        media.flush()?;

        let info_bytes = info.to_bytes();
        media.write(span.base + info.info_off, &info_bytes[..])?;
        media.flush()?;
        media.write(span.base, &info_bytes[..])?;
        media.flush()?;

        tracing::debug!(
            base = span.base,
            size = span.size,
            external_nlba = info.external_nlba,
            uuid = %info.uuid,
            "formatted arena"
        );

        Ok(Self {
            base: span.base,
            size: span.size,
            info,
            flogs,
            read_only: false,
        })
    }

    /// Load an arena from media.
    ///
    /// Falls back to the backup info block when the primary is invalid and
    /// rewrites the primary from it. An arena whose info block carries the
    /// error flag, or whose flog cannot be read or validated, loads read-only. Every
    /// other arena has its flog replayed onto the map.
    pub fn load<M: RawMedia>(
        media: &mut M,
        span: ArenaSpan,
        expected: &InfoExpectations,
    ) -> Result<Self, BttError> {
        let info = Self::load_info(media, span, expected)?;

        let mut arena = Self {
            base: span.base,
            size: span.size,
            info,
            flogs: Vec::new(),
            read_only: info.has_error_flag(),
        };

        if arena.read_only {
            tracing::warn!(base = span.base, "arena carries the error flag, loading read-only");
            return Ok(arena);
        }

        match arena.load_flog(media) {
            Ok(flogs) => arena.flogs = flogs,
            Err(e) => {
                tracing::warn!(base = span.base, "flog failed to load, arena is read-only: {e}");
                arena.info.flags |= FLAG_ERROR;
                arena.read_only = true;
                return Ok(arena);
            }
        }

        arena.recover(media)?;
        Ok(arena)
    }

    fn load_info<M: RawMedia>(
        media: &mut M,
        span: ArenaSpan,
        expected: &InfoExpectations,
    ) -> Result<InfoBlock, BttError> {
        let primary = Self::read_info(media, span.base, expected);
        let primary_error = match primary {
            Ok(info) => return Ok(info),
            Err(BttError::InvalidParameter(reason)) => reason,
            Err(e) => return Err(e),
        };

        let backup_offset = span.base + span.size - INFO_BLOCK_SIZE;
        tracing::warn!(
            base = span.base,
            reason = %primary_error,
            "primary info block invalid, trying backup"
        );

        let info = match Self::read_info(media, backup_offset, expected) {
            Ok(info) => info,
            Err(BttError::InvalidParameter(reason)) => {
                return Err(BttError::InvalidParameter(format!(
                    "arena at {:#x}: primary info block: {primary_error}; backup info block: {reason}",
                    span.base
                )));
            }
            Err(e) => return Err(e),
        };

        let repaired = media
            .write(span.base, &info.to_bytes()[..])
            .and_then(|()| media.flush());
        match repaired {
            Ok(()) => tracing::info!(base = span.base, "restored primary info block from backup"),
            Err(e) => tracing::warn!(base = span.base, "failed to restore primary info block: {e}"),
        }

        Ok(info)
    }

    fn read_info<M: RawMedia>(
        media: &mut M,
        offset: u64,
        expected: &InfoExpectations,
    ) -> Result<InfoBlock, BttError> {
        let mut bytes: Box<InfoBlockBytes> = Box::new([0u8; INFO_BLOCK_SIZE as usize]);
        media.read(offset, &mut bytes[..])?;

        let info = InfoBlock::from_bytes(&bytes)
            .map_err(|e| BttError::InvalidParameter(e.to_string()))?;
        info.validate(expected)
            .map_err(|e| BttError::InvalidParameter(e.to_string()))?;
        Ok(info)
    }

    fn load_flog<M: RawMedia>(&self, media: &mut M) -> Result<Vec<FlogPair>, BttError> {
        let nfree = self.info.nfree as usize;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(nfree * FLOG_SLOT_SIZE)?;
        bytes.resize(nfree * FLOG_SLOT_SIZE, 0u8);
        media.read(self.base + self.info.flog_off, &mut bytes)?;

        let mut flogs = Vec::new();
        flogs.try_reserve_exact(nfree)?;
        for (slot, chunk) in bytes.chunks_exact(FLOG_SLOT_SIZE).enumerate() {
            let mut raw = [0u8; FLOG_SLOT_SIZE];
            raw.copy_from_slice(chunk);
            let pair = FlogPair::from_bytes(&raw, self.info.external_nlba, self.info.internal_nlba)
                .map_err(|e| match e {
                    BttError::InvalidParameter(reason) => {
                        BttError::InvalidParameter(format!("flog slot {slot}: {reason}"))
                    }
                    other => other,
                })?;
            flogs.push(pair);
        }
        Ok(flogs)
    }

    /// Replay every slot's active flog record onto the map.
    ///
    /// Idempotent: a slot whose map entry no longer holds the record's old
    /// mapping is left alone.
    fn recover<M: RawMedia>(&self, media: &mut M) -> Result<(), BttError> {
        let mut replayed = 0u32;
        for pair in self.flogs.iter().filter(|pair| pair.needs_recovery()) {
            let record = *pair.active();
            let current = self.read_map_entry(media, record.lba)?.explicit(record.lba);
            if current == record.old_map {
                self.write_map_entry(media, record.lba, record.new_map)?;
                media.flush()?;
                replayed += 1;
            }
        }
        if replayed > 0 {
            tracing::info!(base = self.base, replayed, "replayed interrupted writes");
        }
        Ok(())
    }

    /// Byte offset of the cache line holding the map entry of `lba`, and the
    /// entry's position inside that line.
    const fn map_line(&self, lba: u32) -> (u64, usize) {
        let entry = self.base + self.info.map_off + lba as u64 * MAP_ENTRY_SIZE;
        let line = entry & !(CACHE_LINE_SIZE - 1);
        (line, (entry - line) as usize)
    }

    /// Read the map entry of `lba` through its cache line.
    pub fn read_map_entry<M: RawMedia>(&self, media: &mut M, lba: u32) -> Result<MapEntry, BttError> {
        let (line, at) = self.map_line(lba);
        let mut buf = [0u8; LINE];
        media.read(line, &mut buf)?;
        Ok(MapEntry::from_raw(u32::from_le_bytes([
            buf[at],
            buf[at + 1],
            buf[at + 2],
            buf[at + 3],
        ])))
    }

    /// Store the map entry of `lba` by rewriting its whole cache line.
    pub fn write_map_entry<M: RawMedia>(
        &self,
        media: &mut M,
        lba: u32,
        entry: MapEntry,
    ) -> Result<(), BttError> {
        let (line, at) = self.map_line(lba);
        let mut buf = [0u8; LINE];
        media.read(line, &mut buf)?;
        buf[at..at + 4].copy_from_slice(&entry.raw().to_le_bytes());
        media.write(line, &buf)?;
        Ok(())
    }

    const fn data_offset(&self, post_map_lba: u32) -> u64 {
        self.base + self.info.data_off + post_map_lba as u64 * self.info.internal_lba_size as u64
    }

    const fn flog_record_offset(&self, slot: u32, index: usize) -> u64 {
        self.base
            + self.info.flog_off
            + slot as u64 * FLOG_PAIR_SIZE
            + (index * FLOG_RECORD_SIZE) as u64
    }

    /// Read external block `lba` of this arena into `buf`.
    ///
    /// # Pre-conditions
    /// - `lba < external_nlba()`
    /// - `buf.len() == external_lba_size()`
    pub fn read<M: RawMedia>(&self, media: &mut M, lba: u32, buf: &mut [u8]) -> Result<(), BttError> {
        match self.read_map_entry(media, lba)?.state(lba) {
            MapState::Error => Err(BttError::Aborted(format!(
                "block {lba} of arena at {:#x} is marked bad",
                self.base
            ))),
            MapState::Zero => {
                buf.fill(0);
                Ok(())
            }
            MapState::Normal(post) => {
                if post >= self.info.internal_nlba {
                    return Err(BttError::InvalidParameter(format!(
                        "map entry of block {lba} points at {post}, beyond {} internal blocks",
                        self.info.internal_nlba
                    )));
                }
                media.read(self.data_offset(post), buf)?;
                Ok(())
            }
        }
    }

    /// Atomically replace external block `lba` of this arena with `buf`.
    ///
    /// # Pre-conditions
    /// - `lba < external_nlba()`
    /// - `buf.len() == external_lba_size()`
    ///
    /// # Post-conditions
    /// - On `Ok`, later reads of `lba` return `buf`, and the block that held
    ///   the previous contents becomes the free block of flog slot 0
    /// - On a media error, a load of the same media returns either the old or
    ///   the new contents of `lba`
    pub fn write<M: RawMedia>(&mut self, media: &mut M, lba: u32, buf: &[u8]) -> Result<(), BttError> {
        if self.read_only {
            return Err(BttError::Aborted(format!(
                "arena at {:#x} is read-only",
                self.base
            )));
        }

        let slot = 0u32;
        let free = self.flogs[0].free_block();
        media.write(self.data_offset(free), buf)?;
        media.flush()?;

        let old_map = self.read_map_entry(media, lba)?.explicit(lba);
        let record = self.flogs[0].next_record(lba, old_map, MapEntry::normal(free));
        let index = self.flogs[0].inactive_index();
        let record_offset = self.flog_record_offset(slot, index);
        let record_bytes = record.to_bytes();

        media.write(record_offset, &record_bytes[..FLOG_RECORD_BODY_SIZE])?;
        media.flush()?;

        if let Err(e) = self.commit(media, lba, record, record_offset, &record_bytes) {
            // The sequence store may or may not have landed, so the in-memory
            // flog can no longer be trusted to name a free block.
            tracing::warn!(base = self.base, lba, "write failed after flog update, arena is read-only: {e}");
            self.read_only = true;
            return Err(e);
        }

        tracing::trace!(base = self.base, lba, free, "wrote block");
        Ok(())
    }

    fn commit<M: RawMedia>(
        &mut self,
        media: &mut M,
        lba: u32,
        record: FlogRecord,
        record_offset: u64,
        record_bytes: &[u8; FLOG_RECORD_SIZE],
    ) -> Result<(), BttError> {
        media.write(
            record_offset + FLOG_RECORD_BODY_SIZE as u64,
            &record_bytes[FLOG_RECORD_BODY_SIZE..],
        )?;
        media.flush()?;
        self.flogs[0].commit(record);

        self.write_map_entry(media, lba, record.new_map)?;
        media.flush()?;
        Ok(())
    }

    /// Absolute byte offset of the arena.
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Arena size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub const fn info(&self) -> &InfoBlock {
        &self.info
    }

    #[must_use]
    pub const fn external_nlba(&self) -> u32 {
        self.info.external_nlba
    }

    #[must_use]
    pub const fn internal_nlba(&self) -> u32 {
        self.info.internal_nlba
    }

    #[must_use]
    pub const fn nfree(&self) -> u32 {
        self.info.nfree
    }

    #[must_use]
    pub const fn uuid(&self) -> crate::btt::uuid::Uuid {
        self.info.uuid
    }

    /// Whether writes are refused.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The decoded flog slots (empty for an arena loaded read-only).
    #[must_use]
    pub fn flogs(&self) -> &[FlogPair] {
        &self.flogs
    }
}
