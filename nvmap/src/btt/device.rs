//! The BTT device: a chain of arenas behind one linear block address space.

use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::btt::arena::Arena;
use crate::btt::error::BttError;
use crate::btt::info_block::{InfoBlock, InfoExpectations};
use crate::btt::layout::{ArenaGeometry, MAX_ARENA_SIZE, internal_lba_size, plan_arenas};
use crate::btt::media::RawMedia;
use crate::btt::uuid::Uuid;
use crate::config::BttConfig;

/// A Block Translation Table laid out on `M`.
///
/// External block `lba` lives in the arena whose cumulative block range
/// covers it. Arenas are visited in media order.
///
/// # Thread Safety
///
/// Not thread-safe. Reads and writes take `&mut self`, so callers sharing a
/// BTT serialize access themselves.
pub struct Btt<M: RawMedia> {
    media: M,
    arenas: Vec<Arena>,
    parent_uuid: Uuid,
    external_lba_size: u32,
    internal_lba_size: u32,
}

impl<M: RawMedia> Btt<M> {
    /// Lay out a new BTT over the first `total_size` bytes of `media`.
    ///
    /// Arena identities come from the operating system's entropy source.
    pub fn initialize(
        media: M,
        parent_uuid: Uuid,
        nfree: u32,
        external_lba_size: u32,
        total_size: u64,
    ) -> Result<Self, BttError> {
        Self::initialize_with_rng(media, parent_uuid, nfree, external_lba_size, total_size, &mut OsRng)
    }

    /// `initialize` with the free-block count and block size from `config`.
    pub fn initialize_from_config(
        media: M,
        parent_uuid: Uuid,
        config: &BttConfig,
        total_size: u64,
    ) -> Result<Self, BttError> {
        Self::initialize(media, parent_uuid, config.nfree, config.external_lba_size, total_size)
    }

    /// `initialize` drawing arena identities from `rng`.
    ///
    /// Fails with `BttError::Unsupported` if `rng` fails.
    pub fn initialize_with_rng<R: TryRngCore + ?Sized>(
        media: M,
        parent_uuid: Uuid,
        nfree: u32,
        external_lba_size: u32,
        total_size: u64,
        rng: &mut R,
    ) -> Result<Self, BttError> {
        Self::initialize_in_arenas(
            media,
            parent_uuid,
            nfree,
            external_lba_size,
            total_size,
            rng,
            MAX_ARENA_SIZE,
        )
    }

    /// Initialization with an arena size cap, so tests can build
    /// multi-arena layouts on small media.
    pub(crate) fn initialize_in_arenas<R: TryRngCore + ?Sized>(
        mut media: M,
        parent_uuid: Uuid,
        nfree: u32,
        external_lba_size: u32,
        total_size: u64,
        rng: &mut R,
        max_arena_size: u64,
    ) -> Result<Self, BttError> {
        let internal_lba_size = check_lba_size(external_lba_size)?;
        check_media_size(&media, total_size)?;
        if nfree == 0 {
            return Err(BttError::InvalidParameter("nfree must be at least 1".to_string()));
        }

        // Everything that can fail without touching media happens first.
        let spans = plan_arenas(total_size, max_arena_size)?;
        let mut infos = Vec::new();
        infos.try_reserve_exact(spans.len())?;
        for (index, span) in spans.iter().enumerate() {
            let geometry = ArenaGeometry::compute(span.size, nfree, internal_lba_size)?;
            let uuid = Uuid::new_v4(rng)?;
            let next_off = if index + 1 < spans.len() { span.size } else { 0 };
            infos.push(InfoBlock::new(
                uuid,
                parent_uuid,
                external_lba_size,
                internal_lba_size,
                &geometry,
                next_off,
            ));
        }

        let mut arenas = Vec::new();
        arenas.try_reserve_exact(spans.len())?;
        for (span, info) in spans.into_iter().zip(infos) {
            arenas.push(Arena::format(&mut media, span, info)?);
        }

        let btt = Self {
            media,
            arenas,
            parent_uuid,
            external_lba_size,
            internal_lba_size,
        };
        tracing::info!(
            arenas = btt.arenas.len(),
            blocks = btt.block_count(),
            external_lba_size,
            "initialized BTT"
        );
        Ok(btt)
    }

    /// Load an existing BTT from the first `total_size` bytes of `media`.
    ///
    /// Every arena is validated against `parent_uuid` and
    /// `external_lba_size`, and interrupted writes are completed.
    pub fn load(
        media: M,
        parent_uuid: Uuid,
        total_size: u64,
        external_lba_size: u32,
    ) -> Result<Self, BttError> {
        Self::load_in_arenas(media, parent_uuid, total_size, external_lba_size, MAX_ARENA_SIZE)
    }

    /// Loading with an arena size cap; must match the cap used to initialize.
    pub(crate) fn load_in_arenas(
        mut media: M,
        parent_uuid: Uuid,
        total_size: u64,
        external_lba_size: u32,
        max_arena_size: u64,
    ) -> Result<Self, BttError> {
        let internal_lba_size = check_lba_size(external_lba_size)?;
        check_media_size(&media, total_size)?;

        let spans = plan_arenas(total_size, max_arena_size)?;
        let mut arenas = Vec::new();
        arenas.try_reserve_exact(spans.len())?;
        for (index, span) in spans.iter().enumerate() {
            let expected = InfoExpectations {
                parent_uuid,
                external_lba_size,
                internal_lba_size,
                arena_size: span.size,
                has_next: index + 1 < spans.len(),
            };
            arenas.push(Arena::load(&mut media, *span, &expected)?);
        }

        let btt = Self {
            media,
            arenas,
            parent_uuid,
            external_lba_size,
            internal_lba_size,
        };
        let read_only = btt.arenas.iter().filter(|a| a.is_read_only()).count();
        tracing::info!(
            arenas = btt.arenas.len(),
            read_only,
            blocks = btt.block_count(),
            "loaded BTT"
        );
        Ok(btt)
    }

    /// Find the arena holding external block `lba` and the block's index
    /// inside it.
    fn locate(&self, lba: u64, len: usize) -> Result<(usize, u32), BttError> {
        if len != self.external_lba_size as usize {
            return Err(BttError::InvalidParameter(format!(
                "buffer of {len} bytes does not match block size {}",
                self.external_lba_size
            )));
        }

        let mut start = 0u64;
        for (index, arena) in self.arenas.iter().enumerate() {
            let count = u64::from(arena.external_nlba());
            if lba < start + count {
                let offset = u32::try_from(lba - start).map_err(|_| {
                    BttError::InvalidParameter(format!("lba {lba} out of range"))
                })?;
                return Ok((index, offset));
            }
            start += count;
        }

        Err(BttError::InvalidParameter(format!(
            "lba {lba} beyond {start} blocks"
        )))
    }

    /// Read external block `lba` into `buf`.
    ///
    /// `buf` must be exactly one external block long.
    pub fn read(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), BttError> {
        let (index, offset) = self.locate(lba, buf.len())?;
        self.arenas[index].read(&mut self.media, offset, buf)
    }

    /// Atomically replace external block `lba` with `buf`.
    ///
    /// `buf` must be exactly one external block long. After a power loss at
    /// any point, the next load reads either the previous or the new content.
    pub fn write(&mut self, lba: u64, buf: &[u8]) -> Result<(), BttError> {
        let (index, offset) = self.locate(lba, buf.len())?;
        self.arenas[index].write(&mut self.media, offset, buf)
    }

    /// Give back the media.
    #[must_use]
    pub fn release(self) -> M {
        self.media
    }

    /// Borrow the media.
    #[must_use]
    pub const fn media(&self) -> &M {
        &self.media
    }

    /// Number of external blocks across all arenas.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.arenas.iter().map(|a| u64::from(a.external_nlba())).sum()
    }

    /// Usable capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.block_count() * u64::from(self.external_lba_size)
    }

    #[must_use]
    pub const fn external_lba_size(&self) -> u32 {
        self.external_lba_size
    }

    #[must_use]
    pub const fn internal_lba_size(&self) -> u32 {
        self.internal_lba_size
    }

    #[must_use]
    pub const fn parent_uuid(&self) -> Uuid {
        self.parent_uuid
    }

    #[must_use]
    pub fn arenas(&self) -> &[Arena] {
        &self.arenas
    }
}

fn check_lba_size(external_lba_size: u32) -> Result<u32, BttError> {
    let internal = internal_lba_size(external_lba_size);
    if external_lba_size == 0 || internal < external_lba_size {
        return Err(BttError::InvalidParameter(format!(
            "unsupported external block size {external_lba_size}"
        )));
    }
    Ok(internal)
}

fn check_media_size<M: RawMedia>(media: &M, total_size: u64) -> Result<(), BttError> {
    if total_size > media.size() {
        return Err(BttError::InvalidParameter(format!(
            "total size {total_size:#x} exceeds media size {:#x}",
            media.size()
        )));
    }
    Ok(())
}
