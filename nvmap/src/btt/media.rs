//! Raw media abstraction for the BTT.
//!
//! The BTT never touches persistent memory directly. It issues byte-granular
//! reads and writes through `RawMedia`, which lets the same engine run over a
//! real file in production and a fault-injecting in-memory image in tests.
//!
//! # Design
//!
//! The implementing value plays the role of the opaque access context: any
//! state the accessor needs (a file handle, a mapping, a namespace handle)
//! lives in `self`.
//!
//! The BTT always issues offsets aligned to structure boundaries (info block
//! size, 64-byte cache lines for flog and map, the internal LBA size for data)
//! but implementations must not rely on it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Errors raised by a raw media accessor.
#[derive(Debug)]
pub enum MediaError {
    /// I/O error from the backing store.
    Io(std::io::Error),
    /// Access beyond the end of the media.
    OutOfBounds { offset: u64, len: u64, size: u64 },
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OutOfBounds { offset, len, size } => write!(
                f,
                "access of {len} bytes at offset {offset:#x} out of bounds (media size: {size:#x})"
            ),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for MediaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MediaError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Byte-addressable access to the region a BTT is laid out on.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read` returns the last written content for every byte
/// - a `write` that returned `Ok` survives until overwritten, once `flush`
///   has returned `Ok`
/// - accesses outside `[0, size())` fail with `MediaError::OutOfBounds`
pub trait RawMedia {
    /// Total size of the media in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` with the bytes starting at `offset`.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), MediaError>;

    /// Store `buf` at `offset`.
    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<(), MediaError>;

    /// Make all previous writes durable.
    ///
    /// Called after every ordered step of the atomic write protocol.
    fn flush(&mut self) -> Result<(), MediaError> {
        Ok(())
    }
}

/// Check that `[offset, offset + len)` lies within `size`.
pub(crate) fn check_bounds(offset: u64, len: usize, size: u64) -> Result<(), MediaError> {
    let len = len as u64;
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(MediaError::OutOfBounds { offset, len, size }),
    }
}

/// A BTT backing file of fixed size.
pub struct FileMedia {
    file: File,
    size: u64,
}

impl FileMedia {
    /// Create a new zero-filled backing file of `size` bytes.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, size: u64) -> Result<Self, MediaError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(size)?;
        file.sync_all()?;

        Ok(Self { file, size })
    }

    /// Open an existing backing file. The media size is the file length.
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl RawMedia for FileMedia {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), MediaError> {
        check_bounds(offset, buf.len(), self.size)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<(), MediaError> {
        check_bounds(offset, buf.len(), self.size)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        self.file.sync_data()?;
        Ok(())
    }
}
