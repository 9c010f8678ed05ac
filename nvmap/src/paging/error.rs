//! Errors surfaced by the page-table mapper and parser.

use crate::paging::PagingMode;

/// Errors that can occur while building or parsing page tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingError {
    /// The paging mode is not implemented.
    Unsupported(PagingMode),
    /// Misaligned or out-of-range address, length or buffer size, an
    /// incomplete mask for a new mapping, or a table outside page-table memory.
    InvalidParameter(&'static str),
    /// The scratch buffer (bytes) or output slice (entries) is too small.
    ///
    /// This is the expected outcome of a size query; retry with `required`.
    BufferTooSmall { required: u64 },
}

impl std::fmt::Display for PagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported(mode) => write!(f, "unsupported paging mode: {mode}"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::BufferTooSmall { required } => write!(f, "buffer too small, {required} required"),
        }
    }
}

impl std::error::Error for PagingError {}
