//! Errors surfaced by the BTT engine.

use std::collections::TryReserveError;

use crate::btt::media::MediaError;

/// Errors that can occur during BTT operations.
///
/// A flog that fails to load is not an error at this level: the arena is
/// degraded to read-only and the rest of the BTT stays usable.
#[derive(Debug)]
pub enum BttError {
    /// Malformed structure, out-of-range address, or a field that does not
    /// match what the caller expects.
    InvalidParameter(String),
    /// Allocation of arena or flog state failed.
    OutOfResources,
    /// Read of an error-tagged block, or write to a read-only arena.
    Aborted(String),
    /// A required facility (the entropy source) is unavailable.
    Unsupported(String),
    /// The raw media accessor failed. The operation in progress stopped at
    /// the failing step.
    Media(MediaError),
}

impl std::fmt::Display for BttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::OutOfResources => write!(f, "out of resources"),
            Self::Aborted(msg) => write!(f, "aborted: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::Media(e) => write!(f, "media error: {e}"),
        }
    }
}

impl std::error::Error for BttError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Media(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MediaError> for BttError {
    fn from(e: MediaError) -> Self {
        Self::Media(e)
    }
}

impl From<TryReserveError> for BttError {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfResources
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_btt_error_display() {
        let e = BttError::InvalidParameter("lba 10 beyond 5".to_string());
        assert_eq!(e.to_string(), "invalid parameter: lba 10 beyond 5");

        let e = BttError::Media(MediaError::InjectedFault("boom".to_string()));
        assert!(e.to_string().contains("boom"));
        assert!(e.source().is_some());
    }

    #[test]
    fn test_try_reserve_maps_to_out_of_resources() {
        let mut v: Vec<u64> = Vec::new();
        let error = v.try_reserve_exact(usize::MAX).expect_err("cannot reserve");
        assert!(matches!(BttError::from(error), BttError::OutOfResources));
    }
}
