//! 128-bit identifiers for arenas and their parent namespace.

use rand::TryRngCore;

use crate::btt::error::BttError;

/// A UUID stored in the on-media byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Uuid([u8; 16]);

impl Uuid {
    /// The all-zero UUID.
    pub const NIL: Self = Self([0u8; 16]);

    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Generate a random (version 4, RFC 4122 variant) UUID.
    ///
    /// Fails with `BttError::Unsupported` when the entropy source fails.
    pub fn new_v4<R: TryRngCore + ?Sized>(rng: &mut R) -> Result<Self, BttError> {
        let mut bytes = [0u8; 16];
        rng.try_fill_bytes(&mut bytes)
            .map_err(|e| BttError::Unsupported(format!("entropy source failed: {e}")))?;

        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Ok(Self(bytes))
    }

    /// The version nibble.
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.0[6] >> 4
    }
}

impl std::fmt::Display for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, byte) in self.0.iter().enumerate() {
            if matches!(index, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
