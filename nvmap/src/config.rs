//! BTT format configuration.
//!
//! Provides the parameters used when formatting a fresh BTT, loaded from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `NVMAP_BTT_NFREE`: Number of free blocks (flog slots) per arena (default: `256`)
//! - `NVMAP_BTT_LBA_SIZE`: External (caller-visible) block size in bytes (default: `512`)
//!
//! # Invariants
//!
//! - `nfree` is always at least 1
//! - `external_lba_size` is always at least 1

/// Parameters for formatting a BTT.
///
/// # Post-conditions
///
/// When constructed via `from_env()` or `from_lookup()`:
/// - `nfree >= 1`
/// - `external_lba_size >= 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BttConfig {
    /// Free blocks reserved per arena. One flog slot exists per free block.
    pub nfree: u32,
    /// Block size exposed to callers of `Btt::read`/`Btt::write`.
    pub external_lba_size: u32,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl BttConfig {
    /// Default number of free blocks per arena.
    pub const DEFAULT_NFREE: u32 = 256;
    /// Default external block size.
    pub const DEFAULT_EXTERNAL_LBA_SIZE: u32 = 512;

    const NFREE_VAR: &'static str = "NVMAP_BTT_NFREE";
    const LBA_SIZE_VAR: &'static str = "NVMAP_BTT_LBA_SIZE";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset variables fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let nfree = Self::load_positive(&lookup, Self::NFREE_VAR, Self::DEFAULT_NFREE)?;
        let external_lba_size =
            Self::load_positive(&lookup, Self::LBA_SIZE_VAR, Self::DEFAULT_EXTERNAL_LBA_SIZE)?;

        Ok(Self {
            nfree,
            external_lba_size,
        })
    }

    fn load_positive<F>(lookup: &F, name: &str, default: u32) -> Result<u32, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(value) = lookup(name) else {
            return Ok(default);
        };

        match value.trim().parse::<u32>() {
            Ok(0) => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: "must be greater than zero".to_string(),
            }),
            Ok(parsed) => Ok(parsed),
            Err(_) => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{value}' is not a positive integer"),
            }),
        }
    }
}

impl Default for BttConfig {
    fn default() -> Self {
        Self {
            nfree: Self::DEFAULT_NFREE,
            external_lba_size: Self::DEFAULT_EXTERNAL_LBA_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = BttConfig::from_lookup(lookup_from(&[])).expect("defaults");
        assert_eq!(config, BttConfig::default());
        assert_eq!(config.nfree, 256);
        assert_eq!(config.external_lba_size, 512);
    }

    #[test]
    fn test_values_from_lookup() {
        let config = BttConfig::from_lookup(lookup_from(&[
            ("NVMAP_BTT_NFREE", "4"),
            ("NVMAP_BTT_LBA_SIZE", " 4096 "),
        ]))
        .expect("parse");
        assert_eq!(config.nfree, 4);
        assert_eq!(config.external_lba_size, 4096);
    }

    #[test]
    fn test_zero_rejected() {
        let error = BttConfig::from_lookup(lookup_from(&[("NVMAP_BTT_NFREE", "0")]))
            .expect_err("zero nfree");
        assert_eq!(
            error.to_string(),
            "invalid value for NVMAP_BTT_NFREE: must be greater than zero"
        );
    }

    #[test]
    fn test_garbage_rejected() {
        let error = BttConfig::from_lookup(lookup_from(&[("NVMAP_BTT_LBA_SIZE", "big")]))
            .expect_err("garbage size");
        assert!(matches!(error, ConfigError::InvalidValue { ref name, .. } if name == "NVMAP_BTT_LBA_SIZE"));
    }
}
