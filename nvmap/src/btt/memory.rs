//! Sparse in-memory media with fault injection.
//!
//! Bytes are stored in 4 KiB pages inside a `HashMap`, so a multi-gigabyte
//! image costs only what has actually been written. Unwritten bytes read as
//! zero and all-zero writes to unbacked pages are not materialised.
//!
//! Faults follow a deterministic, seeded model:
//! - Read and write error rates, rolled per access
//! - A write budget: after that many successful writes every further write
//!   fails, which is how a power loss between two ordered media writes is
//!   simulated
//!
//! `reboot()` keeps the surviving image and drops the fault configuration,
//! standing in for "power comes back, mount again".

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::btt::media::{MediaError, RawMedia, check_bounds};

/// Granularity of the sparse page store.
const PAGE_SIZE: usize = 4096;

/// Page size as u64 for offset calculations.
const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Number of writes that succeed before every further write fails.
    pub write_budget: Option<u64>,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Fail every write after the first `writes` have landed.
    #[must_use]
    pub fn power_loss_after(writes: u64) -> Self {
        Self {
            write_budget: Some(writes),
            ..Self::default()
        }
    }
}

/// Statistics about media operations.
#[derive(Debug, Default, Clone)]
pub struct MemoryMediaStats {
    /// Number of read calls.
    pub reads: u64,
    /// Number of write calls that landed.
    pub writes: u64,
    /// Number of flush calls.
    pub flushes: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected write errors (including power loss).
    pub injected_write_errors: u64,
}

/// In-memory `RawMedia` implementation for tests and simulation.
///
/// # Thread Safety
///
/// Not thread-safe. The BTT drives its media from one caller at a time.
pub struct MemoryMedia {
    /// Written pages keyed by page index.
    pages: HashMap<u64, Box<[u8; PAGE_SIZE]>>,
    /// Media size in bytes.
    size: u64,
    /// Fault injection configuration.
    fault_config: FaultConfig,
    /// Random number generator for fault injection.
    rng: StdRng,
    /// Set once the write budget is exhausted; every later write fails.
    powered_off: bool,
    stats: MemoryMediaStats,
}

impl MemoryMedia {
    /// Create an all-zero media of `size` bytes with no faults.
    #[must_use]
    pub fn new(size: u64) -> Self {
        Self::with_config(size, 0, FaultConfig::default())
    }

    /// Create an all-zero media with custom fault configuration.
    ///
    /// The seed makes fault injection deterministic.
    #[must_use]
    pub fn with_config(size: u64, seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            pages: HashMap::new(),
            size,
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            powered_off: false,
            stats: MemoryMediaStats::default(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &MemoryMediaStats {
        &self.stats
    }

    /// Replace the fault configuration. Resets the write budget counter.
    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
        self.powered_off = false;
        self.stats = MemoryMediaStats::default();
    }

    /// Whether the write budget has been exhausted.
    #[must_use]
    pub const fn is_powered_off(&self) -> bool {
        self.powered_off
    }

    /// Keep the surviving image and drop all faults.
    #[must_use]
    pub fn reboot(mut self) -> Self {
        self.set_fault_config(FaultConfig::no_faults());
        self
    }

    /// Copy the image into a fault-free media.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        let mut copy = Self::new(self.size);
        copy.pages = self.pages.clone();
        copy
    }

    /// Compare two images byte for byte. Unbacked pages compare as zero.
    #[must_use]
    pub fn contents_eq(&self, other: &Self) -> bool {
        if self.size != other.size {
            return false;
        }
        let zero = [0u8; PAGE_SIZE];
        let page_eq = |index: &u64| {
            let a = self.pages.get(index).map_or(&zero, |p| &**p);
            let b = other.pages.get(index).map_or(&zero, |p| &**p);
            a == b
        };
        self.pages.keys().all(page_eq) && other.pages.keys().all(page_eq)
    }

    /// Flip one bit of the image, bypassing fault accounting.
    pub fn corrupt_bit(&mut self, offset: u64, bit: u8) {
        let page = self
            .pages
            .entry(offset / PAGE_SIZE_U64)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
        page[(offset % PAGE_SIZE_U64) as usize] ^= 1 << (bit % 8);
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    fn admit_write(&mut self) -> Result<(), MediaError> {
        if self.powered_off {
            self.stats.injected_write_errors += 1;
            return Err(MediaError::InjectedFault("simulated power loss".to_string()));
        }
        if let Some(budget) = self.fault_config.write_budget {
            if self.stats.writes >= budget {
                self.powered_off = true;
                self.stats.injected_write_errors += 1;
                return Err(MediaError::InjectedFault("simulated power loss".to_string()));
            }
        }
        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(MediaError::InjectedFault("simulated write error".to_string()));
        }
        Ok(())
    }
}

// Offsets within a page always fit in usize.
#[allow(clippy::cast_possible_truncation)]
impl RawMedia for MemoryMedia {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), MediaError> {
        self.stats.reads += 1;
        check_bounds(offset, buf.len(), self.size)?;

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(MediaError::InjectedFault("simulated read error".to_string()));
        }

        let mut done = 0usize;
        while done < buf.len() {
            let position = offset + done as u64;
            let in_page = (position % PAGE_SIZE_U64) as usize;
            let chunk = (PAGE_SIZE - in_page).min(buf.len() - done);
            let target = &mut buf[done..done + chunk];
            match self.pages.get(&(position / PAGE_SIZE_U64)) {
                Some(page) => target.copy_from_slice(&page[in_page..in_page + chunk]),
                None => target.fill(0),
            }
            done += chunk;
        }
        Ok(())
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<(), MediaError> {
        check_bounds(offset, buf.len(), self.size)?;
        self.admit_write()?;
        self.stats.writes += 1;

        let mut done = 0usize;
        while done < buf.len() {
            let position = offset + done as u64;
            let in_page = (position % PAGE_SIZE_U64) as usize;
            let chunk = (PAGE_SIZE - in_page).min(buf.len() - done);
            let source = &buf[done..done + chunk];
            let index = position / PAGE_SIZE_U64;

            if let Some(page) = self.pages.get_mut(&index) {
                page[in_page..in_page + chunk].copy_from_slice(source);
            } else if source.iter().any(|&b| b != 0) {
                let mut page = Box::new([0u8; PAGE_SIZE]);
                page[in_page..in_page + chunk].copy_from_slice(source);
                self.pages.insert(index, page);
            }
            done += chunk;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        self.stats.flushes += 1;
        Ok(())
    }
}
