//! Shared helpers for unit and simulation tests.

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::btt::{Btt, MemoryMedia, Uuid};

/// One mebibyte.
pub const MIB: u64 = 1 << 20;

/// Route `tracing` output through the test harness.
///
/// `RUST_LOG` selects what is shown, defaulting to warnings from this crate.
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nvmap=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Parent identity used by tests that do not care about it.
#[must_use]
pub fn test_parent_uuid() -> Uuid {
    Uuid::from_bytes(*b"nvmap-test-paren")
}

/// A deterministic random source.
#[must_use]
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// A freshly initialized single-arena BTT of `size` bytes with 512-byte
/// blocks and four free blocks.
pub fn new_test_btt(size: u64) -> Btt<MemoryMedia> {
    init_test_logging();
    Btt::initialize_with_rng(
        MemoryMedia::new(size),
        test_parent_uuid(),
        4,
        512,
        size,
        &mut seeded_rng(size),
    )
    .expect("initialize test BTT")
}
