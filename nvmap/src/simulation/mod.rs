//! Deterministic simulation tests.
//!
//! Each workload drives a component with seeded random operations and checks
//! it against a simple in-memory model after every step:
//! - `crash`: power loss injected after every media write of a BTT block
//!   write, followed by a reload
//! - `btt_workload`: random block reads, writes and reloads against a map of
//!   expected block contents
//! - `paging_workload`: random map and unmap calls against a per-page model,
//!   compared with the parsed tree
//!
//! # Design Principles
//!
//! 1. All randomness is seeded, so a failing seed replays exactly
//! 2. Media faults are injected only through `MemoryMedia`
//! 3. Invariants are checked after every operation, not only at the end

mod btt_workload;
mod crash;
mod paging_workload;
