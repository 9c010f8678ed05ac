//! Random map and unmap calls against a per-page model.

use std::collections::BTreeMap;

use rand::Rng;
use rand::rngs::StdRng;

use crate::paging::{MapAttribute, MapEntry, PAGE_SIZE, PageTable, PagingMode, SIZE_2M};
use crate::testing::{init_test_logging, seeded_rng};

/// Linear window the workload edits, in 4 KiB pages.
const WINDOW_PAGES: u64 = 64 * 512;

/// Physical window mappings point into, in 4 KiB pages.
const PHYSICAL_PAGES: u64 = 256 * 512;

struct Workload {
    rng: StdRng,
    table: PageTable,
    /// Linear page index to the effective attribute of that page, base
    /// included. Absent pages are unmapped.
    pages: BTreeMap<u64, MapAttribute>,
}

impl Workload {
    fn new(seed: u64, mode: PagingMode) -> Self {
        Self {
            rng: seeded_rng(seed),
            table: PageTable::new(mode).expect("supported mode"),
            pages: BTreeMap::new(),
        }
    }

    fn random_flags(&mut self) -> MapAttribute {
        MapAttribute::new()
            .with_present(true)
            .with_read_write(self.rng.random_bool(0.5))
            .with_user_supervisor(self.rng.random_bool(0.3))
            .with_nx(self.rng.random_bool(0.5))
    }

    /// A page-aligned range, half the time 2 MiB aligned so large leaves
    /// get built and split.
    fn random_range(&mut self) -> (u64, u64) {
        let large = self.rng.random_bool(0.5);
        let unit = if large { SIZE_2M / PAGE_SIZE } else { 1 };
        let max_units = if large { 4 } else { 1200 };

        let units = self.rng.random_range(1..=max_units);
        let start = self.rng.random_range(0..=(WINDOW_PAGES - units * unit) / unit) * unit;
        (start, units * unit)
    }

    fn random_physical(&mut self, pages: u64) -> u64 {
        let aligned = self.rng.random_bool(0.6);
        let unit = if aligned { SIZE_2M / PAGE_SIZE } else { 1 };
        self.rng.random_range(0..(PHYSICAL_PAGES - pages) / unit) * unit * PAGE_SIZE
    }

    fn step(&mut self) {
        let (first, count) = self.random_range();
        let linear = first * PAGE_SIZE;
        let length = count * PAGE_SIZE;

        if self.rng.random_bool(0.2) {
            self.table
                .map(linear, length, &MapAttribute::new(), &MapAttribute::ALL)
                .expect("unmap");
            for page in first..first + count {
                self.pages.remove(&page);
            }
            return;
        }

        if self.rng.random_bool(0.2) && !self.pages.is_empty() {
            // Attribute-only edit: addresses stay, only no-execute changes.
            let nx = self.rng.random_bool(0.5);
            let mask = MapAttribute::new().with_nx(true);
            self.table
                .map(linear, length, &MapAttribute::new().with_nx(nx), &mask)
                .expect("attribute edit");
            for (_, attribute) in self.pages.range_mut(first..first + count) {
                *attribute = attribute.with_nx(nx);
            }
            return;
        }

        let physical = self.random_physical(count);
        let attribute = self.random_flags().with_base(physical);
        self.table
            .map(linear, length, &attribute, &MapAttribute::ALL)
            .expect("map");
        for offset in 0..count {
            self.pages
                .insert(first + offset, attribute.with_base(physical + offset * PAGE_SIZE));
        }
    }

    /// The model compacted the same way the parser reports it.
    fn expected_entries(&self) -> Vec<MapEntry> {
        let mut entries: Vec<MapEntry> = Vec::new();
        for (&page, &attribute) in &self.pages {
            let linear_address = page * PAGE_SIZE;
            if let Some(last) = entries.last_mut() {
                if last.linear_address + last.length == linear_address
                    && last.attribute.base() + last.length == attribute.base()
                    && last.attribute.attributes() == attribute.attributes()
                {
                    last.length += PAGE_SIZE;
                    continue;
                }
            }
            entries.push(MapEntry {
                linear_address,
                length: PAGE_SIZE,
                attribute,
            });
        }
        entries
    }

    fn check(&self, step: usize) {
        let parsed = self.table.parse().expect("parse");
        assert_eq!(parsed, self.expected_entries(), "after step {step}");
    }

    fn run(mut self, steps: usize) {
        for step in 0..steps {
            self.step();
            self.check(step);
        }

        // Replaying the final state may collapse tables but never needs a
        // new one.
        let snapshot = self.expected_entries();
        let reserved = self.table.memory().reserved();
        for entry in &snapshot {
            let outcome = self
                .table
                .map(entry.linear_address, entry.length, &entry.attribute, &MapAttribute::ALL)
                .expect("replay");
            assert_eq!(outcome.pages_allocated, 0);
        }
        assert_eq!(self.table.memory().reserved(), reserved);
        assert_eq!(self.table.parse().expect("parse"), snapshot);
    }
}

#[test]
fn test_random_edits_match_model() {
    init_test_logging();
    for (seed, mode) in [
        (1, PagingMode::Paging4Level),
        (2, PagingMode::Paging4Level2M),
        (3, PagingMode::Paging4Level1G),
        (4, PagingMode::Paging5Level2M),
    ] {
        Workload::new(seed, mode).run(300);
    }
}
