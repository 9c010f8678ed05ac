//! Random block I/O against a model of expected block contents.

use std::collections::HashMap;

use rand::Rng;
use rand::rngs::StdRng;

use crate::btt::{Btt, FaultConfig, MemoryMedia};
use crate::testing::{MIB, init_test_logging, seeded_rng, test_parent_uuid};

const MEDIA_SIZE: u64 = 40 * MIB;
const ARENA_CAP: u64 = 16 * MIB;
const BLOCK_SIZE: usize = 512;

/// Outcome counters of one run.
#[derive(Debug, Default)]
struct WorkloadResult {
    writes: u64,
    failed_writes: u64,
    reads: u64,
    reloads: u64,
}

struct Workload {
    rng: StdRng,
    fault_config: FaultConfig,
    btt: Option<Btt<MemoryMedia>>,
    /// Expected contents of every block written so far; others read zero.
    expected: HashMap<u64, Vec<u8>>,
    result: WorkloadResult,
}

impl Workload {
    fn new(seed: u64, fault_config: FaultConfig) -> Self {
        let mut rng = seeded_rng(seed);
        let btt = Btt::initialize_in_arenas(
            MemoryMedia::new(MEDIA_SIZE),
            test_parent_uuid(),
            4,
            512,
            MEDIA_SIZE,
            &mut rng,
            ARENA_CAP,
        )
        .expect("initialize");
        assert!(btt.arenas().len() > 1);

        let mut workload = Self {
            rng,
            fault_config,
            btt: Some(btt),
            expected: HashMap::new(),
            result: WorkloadResult::default(),
        };
        workload.reload(false);
        workload
    }

    fn btt(&mut self) -> &mut Btt<MemoryMedia> {
        self.btt.as_mut().expect("btt is loaded")
    }

    /// Release and load again, optionally after a power cycle. Faults are
    /// re-armed once the load is done.
    fn reload(&mut self, power_cycle: bool) {
        let mut media = self.btt.take().expect("btt is loaded").release();
        if power_cycle {
            media = media.reboot();
        }
        let mut btt = Btt::load_in_arenas(media, test_parent_uuid(), MEDIA_SIZE, 512, ARENA_CAP)
            .expect("load");
        assert!(btt.arenas().iter().all(|arena| !arena.is_read_only()));

        let mut media = btt.release();
        media.set_fault_config(self.fault_config.clone());
        btt = Btt::load_in_arenas(media, test_parent_uuid(), MEDIA_SIZE, 512, ARENA_CAP)
            .expect("load with faults armed");
        self.btt = Some(btt);
        self.result.reloads += 1;
    }

    fn pick_lba(&mut self) -> u64 {
        let count = self.btt().block_count();
        if self.rng.random_bool(0.6) {
            self.rng.random_range(0..32)
        } else {
            self.rng.random_range(0..count)
        }
    }

    fn expected_block(&self, lba: u64) -> Vec<u8> {
        self.expected
            .get(&lba)
            .cloned()
            .unwrap_or_else(|| vec![0u8; BLOCK_SIZE])
    }

    fn read(&mut self, lba: u64) -> Vec<u8> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.btt().read(lba, &mut buf).expect("read");
        self.result.reads += 1;
        buf
    }

    fn step(&mut self) {
        let lba = self.pick_lba();
        match self.rng.random_range(0..10) {
            0..=4 => {
                let mut data = vec![0u8; BLOCK_SIZE];
                self.rng.fill(&mut data[..]);
                self.result.writes += 1;

                if self.btt().write(lba, &data).is_ok() {
                    self.expected.insert(lba, data);
                    return;
                }

                // Treat a failed write as a crash: power cycle, then the block
                // must hold exactly one of the two versions.
                self.result.failed_writes += 1;
                let old = self.expected_block(lba);
                self.reload(true);
                let found = self.read(lba);
                assert!(found == old || found == data, "lba {lba} torn after failed write");
                self.expected.insert(lba, found);
            }
            5..=8 => {
                let found = self.read(lba);
                assert_eq!(found, self.expected_block(lba), "lba {lba}");
            }
            _ => self.reload(false),
        }
    }

    fn verify_all(&mut self) {
        let lbas: Vec<u64> = self.expected.keys().copied().collect();
        for lba in lbas {
            let found = self.read(lba);
            assert_eq!(found, self.expected_block(lba), "lba {lba}");
        }
    }

    fn run(mut self, steps: usize) -> WorkloadResult {
        for _ in 0..steps {
            self.step();
        }
        self.reload(true);
        self.verify_all();
        self.result
    }
}

#[test]
fn test_random_workload_without_faults() {
    init_test_logging();
    for seed in [1, 2, 3] {
        let result = Workload::new(seed, FaultConfig::no_faults()).run(1500);
        assert_eq!(result.failed_writes, 0);
        assert!(result.writes > 0 && result.reads > 0 && result.reloads > 1);
    }
}

#[test]
fn test_random_workload_with_write_errors() {
    init_test_logging();
    let faults = FaultConfig {
        write_error_rate: 0.02,
        ..FaultConfig::default()
    };
    let mut failed = 0;
    for seed in [11, 12, 13] {
        let result = Workload::new(seed, faults.clone()).run(1500);
        failed += result.failed_writes;
    }
    assert!(failed > 0);
}
