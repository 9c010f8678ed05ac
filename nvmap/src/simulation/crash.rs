//! Power loss at every media write of a block write.
//!
//! A block write lands as four ordered media writes: the data block, the flog
//! record body, the flog sequence number and the map entry. The sweep cuts
//! power after each prefix, reboots and checks that a load sees either the
//! old or the new block, never a mix, and that other blocks are untouched.

use crate::btt::{Btt, BttError, FaultConfig, MemoryMedia};
use crate::testing::{MIB, init_test_logging, new_test_btt, test_parent_uuid};

const MEDIA_SIZE: u64 = 16 * MIB;

/// Media writes issued by one block write.
const WRITES_PER_BLOCK: u64 = 4;

fn load(media: MemoryMedia) -> Btt<MemoryMedia> {
    Btt::load(media, test_parent_uuid(), MEDIA_SIZE, 512).expect("load after power loss")
}

fn read_block(btt: &mut Btt<MemoryMedia>, lba: u64) -> [u8; 512] {
    let mut buf = [0u8; 512];
    btt.read(lba, &mut buf).expect("read");
    buf
}

/// A BTT with a few written blocks, released to its media.
fn prepared_media() -> MemoryMedia {
    let mut btt = new_test_btt(MEDIA_SIZE);
    for (lba, fill) in [(0u64, 0x11u8), (1, 0x22), (7, 0x77)] {
        btt.write(lba, &[fill; 512]).expect("seed write");
    }
    btt.release()
}

/// Cut power after `budget` media writes of a write of `new` to `lba`.
/// Returns the rebooted media and whether the write reported success.
fn crash_write(budget: u64, lba: u64, new: &[u8; 512]) -> (MemoryMedia, bool) {
    let mut media = prepared_media();
    media.set_fault_config(FaultConfig::power_loss_after(budget));

    let mut btt = load(media);
    let result = btt.write(lba, new);
    let media = btt.release();
    assert_eq!(media.is_powered_off(), result.is_err());
    (media.reboot(), result.is_ok())
}

#[test]
fn test_every_crash_point_is_atomic() {
    init_test_logging();
    let new = [0xA5u8; 512];

    for budget in 0..=WRITES_PER_BLOCK {
        let (media, completed) = crash_write(budget, 1, &new);
        assert_eq!(completed, budget == WRITES_PER_BLOCK, "budget {budget}");

        let mut btt = load(media);
        let block = read_block(&mut btt, 1);
        // The sequence number store is the commit point.
        let expected = if budget >= 3 { new } else { [0x22; 512] };
        assert_eq!(block, expected, "budget {budget}");

        assert_eq!(read_block(&mut btt, 0), [0x11; 512], "budget {budget}");
        assert_eq!(read_block(&mut btt, 7), [0x77; 512], "budget {budget}");
        assert_eq!(read_block(&mut btt, 2), [0u8; 512], "budget {budget}");
    }
}

#[test]
fn test_recovery_is_idempotent() {
    init_test_logging();
    for budget in 0..=WRITES_PER_BLOCK {
        let (media, _) = crash_write(budget, 7, &[0x5Au8; 512]);

        let once = load(media).release();
        let snapshot = once.snapshot();
        let twice = load(once).release();
        assert!(twice.contents_eq(&snapshot), "budget {budget}");
    }
}

#[test]
fn test_writes_continue_after_recovery() {
    init_test_logging();
    for budget in 0..WRITES_PER_BLOCK {
        let (media, _) = crash_write(budget, 0, &[0x33u8; 512]);

        let mut btt = load(media);
        for round in 0u8..6 {
            btt.write(0, &[round; 512]).expect("write after recovery");
            btt.write(1, &[round.wrapping_add(100); 512]).expect("write after recovery");
        }

        let mut btt = load(btt.release());
        assert_eq!(read_block(&mut btt, 0), [5u8; 512], "budget {budget}");
        assert_eq!(read_block(&mut btt, 1), [105u8; 512], "budget {budget}");
        assert_eq!(read_block(&mut btt, 7), [0x77; 512], "budget {budget}");
    }
}

#[test]
fn test_failed_write_leaves_arena_read_only_until_reload() {
    init_test_logging();
    let mut media = prepared_media();
    // Data and flog body land, the sequence number store fails.
    media.set_fault_config(FaultConfig::power_loss_after(2));

    let mut btt = load(media);
    assert!(btt.write(1, &[0xEE; 512]).is_err());
    assert!(btt.arenas()[0].is_read_only());
    assert!(matches!(btt.write(2, &[0xEE; 512]), Err(BttError::Aborted(_))));

    let mut btt = load(btt.release().reboot());
    assert!(!btt.arenas()[0].is_read_only());
    assert_eq!(read_block(&mut btt, 1), [0x22; 512]);
}
