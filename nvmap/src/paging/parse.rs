//! Parsing page tables back into mapped ranges.

use crate::paging::attribute::MapAttribute;
use crate::paging::entry::PagingEntry;
use crate::paging::error::PagingError;
use crate::paging::memory::PageTableMemory;
use crate::paging::{PagingMode, level_size};

/// One mapped range with a uniform effective attribute.
///
/// `attribute.base()` is the physical address of `linear_address`; the
/// range is physically contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapEntry {
    pub linear_address: u64,
    pub length: u64,
    pub attribute: MapAttribute,
}

impl MapEntry {
    /// Extend `self` by `next` if it directly follows, in both linear and
    /// physical address, with the same attributes.
    fn merge_right(&mut self, next: &Self) -> bool {
        let follows = self.linear_address + self.length == next.linear_address
            && self.attribute.base() + self.length == next.attribute.base()
            && self.attribute.attributes() == next.attribute.attributes();
        if follows {
            self.length += next.length;
        }
        follows
    }

    /// Extend `self` backward by `previous` if it directly precedes `self`.
    ///
    /// `page_table_parse` visits leaves in increasing linear order, so from
    /// there this never succeeds; it covers collectors fed out of order.
    fn merge_left(&mut self, previous: &Self) -> bool {
        let precedes = previous.linear_address + previous.length == self.linear_address
            && previous.attribute.base() + previous.length == self.attribute.base()
            && self.attribute.attributes() == previous.attribute.attributes();
        if precedes {
            self.linear_address = previous.linear_address;
            self.attribute = previous.attribute;
            self.length += previous.length;
        }
        precedes
    }
}

/// Collects ranges into a caller slice, counting past its end.
struct Collector<'a> {
    output: &'a mut [MapEntry],
    count: usize,
    pending: Option<MapEntry>,
}

impl Collector<'_> {
    fn push(&mut self, region: MapEntry) {
        if let Some(pending) = self.pending.as_mut() {
            if pending.merge_right(&region) || pending.merge_left(&region) {
                return;
            }
        }
        self.flush();
        self.pending = Some(region);
    }

    fn flush(&mut self) {
        if let Some(pending) = self.pending.take() {
            if let Some(slot) = self.output.get_mut(self.count) {
                *slot = pending;
            }
            self.count += 1;
        }
    }
}

/// Report every mapped range of the tree at `root` into `map`.
///
/// Ranges are reported in linear-address order with their effective
/// attribute, merged wherever neighbours share attributes and are physically
/// contiguous. Returns the number of entries written.
///
/// When `map` is too short the walk still completes and
/// `PagingError::BufferTooSmall` reports the entry count needed.
pub fn page_table_parse(
    memory: &PageTableMemory,
    root: u64,
    mode: PagingMode,
    map: &mut [MapEntry],
) -> Result<usize, PagingError> {
    mode.check_supported()?;
    let mut collector = Collector {
        output: map,
        count: 0,
        pending: None,
    };

    if root != 0 {
        parse_level(
            memory,
            root,
            mode.max_level(),
            0,
            MapAttribute::NON_LEAF_DEFAULT,
            &mut collector,
        )?;
    }
    collector.flush();

    let count = collector.count;
    if count > collector.output.len() {
        return Err(PagingError::BufferTooSmall {
            required: count as u64,
        });
    }
    Ok(count)
}

fn parse_level(
    memory: &PageTableMemory,
    table: u64,
    level: u8,
    table_base: u64,
    parent: MapAttribute,
    collector: &mut Collector<'_>,
) -> Result<(), PagingError> {
    let size = level_size(level);
    let entries = *memory.table(table)?;

    for (index, raw) in entries.into_iter().enumerate() {
        let linear_address = table_base + index as u64 * size;
        match PagingEntry::decode(raw, level) {
            PagingEntry::NotPresent => {}
            PagingEntry::NonLeaf { table, attribute } => {
                parse_level(
                    memory,
                    table,
                    level - 1,
                    linear_address,
                    attribute.inherit(parent),
                    collector,
                )?;
            }
            PagingEntry::Leaf1G(leaf) | PagingEntry::Leaf2M(leaf) | PagingEntry::Leaf4K(leaf) => {
                collector.push(MapEntry {
                    linear_address,
                    length: size,
                    attribute: leaf.inherit(parent),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::{PAGE_SIZE, SIZE_2M};

    fn attr() -> MapAttribute {
        MapAttribute::new().with_present(true).with_read_write(true)
    }

    /// Build a 4-level tree by hand: PML4 -> PDPT -> PD, with the given
    /// raw PD entries.
    fn tree(pd_entries: &[(usize, u64)], pdpt_attribute: MapAttribute) -> (PageTableMemory, u64) {
        let mut memory = PageTableMemory::new();
        let buffer = memory.reserve(3 * PAGE_SIZE).expect("reserve");
        let (pml4, pdpt, pd) = (buffer.base(), buffer.base() + PAGE_SIZE, buffer.base() + 2 * PAGE_SIZE);

        memory.table_mut(pml4).expect("pml4")[0] = PagingEntry::NonLeaf {
            table: pdpt,
            attribute: MapAttribute::NON_LEAF_DEFAULT,
        }
        .encode();
        memory.table_mut(pdpt).expect("pdpt")[0] = PagingEntry::NonLeaf {
            table: pd,
            attribute: pdpt_attribute,
        }
        .encode();
        let table = memory.table_mut(pd).expect("pd");
        for &(index, raw) in pd_entries {
            table[index] = raw;
        }
        (memory, pml4)
    }

    fn leaf_2m(base: u64, attribute: MapAttribute) -> u64 {
        PagingEntry::Leaf2M(attribute.with_base(base)).encode()
    }

    #[test]
    fn test_empty_tree() {
        let memory = PageTableMemory::new();
        let mut map = [MapEntry::default(); 1];
        assert_eq!(page_table_parse(&memory, 0, PagingMode::Paging4Level, &mut map), Ok(0));
    }

    #[test]
    fn test_merges_contiguous_leaves() {
        let (memory, root) = tree(
            &[(0, leaf_2m(0, attr())), (1, leaf_2m(SIZE_2M, attr())), (3, leaf_2m(3 * SIZE_2M, attr()))],
            MapAttribute::NON_LEAF_DEFAULT,
        );
        let mut map = [MapEntry::default(); 4];
        let count = page_table_parse(&memory, root, PagingMode::Paging4Level2M, &mut map).expect("parse");

        assert_eq!(count, 2);
        assert_eq!(map[0], MapEntry { linear_address: 0, length: 2 * SIZE_2M, attribute: attr() });
        assert_eq!(map[1].linear_address, 3 * SIZE_2M);
    }

    #[test]
    fn test_physical_gap_prevents_merge() {
        let (memory, root) = tree(
            &[(0, leaf_2m(0, attr())), (1, leaf_2m(4 * SIZE_2M, attr()))],
            MapAttribute::NON_LEAF_DEFAULT,
        );
        let mut map = [MapEntry::default(); 4];
        let count = page_table_parse(&memory, root, PagingMode::Paging4Level2M, &mut map).expect("parse");
        assert_eq!(count, 2);
    }

    #[test]
    fn test_effective_attribute_inherits_from_parents() {
        let parent = MapAttribute::NON_LEAF_DEFAULT.with_read_write(false).with_nx(true);
        let (memory, root) = tree(&[(0, leaf_2m(0, attr().with_user_supervisor(true)))], parent);
        let mut map = [MapEntry::default(); 1];
        page_table_parse(&memory, root, PagingMode::Paging4Level, &mut map).expect("parse");

        let effective = map[0].attribute;
        assert!(effective.present());
        assert!(!effective.read_write());
        assert!(effective.user_supervisor());
        assert!(effective.nx());
    }

    #[test]
    fn test_counts_past_capacity() {
        let entries: Vec<(usize, u64)> = (0..5)
            .map(|i| (i * 2, leaf_2m(i as u64 * 2 * SIZE_2M, attr())))
            .collect();
        let (memory, root) = tree(&entries, MapAttribute::NON_LEAF_DEFAULT);

        let mut map = [MapEntry::default(); 2];
        assert_eq!(
            page_table_parse(&memory, root, PagingMode::Paging4Level2M, &mut map),
            Err(PagingError::BufferTooSmall { required: 5 })
        );
        assert_eq!(map[1].linear_address, 2 * SIZE_2M);

        let mut map = [MapEntry::default(); 5];
        assert_eq!(page_table_parse(&memory, root, PagingMode::Paging4Level2M, &mut map), Ok(5));
    }

    #[test]
    fn test_merge_left() {
        let mut later = MapEntry {
            linear_address: SIZE_2M,
            length: SIZE_2M,
            attribute: attr().with_base(0x60_0000),
        };
        let earlier = MapEntry {
            linear_address: 0,
            length: SIZE_2M,
            attribute: attr().with_base(0x40_0000),
        };
        assert!(later.merge_left(&earlier));
        assert_eq!(later, MapEntry { linear_address: 0, length: 2 * SIZE_2M, attribute: attr().with_base(0x40_0000) });
    }

    #[test]
    fn test_unsupported_mode() {
        let memory = PageTableMemory::new();
        let mut map = [MapEntry::default(); 1];
        assert_eq!(
            page_table_parse(&memory, 0, PagingMode::Paging32Bit, &mut map),
            Err(PagingError::Unsupported(PagingMode::Paging32Bit))
        );
    }
}
