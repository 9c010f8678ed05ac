//! A page-table tree with its own memory.

use crate::paging::attribute::MapAttribute;
use crate::paging::error::PagingError;
use crate::paging::map::{MapOutcome, page_table_map};
use crate::paging::memory::PageTableMemory;
use crate::paging::parse::{MapEntry, page_table_parse};
use crate::paging::PagingMode;

/// Owner of a page-table tree, running the size query and the commit of
/// every map call itself.
pub struct PageTable {
    memory: PageTableMemory,
    root: u64,
    mode: PagingMode,
}

impl PageTable {
    /// An empty tree for `mode`.
    pub fn new(mode: PagingMode) -> Result<Self, PagingError> {
        mode.check_supported()?;
        Ok(Self {
            memory: PageTableMemory::new(),
            root: 0,
            mode,
        })
    }

    /// Map `[linear_address, linear_address + length)`; see `page_table_map`.
    pub fn map(
        &mut self,
        linear_address: u64,
        length: u64,
        attribute: &MapAttribute,
        mask: &MapAttribute,
    ) -> Result<MapOutcome, PagingError> {
        let query = page_table_map(
            &mut self.memory,
            &mut self.root,
            self.mode,
            None,
            linear_address,
            length,
            attribute,
            mask,
        );
        let required = match query {
            Err(PagingError::BufferTooSmall { required }) => required,
            other => return other,
        };

        let mut buffer = self.memory.reserve(required)?;
        page_table_map(
            &mut self.memory,
            &mut self.root,
            self.mode,
            Some(&mut buffer),
            linear_address,
            length,
            attribute,
            mask,
        )
    }

    /// Every mapped range, merged.
    pub fn parse(&self) -> Result<Vec<MapEntry>, PagingError> {
        let count = match page_table_parse(&self.memory, self.root, self.mode, &mut []) {
            Ok(count) => count,
            Err(PagingError::BufferTooSmall { required }) => usize::try_from(required)
                .map_err(|_| PagingError::InvalidParameter("too many entries"))?,
            Err(e) => return Err(e),
        };

        let mut entries = vec![MapEntry::default(); count];
        let written = page_table_parse(&self.memory, self.root, self.mode, &mut entries)?;
        entries.truncate(written);
        Ok(entries)
    }

    /// Physical address of the top-level table, 0 while empty.
    #[must_use]
    pub const fn root(&self) -> u64 {
        self.root
    }

    #[must_use]
    pub const fn mode(&self) -> PagingMode {
        self.mode
    }

    #[must_use]
    pub const fn memory(&self) -> &PageTableMemory {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::{PAGE_SIZE, SIZE_1G, SIZE_2M};

    #[test]
    fn test_new_rejects_unsupported_mode() {
        assert!(matches!(
            PageTable::new(PagingMode::PagingPae),
            Err(PagingError::Unsupported(PagingMode::PagingPae))
        ));
    }

    #[test]
    fn test_map_and_parse() {
        let mut table = PageTable::new(PagingMode::Paging5Level1G).expect("table");
        assert!(table.parse().expect("parse").is_empty());

        let code = MapAttribute::new().with_present(true).with_base(SIZE_1G);
        let data = MapAttribute::new()
            .with_present(true)
            .with_read_write(true)
            .with_nx(true)
            .with_base(SIZE_1G + SIZE_2M);
        table.map(0, SIZE_2M, &code, &MapAttribute::ALL).expect("map code");
        table.map(SIZE_2M, 3 * PAGE_SIZE, &data, &MapAttribute::ALL).expect("map data");
        assert_ne!(table.root(), 0);

        let entries = table.parse().expect("parse");
        assert_eq!(
            entries,
            vec![
                MapEntry {
                    linear_address: 0,
                    length: SIZE_2M,
                    attribute: code,
                },
                MapEntry {
                    linear_address: SIZE_2M,
                    length: 3 * PAGE_SIZE,
                    attribute: data,
                },
            ]
        );
    }

    #[test]
    fn test_reserves_exactly_what_it_uses() {
        let mut table = PageTable::new(PagingMode::Paging4Level).expect("table");
        let attribute = MapAttribute::new().with_present(true).with_read_write(true);

        let outcome = table.map(0, 2 * SIZE_2M, &attribute, &MapAttribute::ALL).expect("map");
        // PML4, PDPT, PD and two page tables.
        assert_eq!(outcome.pages_allocated, 5);
        assert_eq!(table.memory().reserved(), 5 * PAGE_SIZE);

        let outcome = table.map(0, 2 * SIZE_2M, &attribute, &MapAttribute::ALL).expect("remap");
        assert_eq!(outcome.pages_allocated, 0);
        assert!(!outcome.modified);
        assert_eq!(table.memory().reserved(), 5 * PAGE_SIZE);
    }
}
