//! Mapping linear-address ranges.
//!
//! # Design
//!
//! One recursive walk serves both passes. A `TableRef` names the table a
//! level works on: an existing page in `PageTableMemory`, or, during the
//! counting pass only, a table that would have been allocated. Such a table
//! is either fresh (every entry not present) or the split of a large leaf
//! (every entry a leaf one level down with the leaf's effective attribute).
//! Entries of those tables are synthesized on read, so both passes see the
//! same tree and make the same decisions.
//!
//! Splitting a large leaf and applying the edit to the resulting table are
//! separate steps (`split_leaf`, then `apply_edit`).
//!
//! # Rules
//!
//! - New table pointers get `MapAttribute::NON_LEAF_DEFAULT`, never the
//!   requested attribute
//! - A leaf is written when the edit covers an entry's whole range, the level
//!   is at most the mode's largest leaf level and the physical address is
//!   aligned to the entry size (or the edit unmaps); otherwise the walk
//!   descends
//! - A table pointer is only replaced by a leaf under a complete mask
//! - Edits over not-present ranges that do not create a present mapping
//!   are no-ops; creating one requires the mask to cover present,
//!   read/write, user/supervisor and the base address

use crate::paging::attribute::{MapAttribute, PRESENT, READ_WRITE, USER_SUPERVISOR};
use crate::paging::entry::PagingEntry;
use crate::paging::error::PagingError;
use crate::paging::memory::{PageTableMemory, ScratchBuffer};
use crate::paging::{ENTRIES_PER_TABLE, PAGE_SIZE, PagingMode, level_size};

/// Result of a committed map call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapOutcome {
    /// Table pages taken from the scratch buffer.
    pub pages_allocated: u64,
    /// Whether any entry (or the root) changed.
    pub modified: bool,
}

/// Map `[linear_address, linear_address + length)` with `attribute`, updating
/// only the fields selected by `mask`.
///
/// `root` is the physical address of the top-level table, or 0 to create
/// one. The physical address of the range starts at `attribute.base()`.
///
/// Without `buffer`, or with a buffer holding fewer bytes than the edit
/// needs, nothing is modified and `PagingError::BufferTooSmall` reports the
/// exact byte count. An edit that needs no new pages commits without a
/// buffer.
///
/// # Pre-conditions
/// - `linear_address`, `length` and `attribute.base()` are 4 KiB aligned
/// - The range ends within the mode's linear address space
///
/// # Post-conditions
/// - On `Ok`, the buffer lost exactly `pages_allocated * 4096` bytes, the
///   amount a size query for the same arguments reports
// The argument list mirrors the caller contract one to one.
#[allow(clippy::too_many_arguments)]
pub fn page_table_map(
    memory: &mut PageTableMemory,
    root: &mut u64,
    mode: PagingMode,
    buffer: Option<&mut ScratchBuffer>,
    linear_address: u64,
    length: u64,
    attribute: &MapAttribute,
    mask: &MapAttribute,
) -> Result<MapOutcome, PagingError> {
    mode.check_supported()?;
    if length == 0 {
        return Ok(MapOutcome::default());
    }
    if linear_address % PAGE_SIZE != 0 || length % PAGE_SIZE != 0 {
        return Err(PagingError::InvalidParameter(
            "linear address and length must be 4 KiB aligned",
        ));
    }
    let end = linear_address
        .checked_add(length)
        .filter(|&end| end <= mode.linear_limit())
        .ok_or(PagingError::InvalidParameter(
            "range exceeds the linear address space of the paging mode",
        ))?;
    if mask.includes_base() && attribute.base().checked_add(length).is_none_or(|e| e > 1 << 52) {
        return Err(PagingError::InvalidParameter(
            "physical range exceeds the 52-bit address space",
        ));
    }

    let request = Request {
        mode,
        linear_address,
        end,
        attribute: *attribute,
        mask: *mask,
    };

    let mut counter = Walker::counting(memory, request);
    counter.run(*root)?;
    let required = counter.pages * PAGE_SIZE;

    let available = buffer.as_ref().map_or(0, |b| b.remaining());
    if required > available {
        tracing::debug!(required, available, "page table map needs a larger buffer");
        return Err(PagingError::BufferTooSmall { required });
    }

    let consumed_before = buffer.as_ref().map_or(0, |b| b.consumed());
    let mut committer = Walker::committing(memory, buffer, request);
    let new_root = committer.run(*root)?;
    if new_root != *root {
        *root = new_root;
        committer.modified = true;
    }
    let outcome = MapOutcome {
        pages_allocated: committer.pages,
        modified: committer.modified,
    };
    debug_assert_eq!(
        committer.buffer.as_ref().map_or(0, |b| b.consumed()) - consumed_before,
        required
    );
    Ok(outcome)
}

/// Arguments shared by every level of the walk.
#[derive(Debug, Clone, Copy)]
struct Request {
    mode: PagingMode,
    linear_address: u64,
    end: u64,
    attribute: MapAttribute,
    mask: MapAttribute,
}

impl Request {
    /// Whether the edit makes anything present.
    const fn creates_mapping(&self) -> bool {
        self.mask.present() && self.attribute.present()
    }

    /// Whether the edit clears the present bit.
    const fn removes_mapping(&self) -> bool {
        self.mask.present() && !self.attribute.present()
    }

    fn check_creation_mask(&self) -> Result<(), PagingError> {
        let required = PRESENT | READ_WRITE | USER_SUPERVISOR;
        if self.mask.bits() & required != required || !self.mask.includes_base() {
            return Err(PagingError::InvalidParameter(
                "creating a mapping requires a mask covering present, read/write, user/supervisor and the base address",
            ));
        }
        Ok(())
    }

    /// Physical address the edit assigns to `linear`.
    const fn physical(&self, linear: u64) -> u64 {
        self.attribute.base() + (linear - self.linear_address)
    }

    /// The leaf attribute `current` becomes when the edit covers `linear`.
    const fn updated_leaf(&self, current: MapAttribute, linear: u64) -> MapAttribute {
        current.update(self.attribute.with_base(self.physical(linear)), self.mask)
    }
}

/// The table a level of the walk operates on.
#[derive(Debug, Clone, Copy)]
enum TableRef {
    Existing(u64),
    /// Counting pass: a newly allocated, empty table.
    Fresh,
    /// Counting pass: a large leaf split into leaves of `level`.
    Split { attribute: MapAttribute, level: u8 },
}

struct Walker<'a> {
    memory: &'a mut PageTableMemory,
    /// `None` while counting, in which case nothing is written.
    buffer: Option<&'a mut ScratchBuffer>,
    committing: bool,
    request: Request,
    pages: u64,
    modified: bool,
}

impl<'a> Walker<'a> {
    const fn counting(memory: &'a mut PageTableMemory, request: Request) -> Self {
        Self {
            memory,
            buffer: None,
            committing: false,
            request,
            pages: 0,
            modified: false,
        }
    }

    const fn committing(
        memory: &'a mut PageTableMemory,
        buffer: Option<&'a mut ScratchBuffer>,
        request: Request,
    ) -> Self {
        Self {
            memory,
            buffer,
            committing: true,
            request,
            pages: 0,
            modified: false,
        }
    }

    /// Walk from the root; returns the (possibly new) root address.
    fn run(&mut self, root: u64) -> Result<u64, PagingError> {
        let (table, new_root) = if root == 0 {
            if !self.request.creates_mapping() {
                return Ok(0);
            }
            self.request.check_creation_mask()?;
            let table = self.allocate_table()?;
            let address = match table {
                TableRef::Existing(address) => address,
                TableRef::Fresh | TableRef::Split { .. } => 0,
            };
            (table, address)
        } else {
            (TableRef::Existing(root), root)
        };

        let Request {
            mode,
            linear_address,
            end,
            ..
        } = self.request;
        self.apply_edit(
            table,
            MapAttribute::NON_LEAF_DEFAULT,
            mode.max_level(),
            0,
            linear_address,
            end,
        )?;
        Ok(new_root)
    }

    /// Allocate and zero one table page.
    fn allocate_table(&mut self) -> Result<TableRef, PagingError> {
        self.pages += 1;
        if !self.committing {
            return Ok(TableRef::Fresh);
        }
        let address = self
            .buffer
            .as_mut()
            .and_then(|buffer| buffer.take_page())
            .ok_or(PagingError::BufferTooSmall {
                required: self.pages * PAGE_SIZE,
            })?;
        self.memory.table_mut(address)?.fill(0);
        Ok(TableRef::Existing(address))
    }

    fn entry_at(&self, table: TableRef, index: usize, level: u8) -> Result<PagingEntry, PagingError> {
        match table {
            TableRef::Existing(address) => {
                Ok(PagingEntry::decode(self.memory.table(address)?[index], level))
            }
            TableRef::Fresh => Ok(PagingEntry::NotPresent),
            TableRef::Split { attribute, level: leaf_level } => {
                debug_assert_eq!(leaf_level, level);
                let base = attribute.base() + index as u64 * level_size(level);
                Ok(PagingEntry::leaf(level, attribute.with_base(base)))
            }
        }
    }

    fn set_entry(&mut self, table: TableRef, index: usize, entry: PagingEntry) -> Result<(), PagingError> {
        if !self.committing {
            return Ok(());
        }
        let TableRef::Existing(address) = table else {
            return Err(PagingError::InvalidParameter("commit reached an unallocated table"));
        };
        let slot = &mut self.memory.table_mut(address)?[index];
        let raw = entry.encode();
        if *slot != raw {
            *slot = raw;
            self.modified = true;
        }
        Ok(())
    }

    /// Edit `[start, end)` within the table covering linear addresses from
    /// `table_base` at `level`. `parent` is the effective attribute of the
    /// entries above.
    fn apply_edit(
        &mut self,
        table: TableRef,
        parent: MapAttribute,
        level: u8,
        table_base: u64,
        start: u64,
        end: u64,
    ) -> Result<(), PagingError> {
        let size = level_size(level);
        let first = index_of(start - table_base, size)?;
        let last = index_of(end - 1 - table_base, size)?;

        for index in first..=last {
            let slot_base = table_base + index as u64 * size;
            let sub_start = start.max(slot_base);
            let sub_end = end.min(slot_base + size);
            let current = self.entry_at(table, index, level)?;

            if self.writes_leaf(current, level, slot_base, sub_start, sub_end) {
                self.write_leaf(table, index, level, current, sub_start)?;
            } else {
                self.map_in_level(table, index, current, parent, level, slot_base, sub_start, sub_end)?;
            }
        }
        Ok(())
    }

    fn writes_leaf(&self, current: PagingEntry, level: u8, slot_base: u64, start: u64, end: u64) -> bool {
        let size = level_size(level);
        let full = start == slot_base && end == slot_base + size;
        let leaf_level = level <= self.request.mode.max_leaf_level();
        let aligned = !self.request.mask.includes_base()
            || self.request.removes_mapping()
            || self.request.physical(start) % size == 0;
        let replaceable = match current {
            PagingEntry::NonLeaf { .. } => self.request.mask.is_complete(),
            _ => true,
        };
        full && leaf_level && aligned && replaceable
    }

    fn write_leaf(
        &mut self,
        table: TableRef,
        index: usize,
        level: u8,
        current: PagingEntry,
        linear: u64,
    ) -> Result<(), PagingError> {
        if current == PagingEntry::NotPresent {
            if !self.request.creates_mapping() {
                return Ok(());
            }
            self.request.check_creation_mask()?;
        }
        let existing = current.leaf_attribute().unwrap_or(MapAttribute::EMPTY);
        let updated = self.request.updated_leaf(existing, linear);
        self.set_entry(table, index, PagingEntry::leaf(level, updated))
    }

    /// Descend below entry `index` of `table` to edit `[start, end)`.
    #[allow(clippy::too_many_arguments)]
    fn map_in_level(
        &mut self,
        table: TableRef,
        index: usize,
        current: PagingEntry,
        parent: MapAttribute,
        level: u8,
        slot_base: u64,
        start: u64,
        end: u64,
    ) -> Result<(), PagingError> {
        if level == 1 {
            return Err(PagingError::InvalidParameter(
                "range does not cover whole 4 KiB pages",
            ));
        }

        let child = match current {
            PagingEntry::NotPresent => {
                if !self.request.creates_mapping() {
                    return Ok(());
                }
                self.request.check_creation_mask()?;
                let child = self.allocate_table()?;
                self.link(table, index, child)?;
                child
            }
            PagingEntry::NonLeaf { table: address, attribute } => {
                let below = attribute.inherit(parent);
                return self.apply_edit(TableRef::Existing(address), below, level - 1, slot_base, start, end);
            }
            PagingEntry::Leaf1G(leaf) | PagingEntry::Leaf2M(leaf) | PagingEntry::Leaf4K(leaf) => {
                let offset = start - slot_base;
                let at_start = leaf.with_base(leaf.base() + offset);
                if self.request.updated_leaf(at_start, start) == at_start {
                    return Ok(());
                }
                let child = self.split_leaf(leaf.inherit(parent), level)?;
                self.link(table, index, child)?;
                child
            }
        };

        let below = MapAttribute::NON_LEAF_DEFAULT.inherit(parent);
        self.apply_edit(child, below, level - 1, slot_base, start, end)
    }

    /// Replace a large leaf by a table of 512 leaves one level down, each
    /// carrying the leaf's effective attribute.
    fn split_leaf(&mut self, effective: MapAttribute, level: u8) -> Result<TableRef, PagingError> {
        let child_level = level - 1;
        tracing::debug!(level, base = effective.base(), "splitting large leaf");
        let child = self.allocate_table()?;
        let TableRef::Existing(address) = child else {
            return Ok(TableRef::Split {
                attribute: effective,
                level: child_level,
            });
        };

        let step = level_size(child_level);
        let table = self.memory.table_mut(address)?;
        for (index, slot) in table.iter_mut().enumerate() {
            let attribute = effective.with_base(effective.base() + index as u64 * step);
            *slot = PagingEntry::leaf(child_level, attribute).encode();
        }
        Ok(child)
    }

    /// Point entry `index` of `table` at `child`.
    fn link(&mut self, table: TableRef, index: usize, child: TableRef) -> Result<(), PagingError> {
        let TableRef::Existing(address) = child else {
            return Ok(());
        };
        self.set_entry(
            table,
            index,
            PagingEntry::NonLeaf {
                table: address,
                attribute: MapAttribute::NON_LEAF_DEFAULT,
            },
        )
    }
}

fn index_of(offset: u64, size: u64) -> Result<usize, PagingError> {
    usize::try_from(offset / size)
        .ok()
        .filter(|&index| index < ENTRIES_PER_TABLE)
        .ok_or(PagingError::InvalidParameter("linear address outside the table"))
}
