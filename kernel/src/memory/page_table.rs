//! Two-level page table structures for 32-bit x86 paging.
//!
//! The page directory and every page table are 1024 entries of 32 bits.
//! All of them live in one [`PagePool`] arena: the directory frame first,
//! then [`PAGE_TABLE_POOL_SIZE`] table frames. Because the arena is a single
//! `repr(C)` block, the physical frame of any table is its base address
//! plus a fixed offset.

use bitflags::bitflags;

use super::address::PhysAddr;
use super::paging::PagingError;
use crate::config::{ENTRY_COUNT, PAGE_SIZE, PAGE_TABLE_POOL_SIZE, SELF_MAP_SLOT};

const FRAME_MASK: u32 = !(PAGE_SIZE - 1);

bitflags! {
    /// Page directory / page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Entry is present.
        const PRESENT = 1 << 0;
        /// Page is writable.
        const WRITABLE = 1 << 1;
        /// Page is accessible from ring 3.
        const USER_ACCESSIBLE = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Disable caching.
        const NO_CACHE = 1 << 4;
        /// Set by the CPU on access.
        const ACCESSED = 1 << 5;
        /// Set by the CPU on write.
        const DIRTY = 1 << 6;
        /// 4 MiB page (directory entries only).
        const HUGE_PAGE = 1 << 7;
        /// Not flushed on CR3 reload.
        const GLOBAL = 1 << 8;
    }
}

/// A single directory or table entry.
///
/// ```text
/// 31            12 11     9 8       0
/// | FRAME ADDRESS  | AVAIL  |  FLAGS  |
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    /// Create an empty (not present) entry.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create an entry from its raw hardware encoding.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw hardware encoding.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Check if the entry is unused.
    pub const fn is_unused(&self) -> bool {
        self.0 == 0
    }

    /// Check if the present bit is set.
    pub const fn is_present(&self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    /// Check if the writable bit is set.
    pub const fn is_writable(&self) -> bool {
        self.0 & PageFlags::WRITABLE.bits() != 0
    }

    /// Get the flags of this entry.
    pub const fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    /// Get the frame this entry points to, whether or not it is present.
    pub const fn frame(&self) -> PhysAddr {
        PhysAddr::new(self.0 & FRAME_MASK)
    }

    /// Set the frame and flags.
    pub fn set(&mut self, frame: PhysAddr, flags: PageFlags) {
        debug_assert!(frame.is_page_aligned(), "frame must be page-aligned");
        self.0 = (frame.as_u32() & FRAME_MASK) | flags.bits();
    }

    /// Set the entry as unused.
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("frame", &self.frame())
            .field("flags", &self.flags())
            .finish()
    }
}

/// A page directory or page table with 1024 entries.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRY_COUNT],
}

impl PageTable {
    /// An all-absent table.
    pub const EMPTY: Self = Self {
        entries: [PageTableEntry::empty(); ENTRY_COUNT],
    };

    /// Get a reference to an entry.
    pub fn entry(&self, index: usize) -> &PageTableEntry {
        &self.entries[index]
    }

    /// Get a mutable reference to an entry.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageTableEntry {
        &mut self.entries[index]
    }

    /// Number of present entries.
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_present()).count()
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.clear();
        }
    }
}

/// Index of a page table inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSlot(u16);

impl TableSlot {
    /// Arena index of the table.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arena holding the page directory and its pool of page tables.
///
/// Each directory slot carries an explicit tag naming the pool table it
/// owns, so lookups never decode a physical address back into a pointer.
/// The hardware entries are kept in sync with the tags.
#[repr(C, align(4096))]
pub struct PagePool {
    directory: PageTable,
    tables: [PageTable; PAGE_TABLE_POOL_SIZE],
    slots: [Option<TableSlot>; ENTRY_COUNT],
    next_free: usize,
    base: Option<PhysAddr>,
    self_mapped: bool,
}

impl PagePool {
    /// Frames occupied by the arena: the directory plus every table.
    pub const FRAME_COUNT: usize = 1 + PAGE_TABLE_POOL_SIZE;

    /// Create an empty arena with no physical placement yet.
    pub const fn new() -> Self {
        Self {
            directory: PageTable::EMPTY,
            tables: [PageTable::EMPTY; PAGE_TABLE_POOL_SIZE],
            slots: [None; ENTRY_COUNT],
            next_free: 0,
            base: None,
            self_mapped: false,
        }
    }

    /// Zero every frame and place the arena at `base`.
    pub fn reset(&mut self, base: PhysAddr) {
        debug_assert!(base.is_page_aligned(), "arena must be page-aligned");
        self.directory.clear();
        for table in self.tables.iter_mut() {
            table.clear();
        }
        self.slots = [None; ENTRY_COUNT];
        self.next_free = 0;
        self.base = Some(base);
        self.self_mapped = false;
    }

    /// Physical frame of the page directory, once placed.
    pub fn directory_frame(&self) -> Option<PhysAddr> {
        self.base
    }

    /// Physical frame of a pool table, once placed.
    pub fn table_frame(&self, slot: TableSlot) -> Option<PhysAddr> {
        let offset = (1 + slot.index() as u32) * PAGE_SIZE;
        self.base.and_then(|base| base.checked_add(offset))
    }

    /// The page directory.
    pub fn directory(&self) -> &PageTable {
        &self.directory
    }

    /// Pool table owned by a directory slot.
    pub fn slot(&self, directory_index: usize) -> Option<TableSlot> {
        self.slots[directory_index]
    }

    /// Page table covering a directory slot, if one is installed.
    pub fn table(&self, directory_index: usize) -> Option<&PageTable> {
        self.slots[directory_index].map(|slot| &self.tables[slot.index()])
    }

    pub(crate) fn table_mut(&mut self, directory_index: usize) -> Option<&mut PageTable> {
        match self.slots[directory_index] {
            Some(slot) => Some(&mut self.tables[slot.index()]),
            None => None,
        }
    }

    /// Number of pool tables handed out.
    pub fn tables_in_use(&self) -> usize {
        self.next_free
    }

    /// Locate the table for a directory slot, installing a fresh one from
    /// the pool if the slot is absent.
    pub(crate) fn install_table(
        &mut self,
        directory_index: usize,
    ) -> Result<TableSlot, PagingError> {
        if let Some(slot) = self.slots[directory_index] {
            return Ok(slot);
        }
        if self.next_free >= PAGE_TABLE_POOL_SIZE {
            return Err(PagingError::PoolExhausted);
        }

        let slot = TableSlot(self.next_free as u16);
        let frame = self.table_frame(slot).ok_or(PagingError::NotInitialized)?;
        self.next_free += 1;

        self.tables[slot.index()].clear();
        self.slots[directory_index] = Some(slot);
        self.directory
            .entry_mut(directory_index)
            .set(frame, PageFlags::PRESENT | PageFlags::WRITABLE);

        Ok(slot)
    }

    /// Point the last directory slot at the directory's own frame.
    pub(crate) fn install_self_map(&mut self) -> Result<(), PagingError> {
        let base = self.base.ok_or(PagingError::NotInitialized)?;
        self.directory
            .entry_mut(SELF_MAP_SLOT)
            .set(base, PageFlags::PRESENT | PageFlags::WRITABLE);
        self.self_mapped = true;
        Ok(())
    }

    /// Check that the self-map entry is installed and still points at the
    /// directory frame.
    pub fn is_self_map_active(&self) -> bool {
        let entry = self.directory.entry(SELF_MAP_SLOT);
        match self.base {
            Some(base) => self.self_mapped && entry.is_present() && entry.frame() == base,
            None => false,
        }
    }

    /// Check if a physical address lies inside one of the arena's frames.
    pub fn owns(&self, paddr: PhysAddr) -> bool {
        self.frame_index(paddr).is_some()
    }

    /// Read the 32-bit entry stored at a physical address inside the arena.
    ///
    /// Frame 0 is the directory, frame `n` is pool table `n - 1`. Returns
    /// `None` for addresses outside the arena.
    pub fn read_physical_word(&self, paddr: PhysAddr) -> Option<u32> {
        let frame = self.frame_index(paddr)?;
        let index = (paddr.frame_offset() / 4) as usize;
        let table = match frame {
            0 => &self.directory,
            n => &self.tables[n - 1],
        };
        Some(table.entry(index).raw())
    }

    fn frame_index(&self, paddr: PhysAddr) -> Option<usize> {
        let base = self.base?.as_u32();
        let offset = paddr.as_u32().checked_sub(base)?;
        let frame = (offset / PAGE_SIZE) as usize;
        (frame < Self::FRAME_COUNT).then_some(frame)
    }
}

impl Default for PagePool {
    fn default() -> Self {
        Self::new()
    }
}
