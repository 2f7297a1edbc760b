//! Page-mapping primitives.
//!
//! [`Paging`] owns the single page directory with its table arena and the
//! MMU it is loaded into. Mutations go through the arena; lookups in
//! [`Paging::translate`] go through the self-map of whichever directory is
//! active, exactly as code running with paging on would see it.

use core::fmt;

use super::address::{PhysAddr, VirtAddr};
use super::page_table::{PageFlags, PageTableEntry, PagePool};
use crate::arch::{Mmu, PageFault};
use crate::config::{PHYS_MEMORY_LIMIT, SELF_MAP_BASE, SELF_MAP_DIRECTORY, SELF_MAP_SLOT};

/// Errors returned by the page-mapping primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// Address is not page-aligned.
    Unaligned(u32),
    /// Physical frame lies at or above the physical memory ceiling.
    FrameOutOfRange(PhysAddr),
    /// Every table frame of the arena is already in use.
    PoolExhausted,
    /// Address falls inside the self-map window.
    SelfMapSlot(VirtAddr),
    /// The arena has not been initialized.
    NotInitialized,
}

impl fmt::Display for PagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unaligned(addr) => write!(f, "address not page-aligned: {:#x}", addr),
            Self::FrameOutOfRange(paddr) => {
                write!(f, "physical frame out of range: {:#x}", paddr)
            }
            Self::PoolExhausted => write!(f, "page table pool exhausted"),
            Self::SelfMapSlot(vaddr) => {
                write!(f, "address inside the self-map window: {:#x}", vaddr)
            }
            Self::NotInitialized => write!(f, "paging not initialized"),
        }
    }
}

/// The kernel's address space.
pub struct Paging<M: Mmu> {
    pool: PagePool,
    mmu: M,
}

impl<M: Mmu> Paging<M> {
    /// Create an uninitialized address space. Call
    /// [`init`](super::bootstrap::init) before mapping anything.
    pub const fn new(mmu: M) -> Self {
        Self {
            pool: PagePool::new(),
            mmu,
        }
    }

    /// The page-table arena.
    pub fn pool(&self) -> &PagePool {
        &self.pool
    }

    /// The MMU.
    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    /// The MMU, mutably.
    pub fn mmu_mut(&mut self) -> &mut M {
        &mut self.mmu
    }

    /// Check if the arena has been placed and zeroed.
    pub fn is_initialized(&self) -> bool {
        self.pool.directory_frame().is_some()
    }

    /// Check that the last directory slot maps the directory itself.
    pub fn is_self_map_active(&self) -> bool {
        self.pool.is_self_map_active()
    }

    /// Map the page at `vaddr` to the frame at `paddr`.
    ///
    /// Installs a page table from the arena first if the covering
    /// directory slot is absent. Fails without changing anything if either
    /// address is unaligned, the frame is out of range, or no table is left.
    pub fn map(
        &mut self,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        writable: bool,
    ) -> Result<(), PagingError> {
        self.set_entry(vaddr, paddr, writable)?;
        self.mmu.flush_tlb();
        log::trace!("mapped {:#x} -> {:#x} (writable: {})", vaddr, paddr, writable);
        Ok(())
    }

    /// Remove the mapping of the page at `vaddr`.
    ///
    /// An absent directory slot makes this a no-op.
    pub fn unmap(&mut self, vaddr: VirtAddr) -> Result<(), PagingError> {
        if !vaddr.is_page_aligned() {
            return Err(PagingError::Unaligned(vaddr.as_u32()));
        }
        if self.in_self_map_window(vaddr) {
            return Err(PagingError::SelfMapSlot(vaddr));
        }

        let Some(table) = self.pool.table_mut(vaddr.directory_index()) else {
            return Ok(());
        };
        table.entry_mut(vaddr.table_index()).clear();

        self.mmu.flush_tlb();
        log::trace!("unmapped {:#x}", vaddr);
        Ok(())
    }

    /// Load the directory into CR3 and turn paging on.
    ///
    /// # Safety
    ///
    /// The identity map must cover all code, stack and data in use at the
    /// time of the call.
    pub unsafe fn enable(&mut self) -> Result<(), PagingError> {
        let directory = self.pool.directory_frame().ok_or(PagingError::NotInitialized)?;
        // SAFETY: forwarded to the caller.
        unsafe {
            self.mmu.set_cr3(directory);
            self.mmu.enable_paging();
        }
        log::info!("paging enabled, directory at {:#x}", directory);
        Ok(())
    }

    /// Resolve `vaddr` in the active address space.
    ///
    /// Reads the directory entry and then the table entry through the
    /// self-map window. Returns `None` if paging is off or either entry is
    /// not present.
    pub fn translate(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        if !self.mmu.paging_enabled() {
            return None;
        }

        let directory_index = vaddr.directory_index() as u32;
        let pde_addr = VirtAddr::new(SELF_MAP_DIRECTORY + 4 * directory_index);
        let pde = PageTableEntry::from_raw(self.mmu.load_word(&self.pool, pde_addr).ok()?);
        if !pde.is_present() {
            return None;
        }

        let pte_addr = VirtAddr::new(
            SELF_MAP_BASE | directory_index << 12 | 4 * vaddr.table_index() as u32,
        );
        let pte = PageTableEntry::from_raw(self.mmu.load_word(&self.pool, pte_addr).ok()?);
        if !pte.is_present() {
            return None;
        }

        Some(PhysAddr::new(pte.frame().as_u32() | vaddr.page_offset()))
    }

    /// Copy bytes out of the active address space.
    pub fn read(&self, vaddr: VirtAddr, dst: &mut [u8]) -> Result<(), PageFault> {
        self.mmu.read(&self.pool, vaddr, dst)
    }

    /// Copy bytes into the active address space.
    pub fn write(&mut self, vaddr: VirtAddr, src: &[u8]) -> Result<(), PageFault> {
        self.mmu.write(&self.pool, vaddr, src)
    }

    /// Zero bytes of the active address space.
    pub fn zero(&mut self, vaddr: VirtAddr, len: u32) -> Result<(), PageFault> {
        self.mmu.zero(&self.pool, vaddr, len)
    }

    /// Set a leaf entry without flushing the TLB.
    pub(super) fn set_entry(
        &mut self,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        writable: bool,
    ) -> Result<(), PagingError> {
        if !vaddr.is_page_aligned() {
            return Err(PagingError::Unaligned(vaddr.as_u32()));
        }
        if !paddr.is_page_aligned() {
            return Err(PagingError::Unaligned(paddr.as_u32()));
        }
        if paddr.as_u32() >= PHYS_MEMORY_LIMIT {
            return Err(PagingError::FrameOutOfRange(paddr));
        }
        if !self.is_initialized() {
            return Err(PagingError::NotInitialized);
        }
        if self.in_self_map_window(vaddr) {
            return Err(PagingError::SelfMapSlot(vaddr));
        }

        let directory_index = vaddr.directory_index();
        self.pool.install_table(directory_index)?;
        let table = self
            .pool
            .table_mut(directory_index)
            .ok_or(PagingError::NotInitialized)?;

        let mut flags = PageFlags::PRESENT;
        if writable {
            flags |= PageFlags::WRITABLE;
        }
        table.entry_mut(vaddr.table_index()).set(paddr, flags);
        Ok(())
    }

    pub(super) fn reset_arena(&mut self) -> Result<PhysAddr, PagingError> {
        let base = self.mmu.arena_base(&self.pool);
        if !base.is_page_aligned() {
            return Err(PagingError::Unaligned(base.as_u32()));
        }
        self.pool.reset(base);
        Ok(base)
    }

    pub(super) fn install_self_map(&mut self) -> Result<(), PagingError> {
        self.pool.install_self_map()
    }

    fn in_self_map_window(&self, vaddr: VirtAddr) -> bool {
        vaddr.directory_index() == SELF_MAP_SLOT && self.pool.is_self_map_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DIRECTORY_SPAN, PAGE_SIZE};
    use crate::memory::bootstrap;
    use crate::sim::SimMmu;

    const ARENA: PhysAddr = PhysAddr::new(0x0009_0000);

    fn ram() -> Vec<u8> {
        vec![0u8; PHYS_MEMORY_LIMIT as usize]
    }

    fn booted(ram: &mut [u8]) -> Paging<SimMmu<'_>> {
        let mut paging = Paging::new(SimMmu::new(ram, ARENA));
        bootstrap::init(&mut paging).unwrap();
        unsafe { paging.enable().unwrap() };
        paging
    }

    #[test]
    fn test_map_before_init() {
        let mut ram = ram();
        let mut paging = Paging::new(SimMmu::new(&mut ram, ARENA));
        assert_eq!(
            paging.map(VirtAddr::new(0x1000), PhysAddr::new(0x1000), true),
            Err(PagingError::NotInitialized)
        );
        assert_eq!(unsafe { paging.enable() }, Err(PagingError::NotInitialized));
        assert!(!paging.mmu().paging_enabled());
    }

    #[test]
    fn test_map_rejects_unaligned() {
        let mut ram = ram();
        let mut paging = booted(&mut ram);
        let vaddr = VirtAddr::new(0x4000_0000);
        let loads = paging.mmu().cr3_loads();

        assert_eq!(
            paging.map(VirtAddr::new(0x4000_0010), PhysAddr::new(0x2000), true),
            Err(PagingError::Unaligned(0x4000_0010))
        );
        assert_eq!(
            paging.map(vaddr, PhysAddr::new(0x2001), true),
            Err(PagingError::Unaligned(0x2001))
        );
        assert_eq!(
            paging.unmap(VirtAddr::new(0x0010_0800)),
            Err(PagingError::Unaligned(0x0010_0800))
        );

        assert_eq!(paging.pool().slot(vaddr.directory_index()), None);
        assert_eq!(paging.translate(vaddr), None);
        assert_eq!(paging.mmu().cr3_loads(), loads);
    }

    #[test]
    fn test_map_rejects_frame_out_of_range() {
        let mut ram = ram();
        let mut paging = booted(&mut ram);
        assert_eq!(
            paging.map(VirtAddr::new(0x4000_0000), PhysAddr::new(PHYS_MEMORY_LIMIT), true),
            Err(PagingError::FrameOutOfRange(PhysAddr::new(PHYS_MEMORY_LIMIT)))
        );
        assert!(paging
            .map(VirtAddr::new(0x4000_0000), PhysAddr::new(PHYS_MEMORY_LIMIT - PAGE_SIZE), true)
            .is_ok());
    }

    #[test]
    fn test_map_is_idempotent() {
        let mut ram = ram();
        let mut paging = booted(&mut ram);
        let vaddr = VirtAddr::new(0x8000_0000);
        let paddr = PhysAddr::new(0x0030_0000);

        paging.map(vaddr, paddr, true).unwrap();
        let tables = paging.pool().tables_in_use();
        paging.map(vaddr, paddr, true).unwrap();

        assert_eq!(paging.pool().tables_in_use(), tables);
        assert_eq!(paging.translate(vaddr), Some(paddr));
        assert_eq!(
            paging.translate(VirtAddr::new(0x8000_0123)),
            Some(PhysAddr::new(0x0030_0123))
        );
    }

    #[test]
    fn test_map_read_only() {
        let mut ram = ram();
        let mut paging = booted(&mut ram);
        let vaddr = VirtAddr::new(0x8000_0000);
        paging.map(vaddr, PhysAddr::new(0x0030_0000), false).unwrap();

        let entry = paging
            .pool()
            .table(vaddr.directory_index())
            .unwrap()
            .entry(vaddr.table_index());
        assert!(entry.is_present());
        assert!(!entry.is_writable());
    }

    #[test]
    fn test_map_flushes_tlb() {
        let mut ram = ram();
        let mut paging = booted(&mut ram);
        let loads = paging.mmu().cr3_loads();
        paging.map(VirtAddr::new(0x8000_0000), PhysAddr::new(0x5000), true).unwrap();
        assert_eq!(paging.mmu().cr3_loads(), loads + 1);
        assert_eq!(paging.mmu().cr3(), paging.pool().directory_frame().unwrap());
    }

    #[test]
    fn test_unmap_absent_is_noop() {
        let mut ram = ram();
        let mut paging = booted(&mut ram);
        let loads = paging.mmu().cr3_loads();
        let vaddr = VirtAddr::new(0xA000_0000);

        assert_eq!(paging.unmap(vaddr), Ok(()));
        assert_eq!(paging.mmu().cr3_loads(), loads);
        assert_eq!(paging.translate(vaddr), None);
    }

    #[test]
    fn test_unmap_removes_mapping() {
        let mut ram = ram();
        let mut paging = booted(&mut ram);
        let vaddr = VirtAddr::new(0x0020_0000);
        assert_eq!(paging.translate(vaddr), Some(PhysAddr::new(0x0020_0000)));

        paging.unmap(vaddr).unwrap();
        assert_eq!(paging.translate(vaddr), None);
        assert_eq!(
            paging.translate(VirtAddr::new(0x0020_1000)),
            Some(PhysAddr::new(0x0020_1000))
        );
        assert_eq!(paging.read(vaddr, &mut [0u8; 1]), Err(PageFault::NotPresent(vaddr)));
    }

    #[test]
    fn test_self_map_window_refused() {
        let mut ram = ram();
        let mut paging = booted(&mut ram);
        let vaddr = VirtAddr::new(SELF_MAP_BASE);

        assert_eq!(
            paging.map(vaddr, PhysAddr::new(0x1000), true),
            Err(PagingError::SelfMapSlot(vaddr))
        );
        assert_eq!(paging.unmap(vaddr), Err(PagingError::SelfMapSlot(vaddr)));
        assert!(paging.is_self_map_active());
    }

    #[test]
    fn test_translate_reads_self_map() {
        let mut ram = ram();
        let paging = booted(&mut ram);

        assert_eq!(paging.translate(VirtAddr::new(SELF_MAP_DIRECTORY)), Some(ARENA));
        let table_zero = paging.pool().table_frame(paging.pool().slot(0).unwrap()).unwrap();
        assert_eq!(paging.translate(VirtAddr::new(SELF_MAP_BASE)), Some(table_zero));
    }

    #[test]
    fn test_translate_with_paging_off() {
        let mut ram = ram();
        let mut paging = Paging::new(SimMmu::new(&mut ram, ARENA));
        bootstrap::init(&mut paging).unwrap();
        assert_eq!(paging.translate(VirtAddr::new(0x1000)), None);
    }

    #[test]
    fn test_pool_exhaustion_keeps_earlier_mappings() {
        let mut ram = ram();
        let mut paging = booted(&mut ram);
        let spare = crate::config::PAGE_TABLE_POOL_SIZE - paging.pool().tables_in_use();

        let region = |n: u32| VirtAddr::new(0x4000_0000 + n * DIRECTORY_SPAN);
        for n in 0..spare as u32 {
            paging.map(region(n), PhysAddr::new(0x0040_0000 + n * PAGE_SIZE), true).unwrap();
        }

        let last = region(spare as u32);
        assert_eq!(
            paging.map(last, PhysAddr::new(0x0050_0000), true),
            Err(PagingError::PoolExhausted)
        );
        assert!(!paging.pool().directory().entry(last.directory_index()).is_present());
        for n in 0..spare as u32 {
            assert_eq!(
                paging.translate(region(n)),
                Some(PhysAddr::new(0x0040_0000 + n * PAGE_SIZE))
            );
        }

        // a region that already has a table still accepts mappings
        let reuse = VirtAddr::new(region(0).as_u32() + PAGE_SIZE);
        assert!(paging.map(reuse, PhysAddr::new(0x0060_0000), true).is_ok());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(PagingError::Unaligned(0x1001).to_string(), "address not page-aligned: 0x1001");
        assert_eq!(PagingError::PoolExhausted.to_string(), "page table pool exhausted");
    }
}
