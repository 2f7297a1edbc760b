//! Software MMU over a caller-provided RAM buffer.
//!
//! `SimMmu` behaves like the i386 paging unit for the subset the loader
//! uses: with CR0.PG clear every address is physical, with it set every
//! access walks the two-level tables starting from CR3. Table frames are
//! read from the [`PagePool`] arena, which shadows the RAM bytes at the
//! same physical addresses. CR0.WP is never set, so read-only pages are
//! writable from ring 0 just like on hardware.

use core::ops::Range;

use crate::arch::{Cr0Flags, Mmu, PageFault};
use crate::config::PAGE_SIZE;
use crate::memory::address::{PhysAddr, VirtAddr};
use crate::memory::page_table::{PagePool, PageTableEntry};

/// A simulated MMU and its physical memory.
pub struct SimMmu<'a> {
    ram: &'a mut [u8],
    arena: PhysAddr,
    cr3: PhysAddr,
    cr0: Cr0Flags,
    cr3_loads: usize,
}

impl<'a> SimMmu<'a> {
    /// Create an MMU in protected mode with paging off. `arena` is the
    /// physical frame the page-table arena is placed at.
    pub fn new(ram: &'a mut [u8], arena: PhysAddr) -> Self {
        Self {
            ram,
            arena,
            cr3: PhysAddr::new(0),
            cr0: Cr0Flags::PROTECTED_MODE_ENABLE | Cr0Flags::EXTENSION_TYPE,
            cr3_loads: 0,
        }
    }

    /// Number of CR3 loads so far, each of which flushes the TLB.
    pub fn cr3_loads(&self) -> usize {
        self.cr3_loads
    }

    /// Physical memory.
    pub fn ram(&self) -> &[u8] {
        &self.ram[..]
    }

    /// Resolve `vaddr` the way the paging unit would.
    pub fn walk(&self, pool: &PagePool, vaddr: VirtAddr) -> Result<PhysAddr, PageFault> {
        if !self.paging_enabled() {
            return Ok(PhysAddr::new(vaddr.as_u32()));
        }

        let pde_addr = PhysAddr::new(self.cr3.as_u32() + 4 * vaddr.directory_index() as u32);
        let pde = PageTableEntry::from_raw(self.read_physical_word(pool, pde_addr)?);
        if !pde.is_present() {
            return Err(PageFault::NotPresent(vaddr));
        }

        let pte_addr = PhysAddr::new(pde.frame().as_u32() + 4 * vaddr.table_index() as u32);
        let pte = PageTableEntry::from_raw(self.read_physical_word(pool, pte_addr)?);
        if !pte.is_present() {
            return Err(PageFault::NotPresent(vaddr));
        }

        Ok(PhysAddr::new(pte.frame().as_u32() | vaddr.page_offset()))
    }

    fn read_physical_word(&self, pool: &PagePool, paddr: PhysAddr) -> Result<u32, PageFault> {
        if let Some(word) = pool.read_physical_word(paddr) {
            return Ok(word);
        }
        let range = self.ram_range(paddr, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.ram[range]);
        Ok(u32::from_le_bytes(word))
    }

    fn ram_range(&self, paddr: PhysAddr, len: usize) -> Result<Range<usize>, PageFault> {
        let start = paddr.as_u32() as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.ram.len() => Ok(start..end),
            _ => Err(PageFault::BusError(paddr)),
        }
    }

    /// Resolve the next chunk of an access that must not cross a page.
    fn store_target(
        &self,
        pool: &PagePool,
        vaddr: VirtAddr,
        len: usize,
    ) -> Result<Range<usize>, PageFault> {
        let paddr = self.walk(pool, vaddr)?;
        if pool.owns(paddr) {
            return Err(PageFault::PageTableWrite(paddr));
        }
        self.ram_range(paddr, len)
    }
}

fn chunk_len(addr: u32, remaining: usize) -> usize {
    let room = (PAGE_SIZE - (addr & (PAGE_SIZE - 1))) as usize;
    room.min(remaining)
}

impl Mmu for SimMmu<'_> {
    fn cr3(&self) -> PhysAddr {
        self.cr3
    }

    unsafe fn set_cr3(&mut self, directory: PhysAddr) {
        self.cr3 = directory.frame_start();
        self.cr3_loads += 1;
    }

    fn cr0(&self) -> Cr0Flags {
        self.cr0
    }

    unsafe fn enable_paging(&mut self) {
        self.cr0 |= Cr0Flags::PAGING;
    }

    fn arena_base(&self, _pool: &PagePool) -> PhysAddr {
        self.arena
    }

    fn read(&self, pool: &PagePool, vaddr: VirtAddr, dst: &mut [u8]) -> Result<(), PageFault> {
        let mut done = 0;
        while done < dst.len() {
            let addr = VirtAddr::new(vaddr.as_u32().wrapping_add(done as u32));
            let len = chunk_len(addr.as_u32(), dst.len() - done);
            let paddr = self.walk(pool, addr)?;

            if pool.owns(paddr) {
                for (i, byte) in dst[done..done + len].iter_mut().enumerate() {
                    let at = paddr.as_u32() + i as u32;
                    let word = self.read_physical_word(pool, PhysAddr::new(at & !3))?;
                    *byte = word.to_le_bytes()[(at & 3) as usize];
                }
            } else {
                let range = self.ram_range(paddr, len)?;
                dst[done..done + len].copy_from_slice(&self.ram[range]);
            }
            done += len;
        }
        Ok(())
    }

    fn write(&mut self, pool: &PagePool, vaddr: VirtAddr, src: &[u8]) -> Result<(), PageFault> {
        let mut done = 0;
        while done < src.len() {
            let addr = VirtAddr::new(vaddr.as_u32().wrapping_add(done as u32));
            let len = chunk_len(addr.as_u32(), src.len() - done);
            let range = self.store_target(pool, addr, len)?;
            self.ram[range].copy_from_slice(&src[done..done + len]);
            done += len;
        }
        Ok(())
    }

    fn zero(&mut self, pool: &PagePool, vaddr: VirtAddr, len: u32) -> Result<(), PageFault> {
        let total = len as usize;
        let mut done = 0;
        while done < total {
            let addr = VirtAddr::new(vaddr.as_u32().wrapping_add(done as u32));
            let len = chunk_len(addr.as_u32(), total - done);
            let range = self.store_target(pool, addr, len)?;
            self.ram[range].fill(0);
            done += len;
        }
        Ok(())
    }
}
