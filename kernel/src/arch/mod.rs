//! Architecture seam for the paging layer.
//!
//! Everything the page-table code needs from the CPU goes through the
//! [`Mmu`] trait: the control registers, and loads and stores through the
//! currently active address space. The real i386 implementation lives in
//! [`x86`]; [`crate::sim`] provides a software MMU for host testing.

#[cfg(target_arch = "x86")]
pub mod x86;

use core::fmt;

use bitflags::bitflags;

use crate::memory::address::{PhysAddr, VirtAddr};
use crate::memory::page_table::PagePool;

bitflags! {
    /// Bits of the CR0 control register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Cr0Flags: u32 {
        /// Protected mode.
        const PROTECTED_MODE_ENABLE = 1 << 0;
        /// Monitor coprocessor.
        const MONITOR_COPROCESSOR = 1 << 1;
        /// x87 emulation.
        const EMULATE_COPROCESSOR = 1 << 2;
        /// Task switched.
        const TASK_SWITCHED = 1 << 3;
        /// Extension type (always 1 on i486+).
        const EXTENSION_TYPE = 1 << 4;
        /// Native x87 error reporting.
        const NUMERIC_ERROR = 1 << 5;
        /// Supervisor writes honour read-only pages.
        const WRITE_PROTECT = 1 << 16;
        /// Alignment checking.
        const ALIGNMENT_MASK = 1 << 18;
        /// Not write-through.
        const NOT_WRITE_THROUGH = 1 << 29;
        /// Cache disable.
        const CACHE_DISABLE = 1 << 30;
        /// Paging.
        const PAGING = 1 << 31;
    }
}

/// A load or store through the active address space that could not
/// complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFault {
    /// The directory or table entry covering the address is not present.
    NotPresent(VirtAddr),
    /// A data store resolved into a page-table frame.
    PageTableWrite(PhysAddr),
    /// The physical address lies outside installed memory.
    BusError(PhysAddr),
}

impl fmt::Display for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPresent(vaddr) => write!(f, "page not present: {:#x}", vaddr),
            Self::PageTableWrite(paddr) => write!(f, "store into page-table frame: {:#x}", paddr),
            Self::BusError(paddr) => write!(f, "no memory at physical address {:#x}", paddr),
        }
    }
}

/// CPU memory-management unit as seen by the paging layer.
///
/// All loads and stores take the page-table arena so a software
/// implementation can walk the same tables the hardware would.
pub trait Mmu {
    /// Physical address of the active page directory.
    fn cr3(&self) -> PhysAddr;

    /// Load a new page directory.
    ///
    /// # Safety
    ///
    /// With paging enabled, the new directory must map the executing code
    /// and its data.
    unsafe fn set_cr3(&mut self, directory: PhysAddr);

    /// Current CR0 contents.
    fn cr0(&self) -> Cr0Flags;

    /// Set CR0.PG.
    ///
    /// # Safety
    ///
    /// CR3 must hold a directory that identity-maps the executing code,
    /// its stack and its data.
    unsafe fn enable_paging(&mut self);

    /// Check if paging is enforced.
    fn paging_enabled(&self) -> bool {
        self.cr0().contains(Cr0Flags::PAGING)
    }

    /// Invalidate every non-global cached translation.
    fn flush_tlb(&mut self) {
        let cr3 = self.cr3();
        // SAFETY: reloading the directory that is already active changes
        // no mapping.
        unsafe { self.set_cr3(cr3) }
    }

    /// Physical address at which the page-table arena resides.
    fn arena_base(&self, pool: &PagePool) -> PhysAddr;

    /// Copy bytes out of the active address space.
    fn read(&self, pool: &PagePool, vaddr: VirtAddr, dst: &mut [u8]) -> Result<(), PageFault>;

    /// Copy bytes into the active address space.
    fn write(&mut self, pool: &PagePool, vaddr: VirtAddr, src: &[u8]) -> Result<(), PageFault>;

    /// Zero `len` bytes of the active address space.
    fn zero(&mut self, pool: &PagePool, vaddr: VirtAddr, len: u32) -> Result<(), PageFault>;

    /// Load one little-endian 32-bit word.
    fn load_word(&self, pool: &PagePool, vaddr: VirtAddr) -> Result<u32, PageFault> {
        let mut word = [0u8; 4];
        self.read(pool, vaddr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }
}
