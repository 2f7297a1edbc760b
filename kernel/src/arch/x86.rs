//! i386 MMU access.
//!
//! Control registers are accessed with inline assembly. Loads and stores go
//! straight through the active address space, so a store to an unmapped
//! page raises #PF instead of returning [`PageFault`].

use core::arch::asm;

use super::{Cr0Flags, Mmu, PageFault};
use crate::memory::address::{PhysAddr, VirtAddr};
use crate::memory::page_table::PagePool;

/// The processor's own MMU.
pub struct X86Mmu {
    _private: (),
}

impl X86Mmu {
    /// # Safety
    ///
    /// Only one instance may exist. The caller runs in ring 0 with
    /// interrupts disabled for as long as it is used.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Mmu for X86Mmu {
    fn cr3(&self) -> PhysAddr {
        let value: u32;
        unsafe {
            asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
        }
        PhysAddr::new(value).frame_start()
    }

    unsafe fn set_cr3(&mut self, directory: PhysAddr) {
        unsafe {
            asm!("mov cr3, {}", in(reg) directory.as_u32(), options(nostack, preserves_flags));
        }
    }

    fn cr0(&self) -> Cr0Flags {
        let value: u32;
        unsafe {
            asm!("mov {}, cr0", out(reg) value, options(nomem, nostack, preserves_flags));
        }
        Cr0Flags::from_bits_retain(value)
    }

    unsafe fn enable_paging(&mut self) {
        let cr0 = self.cr0() | Cr0Flags::PAGING;
        unsafe {
            asm!("mov cr0, {}", in(reg) cr0.bits(), options(nostack, preserves_flags));
        }
    }

    // The arena is a static inside the identity-mapped range, so its
    // address is its frame.
    fn arena_base(&self, pool: &PagePool) -> PhysAddr {
        PhysAddr::new(pool as *const PagePool as usize as u32)
    }

    fn read(&self, _pool: &PagePool, vaddr: VirtAddr, dst: &mut [u8]) -> Result<(), PageFault> {
        let src = vaddr.as_u32() as usize as *const u8;
        for (i, byte) in dst.iter_mut().enumerate() {
            // SAFETY: unmapped addresses fault in hardware.
            *byte = unsafe { core::ptr::read_volatile(src.add(i)) };
        }
        Ok(())
    }

    fn write(&mut self, _pool: &PagePool, vaddr: VirtAddr, src: &[u8]) -> Result<(), PageFault> {
        let dst = vaddr.as_u32() as usize as *mut u8;
        // SAFETY: the caller mapped the destination range.
        unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(())
    }

    fn zero(&mut self, _pool: &PagePool, vaddr: VirtAddr, len: u32) -> Result<(), PageFault> {
        let dst = vaddr.as_u32() as usize as *mut u8;
        // SAFETY: the caller mapped the destination range.
        unsafe { core::ptr::write_bytes(dst, 0, len as usize) };
        Ok(())
    }

    fn load_word(&self, _pool: &PagePool, vaddr: VirtAddr) -> Result<u32, PageFault> {
        let src = vaddr.as_u32() as usize as *const u32;
        // SAFETY: self-map addresses are word-aligned and mapped once the
        // directory is active.
        Ok(unsafe { core::ptr::read_volatile(src) })
    }
}
