//! Boot sequence glue.
//!
//! Brings up paging and loads a program image, reporting progress through
//! the logger the way the boot console expects. A failed load is returned
//! to the caller, which may fall back to its shell.

use crate::arch::Mmu;
use crate::loader::{segment_loader, LoadError};
use crate::memory::address::VirtAddr;
use crate::memory::bootstrap;
use crate::memory::paging::{Paging, PagingError};

/// Build the boot address space and turn paging on.
///
/// Page 0 is left unmapped so null dereferences fault.
///
/// # Safety
///
/// All code, stack and data in use must lie below the identity-mapped
/// ceiling.
pub unsafe fn bootstrap_paging<M: Mmu>(paging: &mut Paging<M>) -> Result<(), PagingError> {
    log::info!("initializing paging...");
    bootstrap::init(paging)?;
    paging.unmap(VirtAddr::new(0))?;

    // SAFETY: forwarded to the caller.
    unsafe { paging.enable()? };

    log::info!("CR0: {:08x}", paging.mmu().cr0().bits());
    Ok(())
}

/// Map `image` and return the entry point to jump to.
pub fn load_program<M: Mmu>(paging: &mut Paging<M>, image: &[u8]) -> Result<VirtAddr, LoadError> {
    let entry = segment_loader::map(paging, image).map_err(|err| {
        log::error!("cannot load program: {}", err);
        err
    })?;

    match paging.translate(entry) {
        Some(paddr) => log::info!("jmp addr: {:#x} (paddr {:#x})", entry, paddr),
        None => log::warn!("jmp addr: {:#x} is not mapped", entry),
    }
    Ok(entry)
}

/// [`bootstrap_paging`] on the kernel's own address space.
///
/// # Safety
///
/// See [`bootstrap_paging`]. Interrupts must be disabled.
#[cfg(target_arch = "x86")]
pub unsafe fn bootstrap_kernel_paging() -> Result<(), PagingError> {
    let mut paging = crate::memory::KERNEL_PAGING.lock();
    // SAFETY: forwarded to the caller.
    unsafe { bootstrap_paging(&mut *paging) }
}

/// [`load_program`] on the kernel's own address space.
#[cfg(target_arch = "x86")]
pub fn load_kernel_program(image: &[u8]) -> Result<VirtAddr, LoadError> {
    let mut paging = crate::memory::KERNEL_PAGING.lock();
    load_program(&mut *paging, image)
}
