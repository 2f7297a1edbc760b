//! Boot-time address space setup.
//!
//! Identity-maps physical memory below [`PHYS_MEMORY_LIMIT`] and installs
//! the self-map entry. Runs once, before paging is enabled.

use super::address::{PhysAddr, VirtAddr};
use super::paging::{Paging, PagingError};
use crate::arch::Mmu;
use crate::config::{PAGE_SIZE, PHYS_MEMORY_LIMIT, SELF_MAP_DIRECTORY};

/// Initialize the page directory and table arena.
///
/// Zeroes every arena frame, maps each frame in `[0, PHYS_MEMORY_LIMIT)`
/// to the same virtual address as writable, then points the last
/// directory slot at the directory. On return the directory is loaded in
/// CR3 but paging is still off.
pub fn init<M: Mmu>(paging: &mut Paging<M>) -> Result<(), PagingError> {
    let base = paging.reset_arena()?;
    log::debug!("page directory at {:#x}", base);

    for frame in (0..PHYS_MEMORY_LIMIT).step_by(PAGE_SIZE as usize) {
        paging.set_entry(VirtAddr::new(frame), PhysAddr::new(frame), true)?;
    }

    paging.install_self_map()?;
    if !paging.is_self_map_active() {
        return Err(PagingError::NotInitialized);
    }

    // SAFETY: paging is off, so loading CR3 changes no translation.
    unsafe { paging.mmu_mut().set_cr3(base) };

    log::info!(
        "identity-mapped {} MiB using {} page tables, self-map at {:#x}",
        PHYS_MEMORY_LIMIT >> 20,
        paging.pool().tables_in_use(),
        SELF_MAP_DIRECTORY
    );
    Ok(())
}

impl<M: Mmu> Paging<M> {
    /// See [`init`].
    pub fn init(&mut self) -> Result<(), PagingError> {
        init(self)
    }
}
