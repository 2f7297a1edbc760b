//! Loader and paging configuration constants.
//!
//! This module contains the compile-time memory layout of the boot
//! environment. Ceilings are exclusive: a range `[addr, addr + size)` fits
//! below a limit when `addr + size <= limit`.

/// Page size (4 KiB).
pub const PAGE_SIZE: u32 = 4096;

/// Number of entries in a page directory or page table.
pub const ENTRY_COUNT: usize = 1024;

/// Bytes of address space covered by one page-directory entry (4 MiB).
pub const DIRECTORY_SPAN: u32 = PAGE_SIZE * ENTRY_COUNT as u32;

/// Physical memory identity-mapped at boot (16 MiB).
///
/// Also the ceiling for any frame handed to the page-mapping primitive.
pub const PHYS_MEMORY_LIMIT: u32 = 0x0100_0000;

/// Ceiling for `p_paddr + p_memsz` of a loadable segment.
pub const KERNEL_PADDR_LIMIT: u32 = PHYS_MEMORY_LIMIT;

/// Ceiling for `p_vaddr + p_memsz` of a loadable segment.
///
/// Equal to the base of the self-map window so no segment can overlap it.
pub const KERNEL_VADDR_LIMIT: u32 = SELF_MAP_BASE;

/// Total memory all loadable segments of one image may claim (8 MiB).
pub const KERNEL_MEMORY_BUDGET: u32 = 0x0080_0000;

/// Number of page-table frames in the page-table arena.
pub const PAGE_TABLE_POOL_SIZE: usize = 8;

/// Directory slot that points back at the directory itself.
pub const SELF_MAP_SLOT: usize = ENTRY_COUNT - 1;

/// First virtual address of the self-map window.
///
/// Page table `n` is visible at `SELF_MAP_BASE | n << 12`.
pub const SELF_MAP_BASE: u32 = (SELF_MAP_SLOT as u32) << 22;

/// Virtual address at which the page directory itself is visible.
pub const SELF_MAP_DIRECTORY: u32 = SELF_MAP_BASE | (SELF_MAP_SLOT as u32) << 12;

/// Limits enforced by the segment mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderLimits {
    /// Exclusive ceiling for the physical end of a segment.
    pub phys_limit: u32,
    /// Exclusive ceiling for the virtual end of a segment.
    pub virt_limit: u32,
    /// Maximum sum of `p_memsz` over all loadable segments.
    pub memory_budget: u32,
}

impl LoaderLimits {
    /// Limits of the boot environment.
    pub const fn kernel() -> Self {
        Self {
            phys_limit: KERNEL_PADDR_LIMIT,
            virt_limit: KERNEL_VADDR_LIMIT,
            memory_budget: KERNEL_MEMORY_BUDGET,
        }
    }

    /// Same limits with a different memory budget.
    pub const fn with_budget(self, memory_budget: u32) -> Self {
        Self {
            memory_budget,
            ..self
        }
    }
}

impl Default for LoaderLimits {
    fn default() -> Self {
        Self::kernel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_map_addresses() {
        assert_eq!(SELF_MAP_BASE, 0xFFC0_0000);
        assert_eq!(SELF_MAP_DIRECTORY, 0xFFFF_F000);
        assert_eq!(DIRECTORY_SPAN, 0x0040_0000);
    }

    #[test]
    fn test_limits_fit_identity_map() {
        assert!(KERNEL_PADDR_LIMIT <= PHYS_MEMORY_LIMIT);
        assert!(KERNEL_MEMORY_BUDGET <= KERNEL_PADDR_LIMIT);
        assert_eq!(PHYS_MEMORY_LIMIT % DIRECTORY_SPAN, 0);
    }

    #[test]
    fn test_with_budget_keeps_ceilings() {
        let limits = LoaderLimits::default().with_budget(0x1000);
        assert_eq!(limits.memory_budget, 0x1000);
        assert_eq!(limits.phys_limit, KERNEL_PADDR_LIMIT);
        assert_eq!(limits.virt_limit, KERNEL_VADDR_LIMIT);
    }
}
