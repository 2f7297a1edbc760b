//! Shared helpers for integration tests.

#![allow(dead_code)]

use kboot86_kernel::boot;
use kboot86_kernel::config::PHYS_MEMORY_LIMIT;
use kboot86_kernel::sim::SimMmu;
use kboot86_kernel::{Paging, PhysAddr};

pub use kboot86_kernel::loader::testing::ElfBuilder;

/// Physical frame the page-table arena is placed at.
pub const ARENA: PhysAddr = PhysAddr::new(0x0009_0000);

/// Segment permission bits.
pub const RX: u32 = 0b101;
pub const RW: u32 = 0b110;

/// 16 MiB of physical memory filled with `fill`.
pub fn ram(fill: u8) -> Vec<u8> {
    vec![fill; PHYS_MEMORY_LIMIT as usize]
}

/// An address space with paging enabled, as left by the boot sequence.
pub fn booted(ram: &mut [u8]) -> Paging<SimMmu<'_>> {
    let mut paging = Paging::new(SimMmu::new(ram, ARENA));
    unsafe { boot::bootstrap_paging(&mut paging).unwrap() };
    paging
}
