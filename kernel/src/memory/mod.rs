//! Memory management subsystem.
//!
//! # Components
//!
//! - **Addresses**: alignment-checked 32-bit physical and virtual addresses
//! - **Page tables**: entry encoding and the directory/table arena
//! - **Paging**: map, unmap, enable and translate on one address space
//! - **Bootstrap**: identity map and self-map setup at boot

pub mod address;
pub mod bootstrap;
pub mod page_table;
pub mod paging;

pub use address::{PhysAddr, VirtAddr};
pub use paging::{Paging, PagingError};

#[cfg(target_arch = "x86")]
use {crate::arch::x86::X86Mmu, spin::Mutex};

/// The kernel's only address space.
///
/// The arena is a static inside the identity-mapped range, so its virtual
/// address is also its physical address.
#[cfg(target_arch = "x86")]
pub static KERNEL_PAGING: Mutex<Paging<X86Mmu>> =
    // SAFETY: this is the only `X86Mmu` the kernel creates.
    Mutex::new(Paging::new(unsafe { X86Mmu::new() }));
