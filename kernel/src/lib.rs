//! kboot86 kernel library
//!
//! Boot-time program loading for a 32-bit x86 kernel: two-level paging
//! with an identity-mapped low region and a self-mapped page directory,
//! and an ELF32 loader that maps an executable's segments into it.
//!
//! # Layout
//!
//! - [`memory`]: addresses, page tables, the paging primitives and the
//!   boot-time identity map
//! - [`loader`]: ELF32 validation, segment mapping and diagnostic dumps
//! - [`arch`]: the MMU seam and its i386 implementation
//! - [`sim`]: a software MMU for running everything on a host
//! - [`boot`]: the boot sequence steps built on the above
//!
//! The crate is `no_std` and needs no allocator.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(any(test, feature = "test-util"))]
extern crate alloc;

pub mod arch;
pub mod boot;
pub mod config;
pub mod loader;
pub mod logger;
pub mod memory;
pub mod sim;

pub use config::LoaderLimits;
pub use memory::{Paging, PagingError, PhysAddr, VirtAddr};
