//! ELF Binary Loader
//!
//! This module validates ELF32 i386 executables already resident in memory
//! and maps their loadable segments into the kernel address space.
//!
//! # ELF32 Format Support
//!
//! - ELF32 header validation (magic, record sizes, class, encoding,
//!   machine, type)
//! - Program header (LOAD segments)
//! - Section header (symbol table dump only)
//!
//! Relocation and dynamic linking are not supported.

pub mod display;
pub mod elf;
pub mod segment_loader;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use display::{display, display_segments, display_symbols};
pub use elf::{is_supported, Elf32Image, ElfError};
pub use segment_loader::{map, map_with_limits, ErrorKind, LoadError};
