//! 32-bit physical and virtual address types.
//!
//! A virtual address splits into `| directory index | table index | offset |`
//! of 10, 10 and 12 bits.

use core::fmt;

use crate::config::PAGE_SIZE;

const OFFSET_MASK: u32 = PAGE_SIZE - 1;

/// Physical address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u32);

/// Virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u32);

/// An address that was required to be page-aligned was not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressNotAligned(pub u32);

impl PhysAddr {
    /// Create a new physical address.
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Create a physical address that must start a frame.
    pub const fn aligned(addr: u32) -> Result<Self, AddressNotAligned> {
        if addr & OFFSET_MASK == 0 {
            Ok(Self(addr))
        } else {
            Err(AddressNotAligned(addr))
        }
    }

    /// Get the raw address value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Check if the address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.0 & OFFSET_MASK == 0
    }

    /// Round down to the start of the containing frame.
    pub const fn frame_start(self) -> Self {
        Self(self.0 & !OFFSET_MASK)
    }

    /// Offset within the containing frame.
    pub const fn frame_offset(self) -> u32 {
        self.0 & OFFSET_MASK
    }

    /// Add `rhs`, or `None` on 32-bit overflow.
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl VirtAddr {
    /// Create a new virtual address.
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Create a virtual address that must start a page.
    pub const fn aligned(addr: u32) -> Result<Self, AddressNotAligned> {
        if addr & OFFSET_MASK == 0 {
            Ok(Self(addr))
        } else {
            Err(AddressNotAligned(addr))
        }
    }

    /// Build an address from its directory index, table index and offset.
    pub const fn from_indices(directory: usize, table: usize, offset: u32) -> Self {
        Self(
            ((directory as u32 & 0x3ff) << 22)
                | ((table as u32 & 0x3ff) << 12)
                | (offset & OFFSET_MASK),
        )
    }

    /// Get the raw address value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Check if the address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.0 & OFFSET_MASK == 0
    }

    /// Offset within the containing page (bits 0-11).
    pub const fn page_offset(self) -> u32 {
        self.0 & OFFSET_MASK
    }

    /// Page directory index (bits 22-31).
    pub const fn directory_index(self) -> usize {
        (self.0 >> 22) as usize
    }

    /// Page table index (bits 12-21).
    pub const fn table_index(self) -> usize {
        ((self.0 >> 12) & 0x3ff) as usize
    }

    /// Add `rhs`, or `None` on 32-bit overflow.
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl From<PhysAddr> for u32 {
    fn from(addr: PhysAddr) -> Self {
        addr.0
    }
}

impl From<VirtAddr> for u32 {
    fn from(addr: VirtAddr) -> Self {
        addr.0
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#010x})", self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
