//! ELF Segment Mapper
//!
//! Places each `PT_LOAD` segment of a validated image at its declared
//! virtual and physical address in the kernel address space.
//!
//! # Process
//!
//! 1. Validate the file header
//! 2. Check the summed `p_memsz` of all `PT_LOAD` segments against the budget
//! 3. For each `PT_LOAD` segment, in table order:
//!    a. Check alignment and ceilings of both addresses
//!    b. Walk the segment one page at a time, mapping each page just
//!       before it is first written
//!    c. Copy the file-backed bytes, then zero up to `p_memsz`
//! 4. Return the entry point from the header
//!
//! A failure part-way through leaves every page mapped so far in place.

use core::fmt;

use super::elf::{Elf32Image, Elf32ProgramHeader, ElfError};
use crate::arch::{Mmu, PageFault};
use crate::config::{LoaderLimits, PAGE_SIZE};
use crate::memory::address::{PhysAddr, VirtAddr};
use crate::memory::paging::{Paging, PagingError};

/// Which of a segment's two addresses a check refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// `p_paddr`
    Physical,
    /// `p_vaddr`
    Virtual,
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Physical => write!(f, "physical"),
            Self::Virtual => write!(f, "virtual"),
        }
    }
}

/// Broad class of a load failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The image is not a supported or well-formed executable.
    Validation,
    /// The image needs more memory than the loader grants.
    Budget,
    /// A segment address is unaligned or above its ceiling.
    Range,
    /// Establishing or filling a page failed.
    Mapping,
}

/// Errors that can occur while mapping an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// Header validation failed
    Unsupported(ElfError),
    /// Total `PT_LOAD` memory exceeds the budget
    TooLarge { required: u64, supported: u32 },
    /// Segment start address is not page-aligned
    Misaligned { kind: AddressKind, addr: u32 },
    /// Segment end lies above the ceiling
    OutOfRange { kind: AddressKind, addr: u32 },
    /// Segment claims more file bytes than memory bytes
    FileSizeExceedsMemSize { filesz: u32, memsz: u32 },
    /// Segment data extends beyond the image
    SegmentOutOfBounds { offset: u32, filesz: u32 },
    /// Mapping a page holding file-backed bytes failed
    MapFileBacked { vaddr: VirtAddr, source: PagingError },
    /// Mapping a page of the zero-filled tail failed
    MapZeroFill { vaddr: VirtAddr, source: PagingError },
    /// Copying or zeroing through the new mapping faulted
    Fault(PageFault),
}

impl LoadError {
    /// Class of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported(_)
            | Self::FileSizeExceedsMemSize { .. }
            | Self::SegmentOutOfBounds { .. } => ErrorKind::Validation,
            Self::TooLarge { .. } => ErrorKind::Budget,
            Self::Misaligned { .. } | Self::OutOfRange { .. } => ErrorKind::Range,
            Self::MapFileBacked { .. } | Self::MapZeroFill { .. } | Self::Fault(_) => {
                ErrorKind::Mapping
            }
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(err) => write!(f, "{}", err),
            Self::TooLarge { required, supported } => {
                write!(f, "required {} bytes, only {} supported", required, supported)
            }
            Self::Misaligned { kind, addr } => {
                write!(f, "starting {} address not page-aligned: {:x}", kind, addr)
            }
            Self::OutOfRange { kind, addr } => {
                write!(f, "{} address out of range: {:x}", kind, addr)
            }
            Self::FileSizeExceedsMemSize { filesz, memsz } => {
                write!(f, "file size {:#x} exceeds memory size {:#x}", filesz, memsz)
            }
            Self::SegmentOutOfBounds { offset, filesz } => write!(
                f,
                "segment data out of bounds: offset {:#x}, size {:#x}",
                offset, filesz
            ),
            Self::MapFileBacked { vaddr, source } => {
                write!(f, "mapping of an in-image page failed at {:#x}: {}", vaddr, source)
            }
            Self::MapZeroFill { vaddr, source } => {
                write!(f, "mapping of a to-be-zeroed page failed at {:#x}: {}", vaddr, source)
            }
            Self::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

impl From<ElfError> for LoadError {
    fn from(err: ElfError) -> Self {
        Self::Unsupported(err)
    }
}

impl From<PageFault> for LoadError {
    fn from(fault: PageFault) -> Self {
        Self::Fault(fault)
    }
}

/// Map every `PT_LOAD` segment of `image` and return its entry point.
///
/// Uses the kernel's [`LoaderLimits`]. The entry point is returned
/// verbatim and is not checked against the mapped ranges.
pub fn map<M: Mmu>(paging: &mut Paging<M>, image: &[u8]) -> Result<VirtAddr, LoadError> {
    map_with_limits(paging, image, &LoaderLimits::default())
}

/// Like [`map`], with explicit ceilings and budget.
pub fn map_with_limits<M: Mmu>(
    paging: &mut Paging<M>,
    image: &[u8],
    limits: &LoaderLimits,
) -> Result<VirtAddr, LoadError> {
    let image = Elf32Image::parse(image)?;
    image.validate()?;
    let headers = image.program_headers()?;

    let required: u64 = headers
        .iter()
        .filter(|ph| ph.is_load())
        .map(|ph| ph.p_memsz as u64)
        .sum();
    if required > limits.memory_budget as u64 {
        return Err(LoadError::TooLarge {
            required,
            supported: limits.memory_budget,
        });
    }

    let mut loaded = 0;
    for ph in headers.iter().filter(|ph| ph.is_load()) {
        map_segment(paging, &image, &ph, limits)?;
        loaded += 1;
    }

    log::info!(
        "mapped {} segments ({:#x} bytes), entry {:#x}",
        loaded,
        required,
        image.entry()
    );
    Ok(image.entry())
}

/// Check a segment's start alignment and end ceilings.
///
/// Physical checks run before virtual ones; alignment before range.
pub fn check_segment(
    paddr: u32,
    vaddr: u32,
    memsz: u32,
    limits: &LoaderLimits,
) -> Result<(), LoadError> {
    if PhysAddr::aligned(paddr).is_err() {
        return Err(LoadError::Misaligned {
            kind: AddressKind::Physical,
            addr: paddr,
        });
    }
    if VirtAddr::aligned(vaddr).is_err() {
        return Err(LoadError::Misaligned {
            kind: AddressKind::Virtual,
            addr: vaddr,
        });
    }
    if paddr as u64 + memsz as u64 > limits.phys_limit as u64 {
        return Err(LoadError::OutOfRange {
            kind: AddressKind::Physical,
            addr: paddr,
        });
    }
    if vaddr as u64 + memsz as u64 > limits.virt_limit as u64 {
        return Err(LoadError::OutOfRange {
            kind: AddressKind::Virtual,
            addr: vaddr,
        });
    }
    Ok(())
}

fn map_segment<M: Mmu>(
    paging: &mut Paging<M>,
    image: &Elf32Image<'_>,
    ph: &Elf32ProgramHeader,
    limits: &LoaderLimits,
) -> Result<(), LoadError> {
    let (paddr, vaddr) = (ph.p_paddr, ph.p_vaddr);
    let (offset, filesz, memsz) = (ph.p_offset, ph.p_filesz, ph.p_memsz);
    let writable = ph.is_writable();

    check_segment(paddr, vaddr, memsz, limits)?;
    if filesz > memsz {
        return Err(LoadError::FileSizeExceedsMemSize { filesz, memsz });
    }
    let data = image
        .segment_data(ph)
        .ok_or(LoadError::SegmentOutOfBounds { offset, filesz })?;

    log::debug!(
        "segment vaddr {:#x} paddr {:#x} filesz {:#x} memsz {:#x} {:?}",
        vaddr,
        paddr,
        filesz,
        memsz,
        ph.flags()
    );

    // Both ends fit below their ceilings, so these sums cannot wrap.
    let mut done = 0;
    while done < memsz {
        let page = VirtAddr::new(vaddr + done);
        let frame = PhysAddr::new(paddr + done);
        let len = (memsz - done).min(PAGE_SIZE);

        if done < filesz {
            paging
                .map(page, frame, writable)
                .map_err(|source| LoadError::MapFileBacked {
                    vaddr: page,
                    source,
                })?;

            let copy = (filesz - done).min(len);
            paging.write(page, &data[done as usize..(done + copy) as usize])?;
            if copy < len {
                paging.zero(VirtAddr::new(page.as_u32() + copy), len - copy)?;
            }
        } else {
            paging
                .map(page, frame, writable)
                .map_err(|source| LoadError::MapZeroFill {
                    vaddr: page,
                    source,
                })?;
            paging.zero(page, len)?;
        }

        done += len;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KERNEL_MEMORY_BUDGET, KERNEL_PADDR_LIMIT, PHYS_MEMORY_LIMIT};
    use crate::loader::elf::{SegmentFlags, PT_NOTE};
    use crate::loader::testing::ElfBuilder;
    use crate::memory::bootstrap;
    use crate::sim::SimMmu;

    const ARENA: PhysAddr = PhysAddr::new(0x0009_0000);
    const RX: u32 = SegmentFlags::READ.bits() | SegmentFlags::EXECUTE.bits();
    const RW: u32 = SegmentFlags::READ.bits() | SegmentFlags::WRITE.bits();

    fn booted(ram: &mut [u8]) -> Paging<SimMmu<'_>> {
        let mut paging = Paging::new(SimMmu::new(ram, ARENA));
        bootstrap::init(&mut paging).unwrap();
        unsafe { paging.enable().unwrap() };
        paging
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(LoadError::Unsupported(ElfError::NotI386).kind(), ErrorKind::Validation);
        assert_eq!(
            LoadError::TooLarge {
                required: 1,
                supported: 0
            }
            .kind(),
            ErrorKind::Budget
        );
        assert_eq!(
            LoadError::Misaligned {
                kind: AddressKind::Virtual,
                addr: 1
            }
            .kind(),
            ErrorKind::Range
        );
        assert_eq!(
            LoadError::MapZeroFill {
                vaddr: VirtAddr::new(0),
                source: PagingError::PoolExhausted
            }
            .kind(),
            ErrorKind::Mapping
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            LoadError::Misaligned {
                kind: AddressKind::Physical,
                addr: 0x0010_0010
            }
            .to_string(),
            "starting physical address not page-aligned: 100010"
        );
        assert_eq!(
            LoadError::OutOfRange {
                kind: AddressKind::Virtual,
                addr: 0xffb0_0000
            }
            .to_string(),
            "virtual address out of range: ffb00000"
        );
        assert_eq!(
            LoadError::TooLarge {
                required: 0x0090_0000,
                supported: KERNEL_MEMORY_BUDGET
            }
            .to_string(),
            "required 9437184 bytes, only 8388608 supported"
        );
    }

    #[test]
    fn test_check_segment_order() {
        let limits = LoaderLimits::default();
        assert_eq!(
            check_segment(0x0010_0001, 0x0010_0001, 0x1000, &limits),
            Err(LoadError::Misaligned {
                kind: AddressKind::Physical,
                addr: 0x0010_0001
            })
        );
        assert_eq!(
            check_segment(0x0010_0000, 0x0010_0001, 0x1000, &limits),
            Err(LoadError::Misaligned {
                kind: AddressKind::Virtual,
                addr: 0x0010_0001
            })
        );
        assert_eq!(
            check_segment(0x00ff_f000, 0xffff_f000, 0x2000, &limits),
            Err(LoadError::OutOfRange {
                kind: AddressKind::Physical,
                addr: 0x00ff_f000
            })
        );
    }

    #[test]
    fn test_check_segment_ceilings_are_exclusive() {
        let limits = LoaderLimits::default();
        assert!(check_segment(KERNEL_PADDR_LIMIT - 0x1000, 0x0010_0000, 0x1000, &limits).is_ok());
        assert!(check_segment(0x0010_0000, 0xffbf_f000, 0x1000, &limits).is_ok());
        assert_eq!(
            check_segment(0x0010_0000, 0xffbf_f000, 0x1001, &limits),
            Err(LoadError::OutOfRange {
                kind: AddressKind::Virtual,
                addr: 0xffbf_f000
            })
        );
        assert!(check_segment(0xffff_f000, 0, 0x2000, &limits).is_err());
    }

    #[test]
    fn test_zero_load_segments() {
        let mut ram = vec![0u8; PHYS_MEMORY_LIMIT as usize];
        let mut paging = booted(&mut ram);
        let tables = paging.pool().tables_in_use();

        let elf = ElfBuilder::new(0xdead_b000)
            .segment(PT_NOTE, 0x10, 0x10, &[1, 2, 3], 3, 0)
            .build();
        assert_eq!(map(&mut paging, &elf), Ok(VirtAddr::new(0xdead_b000)));
        assert_eq!(paging.pool().tables_in_use(), tables);
    }

    #[test]
    fn test_empty_program_table_ignores_offset() {
        let mut ram = vec![0u8; PHYS_MEMORY_LIMIT as usize];
        let mut paging = booted(&mut ram);
        let tables = paging.pool().tables_in_use();

        let mut elf = ElfBuilder::new(0x0010_0000).build();
        elf[28..32].copy_from_slice(&0x1000u32.to_le_bytes()); // e_phoff past the end
        assert!(elf.len() < 0x1000);

        assert_eq!(map(&mut paging, &elf), Ok(VirtAddr::new(0x0010_0000)));
        assert_eq!(paging.pool().tables_in_use(), tables);
    }

    #[test]
    fn test_budget_counts_load_segments_only() {
        let mut ram = vec![0u8; PHYS_MEMORY_LIMIT as usize];
        let mut paging = booted(&mut ram);
        let elf = ElfBuilder::new(0x0010_0000)
            .load(0x0010_0000, &[0x90; 16], 0x1000, RX)
            .segment(PT_NOTE, 0, 0, &[], 0x10_0000, 0)
            .build();

        let limits = LoaderLimits::default().with_budget(0x1000);
        assert!(map_with_limits(&mut paging, &elf, &limits).is_ok());

        let limits = LoaderLimits::default().with_budget(0xfff);
        let err = map_with_limits(&mut paging, &elf, &limits).unwrap_err();
        assert_eq!(
            err,
            LoadError::TooLarge {
                required: 0x1000,
                supported: 0xfff
            }
        );
        assert_eq!(err.kind(), ErrorKind::Budget);
    }

    #[test]
    fn test_file_size_exceeds_mem_size() {
        let mut ram = vec![0u8; PHYS_MEMORY_LIMIT as usize];
        let mut paging = booted(&mut ram);
        let elf = ElfBuilder::new(0x0040_0000)
            .load(0x0040_0000, &[0xaa; 0x20], 0x10, RW)
            .build();
        assert_eq!(
            map(&mut paging, &elf),
            Err(LoadError::FileSizeExceedsMemSize {
                filesz: 0x20,
                memsz: 0x10
            })
        );
    }

    #[test]
    fn test_segment_data_out_of_bounds() {
        let mut ram = vec![0u8; PHYS_MEMORY_LIMIT as usize];
        let mut paging = booted(&mut ram);
        let mut elf = ElfBuilder::new(0x0040_0000)
            .load(0x0040_0000, &[0xaa; 0x20], 0x1000, RW)
            .build();
        elf.truncate(elf.len() - 1);

        let err = map(&mut paging, &elf).unwrap_err();
        assert!(matches!(err, LoadError::SegmentOutOfBounds { filesz: 0x20, .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_partial_file_page_zeroes_rest() {
        let mut ram = vec![0xccu8; PHYS_MEMORY_LIMIT as usize];
        let mut paging = booted(&mut ram);
        let data: Vec<u8> = (1..=0x30).collect();
        let elf = ElfBuilder::new(0x0040_0000)
            .load(0x0040_0000, &data, 0x1800, RW)
            .build();

        map(&mut paging, &elf).unwrap();

        let mut page = vec![0u8; 0x1800];
        paging.read(VirtAddr::new(0x0040_0000), &mut page).unwrap();
        assert_eq!(&page[..0x30], &data[..]);
        assert!(page[0x30..].iter().all(|&byte| byte == 0));
        // bytes past memsz are untouched
        let mut tail = [0u8; 1];
        paging.read(VirtAddr::new(0x0040_1800), &mut tail).unwrap();
        assert_eq!(tail, [0xcc]);
    }

    #[test]
    fn test_text_segment_maps_read_only() {
        let mut ram = vec![0u8; PHYS_MEMORY_LIMIT as usize];
        let mut paging = booted(&mut ram);
        let elf = ElfBuilder::new(0x8000_0000)
            .segment(crate::loader::elf::PT_LOAD, 0x8000_0000, 0x0020_0000, &[0xc3], 0x1000, RX)
            .build();

        map(&mut paging, &elf).unwrap();
        let vaddr = VirtAddr::new(0x8000_0000);
        assert_eq!(paging.translate(vaddr), Some(PhysAddr::new(0x0020_0000)));
        let entry = paging
            .pool()
            .table(vaddr.directory_index())
            .unwrap()
            .entry(vaddr.table_index());
        assert!(!entry.is_writable());
        assert_eq!(paging.mmu().ram()[0x0020_0000], 0xc3);
    }
}
