//! ELF32 Parser
//!
//! Read-only views over an i386 executable image held in memory. Nothing
//! is copied out of the image except the fixed-size headers.

use core::fmt;
use core::mem::size_of;

use bitflags::bitflags;

use crate::memory::address::VirtAddr;

/// ELF magic number: 0x7F 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class: 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF data encoding: little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF type: relocatable
pub const ET_REL: u16 = 1;

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// Machine type: Intel 80386
pub const EM_386: u16 = 3;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;

/// Program header type: auxiliary information
pub const PT_NOTE: u32 = 4;

/// Section type: symbol table
pub const SHT_SYMTAB: u32 = 2;

/// Section type: string table
pub const SHT_STRTAB: u32 = 3;

/// ELF32 file header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32Header {
    /// Magic number and other info
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point virtual address
    pub e_entry: u32,
    /// Program header table file offset
    pub e_phoff: u32,
    /// Section header table file offset
    pub e_shoff: u32,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header table entry size
    pub e_phentsize: u16,
    /// Program header table entry count
    pub e_phnum: u16,
    /// Section header table entry size
    pub e_shentsize: u16,
    /// Section header table entry count
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

/// ELF32 program header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment file offset
    pub p_offset: u32,
    /// Segment virtual address
    pub p_vaddr: u32,
    /// Segment physical address
    pub p_paddr: u32,
    /// Segment size in file
    pub p_filesz: u32,
    /// Segment size in memory
    pub p_memsz: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Segment alignment
    pub p_align: u32,
}

/// ELF32 section header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32SectionHeader {
    /// Section name (string table index)
    pub sh_name: u32,
    /// Section type
    pub sh_type: u32,
    /// Section flags
    pub sh_flags: u32,
    /// Section virtual address
    pub sh_addr: u32,
    /// Section file offset
    pub sh_offset: u32,
    /// Section size
    pub sh_size: u32,
    /// Link to another section
    pub sh_link: u32,
    /// Additional section information
    pub sh_info: u32,
    /// Section alignment
    pub sh_addralign: u32,
    /// Entry size if section holds table
    pub sh_entsize: u32,
}

/// ELF32 symbol table entry
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32Symbol {
    /// Symbol name (string table index)
    pub st_name: u32,
    /// Symbol value
    pub st_value: u32,
    /// Symbol size
    pub st_size: u32,
    /// Type and binding
    pub st_info: u8,
    /// Visibility
    pub st_other: u8,
    /// Section index
    pub st_shndx: u16,
}

/// Marker for plain-old-data records that can be read from any byte
/// offset of an image.
///
/// # Safety
///
/// Implementors must be `repr(C, packed)` with only integer fields.
pub unsafe trait Record: Copy {}

unsafe impl Record for Elf32Header {}
unsafe impl Record for Elf32ProgramHeader {}
unsafe impl Record for Elf32SectionHeader {}
unsafe impl Record for Elf32Symbol {}

fn read_record<T: Record>(bytes: &[u8], offset: usize) -> Option<T> {
    let end = offset.checked_add(size_of::<T>())?;
    let record = bytes.get(offset..end)?;
    // SAFETY: the range is in bounds and any bit pattern is a valid `T`.
    Some(unsafe { core::ptr::read_unaligned(record.as_ptr() as *const T) })
}

bitflags! {
    /// Segment permission flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Executable
        const EXECUTE = 1 << 0;
        /// Writable
        const WRITE = 1 << 1;
        /// Readable
        const READ = 1 << 2;
    }
}

impl Elf32ProgramHeader {
    /// Check if this is a `PT_LOAD` segment.
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// Permission flags.
    pub fn flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.p_flags)
    }

    /// Check if the segment is writable.
    pub fn is_writable(&self) -> bool {
        self.flags().contains(SegmentFlags::WRITE)
    }
}

/// Symbol type (low nibble of `st_info`).
pub fn symbol_type(info: u8) -> &'static str {
    match info & 0xf {
        0 => "notype",
        1 => "object",
        2 => "func",
        3 => "section",
        4 => "file",
        _ => "other",
    }
}

/// Symbol binding (high nibble of `st_info`).
pub fn symbol_binding(info: u8) -> &'static str {
    match info >> 4 {
        0 => "local",
        1 => "global",
        2 => "weak",
        _ => "other",
    }
}

/// ELF validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Image too small to contain an ELF header
    Truncated,
    /// Invalid ELF magic number
    BadMagic,
    /// Program header entry size is not the ELF32 record size
    ProgramHeaderSize(u16),
    /// Section header entry size is not the ELF32 record size
    SectionHeaderSize(u16),
    /// Not a 32-bit object
    NotElf32,
    /// Not little endian
    NotLittleEndian,
    /// Machine is not i386
    NotI386,
    /// Not an executable
    NotExecutable,
    /// Program header table extends beyond the image
    ProgramTableOutOfBounds,
    /// Section header table extends beyond the image
    SectionTableOutOfBounds,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "image too small for an ELF header"),
            Self::BadMagic => write!(f, "invalid ELF magic number"),
            Self::ProgramHeaderSize(size) => write!(f, "unsupported program header size: {}", size),
            Self::SectionHeaderSize(size) => write!(f, "unsupported section header size: {}", size),
            Self::NotElf32 => write!(f, "not 32-bit"),
            Self::NotLittleEndian => write!(f, "not little-endian"),
            Self::NotI386 => write!(f, "not 386"),
            Self::NotExecutable => write!(f, "not executable"),
            Self::ProgramTableOutOfBounds => write!(f, "program header table out of bounds"),
            Self::SectionTableOutOfBounds => write!(f, "section header table out of bounds"),
        }
    }
}

/// Check that `header` describes an image this loader can map.
///
/// Checks run in a fixed order and the first failure is returned: magic,
/// record sizes, class, data encoding, machine, type.
pub fn validate_header(header: &Elf32Header) -> Result<(), ElfError> {
    if header.e_ident[0..4] != ELF_MAGIC {
        return Err(ElfError::BadMagic);
    }

    let phentsize = header.e_phentsize;
    if phentsize as usize != size_of::<Elf32ProgramHeader>() {
        return Err(ElfError::ProgramHeaderSize(phentsize));
    }

    let shentsize = header.e_shentsize;
    if shentsize as usize != size_of::<Elf32SectionHeader>() {
        return Err(ElfError::SectionHeaderSize(shentsize));
    }

    if header.e_ident[4] != ELFCLASS32 {
        return Err(ElfError::NotElf32);
    }

    if header.e_ident[5] != ELFDATA2LSB {
        return Err(ElfError::NotLittleEndian);
    }

    if header.e_machine != EM_386 {
        return Err(ElfError::NotI386);
    }

    if header.e_type != ET_EXEC {
        return Err(ElfError::NotExecutable);
    }

    Ok(())
}

/// Check whether `image` is an ELF32 little-endian i386 executable.
pub fn is_supported(image: &[u8]) -> Result<(), ElfError> {
    Elf32Image::parse(image)?.validate()
}

/// A borrowed ELF32 image.
#[derive(Clone, Copy)]
pub struct Elf32Image<'a> {
    bytes: &'a [u8],
    header: Elf32Header,
}

impl<'a> Elf32Image<'a> {
    /// Read the file header. Performs no validation beyond its length.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ElfError> {
        let header = read_record::<Elf32Header>(bytes, 0).ok_or(ElfError::Truncated)?;
        Ok(Self { bytes, header })
    }

    /// See [`validate_header`].
    pub fn validate(&self) -> Result<(), ElfError> {
        validate_header(&self.header)
    }

    /// Entry point, verbatim from the header.
    pub fn entry(&self) -> VirtAddr {
        VirtAddr::new(self.header.e_entry)
    }

    /// Program header table. Fails if any entry lies outside the image.
    pub fn program_headers(&self) -> Result<Table<'a, Elf32ProgramHeader>, ElfError> {
        Table::new(self.bytes, self.header.e_phoff, self.header.e_phnum)
            .ok_or(ElfError::ProgramTableOutOfBounds)
    }

    /// Section header table. Fails if any entry lies outside the image.
    pub fn section_headers(&self) -> Result<Table<'a, Elf32SectionHeader>, ElfError> {
        Table::new(self.bytes, self.header.e_shoff, self.header.e_shnum)
            .ok_or(ElfError::SectionTableOutOfBounds)
    }

    /// File-backed bytes of a segment, or `None` if they lie outside the
    /// image.
    pub fn segment_data(&self, ph: &Elf32ProgramHeader) -> Option<&'a [u8]> {
        self.range(ph.p_offset, ph.p_filesz)
    }

    /// Contents of a section, or `None` if they lie outside the image.
    pub fn section_data(&self, sh: &Elf32SectionHeader) -> Option<&'a [u8]> {
        self.range(sh.sh_offset, sh.sh_size)
    }

    fn range(&self, offset: u32, size: u32) -> Option<&'a [u8]> {
        let start = offset as usize;
        let end = start.checked_add(size as usize)?;
        self.bytes.get(start..end)
    }
}

/// A fixed-size table of records inside an image.
#[derive(Clone, Copy)]
pub struct Table<'a, T> {
    bytes: &'a [u8],
    offset: usize,
    count: usize,
    _record: core::marker::PhantomData<T>,
}

impl<'a, T: Record + 'a> Table<'a, T> {
    /// An empty table is valid wherever its offset points.
    fn new(bytes: &'a [u8], offset: u32, count: u16) -> Option<Self> {
        let offset = if count == 0 { 0 } else { offset as usize };
        let len = size_of::<T>().checked_mul(count as usize)?;
        let end = offset.checked_add(len)?;
        if end > bytes.len() {
            return None;
        }
        Some(Self {
            bytes,
            offset,
            count: count as usize,
            _record: core::marker::PhantomData,
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Entry `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.count {
            return None;
        }
        read_record(self.bytes, self.offset + index * size_of::<T>())
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let table = *self;
        (0..self.count).filter_map(move |index| table.get(index))
    }
}

/// Read symbol `index` of a symbol table section.
pub fn symbol_at(section: &[u8], index: usize) -> Option<Elf32Symbol> {
    read_record(section, index.checked_mul(size_of::<Elf32Symbol>())?)
}

/// Read the NUL-terminated string at `offset` of a string table section.
pub fn string_at(strtab: &[u8], offset: u32) -> Option<&str> {
    let tail = strtab.get(offset as usize..)?;
    let end = tail.iter().position(|&byte| byte == 0)?;
    core::str::from_utf8(&tail[..end]).ok()
}
