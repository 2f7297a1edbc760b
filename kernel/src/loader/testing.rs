//! In-memory ELF32 image builder for tests.
//!
//! Enabled for this crate's unit tests and, through the `test-util`
//! feature, for its integration tests.

use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use super::elf::{ELF_MAGIC, EM_386, ET_EXEC, PT_LOAD, SHT_STRTAB, SHT_SYMTAB};

struct Segment {
    p_type: u32,
    vaddr: u32,
    paddr: u32,
    data: Vec<u8>,
    memsz: u32,
    flags: u32,
}

struct Symbol {
    name: String,
    value: u32,
    size: u32,
    info: u8,
}

/// Builds i386 executables: header, program headers, segment data and an
/// optional symbol table, laid out in that order.
pub struct ElfBuilder {
    entry: u32,
    segments: Vec<Segment>,
    symbols: Vec<Symbol>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn segment(
        mut self,
        p_type: u32,
        vaddr: u32,
        paddr: u32,
        data: &[u8],
        memsz: u32,
        flags: u32,
    ) -> Self {
        self.segments.push(Segment {
            p_type,
            vaddr,
            paddr,
            data: data.to_vec(),
            memsz,
            flags,
        });
        self
    }

    /// A `PT_LOAD` segment with `p_paddr == p_vaddr`.
    pub fn load(self, vaddr: u32, data: &[u8], memsz: u32, flags: u32) -> Self {
        self.segment(PT_LOAD, vaddr, vaddr, data, memsz, flags)
    }

    pub fn symbol(mut self, name: &str, value: u32, size: u32, info: u8) -> Self {
        self.symbols.push(Symbol {
            name: name.to_string(),
            value,
            size,
            info,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phoff = 52u32;
        let mut data_offset = phoff + 32 * self.segments.len() as u32;

        let mut elf = vec![0u8; data_offset as usize];
        elf[0..4].copy_from_slice(&ELF_MAGIC);
        elf[4] = 1; // 32-bit
        elf[5] = 1; // little endian
        elf[6] = 1; // version
        put16(&mut elf, 16, ET_EXEC);
        put16(&mut elf, 18, EM_386);
        put32(&mut elf, 20, 1);
        put32(&mut elf, 24, self.entry);
        put32(&mut elf, 28, phoff);
        put16(&mut elf, 40, 52);
        put16(&mut elf, 42, 32);
        put16(&mut elf, 44, self.segments.len() as u16);
        put16(&mut elf, 46, 40);

        for (index, segment) in self.segments.iter().enumerate() {
            let at = phoff as usize + 32 * index;
            put32(&mut elf, at, segment.p_type);
            put32(&mut elf, at + 4, data_offset);
            put32(&mut elf, at + 8, segment.vaddr);
            put32(&mut elf, at + 12, segment.paddr);
            put32(&mut elf, at + 16, segment.data.len() as u32);
            put32(&mut elf, at + 20, segment.memsz);
            put32(&mut elf, at + 24, segment.flags);
            put32(&mut elf, at + 28, 0x1000);
            elf.extend_from_slice(&segment.data);
            data_offset += segment.data.len() as u32;
        }

        if !self.symbols.is_empty() {
            self.append_symbol_table(&mut elf);
        }
        elf
    }

    fn append_symbol_table(&self, elf: &mut Vec<u8>) {
        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; 16];
        for symbol in &self.symbols {
            let mut entry = [0u8; 16];
            entry[0..4].copy_from_slice(&(strtab.len() as u32).to_le_bytes());
            entry[4..8].copy_from_slice(&symbol.value.to_le_bytes());
            entry[8..12].copy_from_slice(&symbol.size.to_le_bytes());
            entry[12] = symbol.info;
            entry[14..16].copy_from_slice(&1u16.to_le_bytes());
            symtab.extend_from_slice(&entry);
            strtab.extend_from_slice(symbol.name.as_bytes());
            strtab.push(0);
        }

        let symtab_offset = elf.len() as u32;
        elf.extend_from_slice(&symtab);
        let strtab_offset = elf.len() as u32;
        elf.extend_from_slice(&strtab);

        let shoff = elf.len();
        elf.resize(shoff + 3 * 40, 0);
        // [0] null, [1] .symtab linked to [2] .strtab
        let sym = shoff + 40;
        put32(elf, sym + 4, SHT_SYMTAB);
        put32(elf, sym + 16, symtab_offset);
        put32(elf, sym + 20, symtab.len() as u32);
        put32(elf, sym + 24, 2);
        put32(elf, sym + 36, 16);
        let strsec = shoff + 80;
        put32(elf, strsec + 4, SHT_STRTAB);
        put32(elf, strsec + 16, strtab_offset);
        put32(elf, strsec + 20, strtab.len() as u32);

        put32(elf, 32, shoff as u32);
        put16(elf, 48, 3);
    }
}

fn put16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
