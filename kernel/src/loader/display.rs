//! Human-readable dumps of an ELF32 image.
//!
//! These are diagnostics only: they never map anything, and a malformed
//! image produces a message line instead of an error.

use core::fmt::{self, Write};

use super::elf::{
    string_at, symbol_at, symbol_binding, symbol_type, Elf32Image, SegmentFlags, SHT_SYMTAB,
};

const SEPARATOR: &str = "----------------------";

/// Dump every program header: type, addresses, sizes and permissions.
pub fn display_segments<W: Write>(image: &[u8], out: &mut W) -> fmt::Result {
    let image = match Elf32Image::parse(image) {
        Ok(image) => image,
        Err(err) => return writeln!(out, "cannot read ELF header: {}", err),
    };
    let headers = match image.program_headers() {
        Ok(headers) => headers,
        Err(err) => return writeln!(out, "{}", err),
    };

    for ph in headers.iter() {
        let (p_type, vaddr, paddr) = (ph.p_type, ph.p_vaddr, ph.p_paddr);
        let (filesz, memsz) = (ph.p_filesz, ph.p_memsz);

        if ph.is_load() {
            writeln!(out, "load")?;
        } else {
            writeln!(out, "type: {:#x}", p_type)?;
        }
        writeln!(out, "vaddr: {:x}", vaddr)?;
        writeln!(out, "paddr: {:x}", paddr)?;
        writeln!(out, "filesz: {}", filesz)?;
        writeln!(out, "memsz: {}", memsz)?;

        let flags = ph.flags();
        if flags.contains(SegmentFlags::EXECUTE) {
            writeln!(out, " execute")?;
        }
        if flags.contains(SegmentFlags::WRITE) {
            writeln!(out, " write")?;
        }
        if flags.contains(SegmentFlags::READ) {
            writeln!(out, " read")?;
        }
        writeln!(out, "{}", SEPARATOR)?;
    }
    Ok(())
}

/// Dump the first `SHT_SYMTAB` section, resolving names through its linked
/// string table. Symbol 0 is the reserved null entry and is skipped.
pub fn display_symbols<W: Write>(image: &[u8], out: &mut W) -> fmt::Result {
    let image = match Elf32Image::parse(image) {
        Ok(image) => image,
        Err(err) => return writeln!(out, "cannot read ELF header: {}", err),
    };
    let sections = match image.section_headers() {
        Ok(sections) => sections,
        Err(err) => return writeln!(out, "{}", err),
    };

    let Some(symtab) = sections.iter().find(|sh| sh.sh_type == SHT_SYMTAB) else {
        return writeln!(out, "no symbol table");
    };
    let Some(symbols) = image.section_data(&symtab) else {
        return writeln!(out, "symbol table out of bounds");
    };
    let Some(strtab) = sections
        .get(symtab.sh_link as usize)
        .and_then(|sh| image.section_data(&sh))
    else {
        return writeln!(out, "symbol string table missing");
    };

    writeln!(out, "{:<8} {:>6} {:<7} {:<6} name", "value", "size", "type", "bind")?;
    let count = symbols.len() / 16;
    for index in 1..count {
        let Some(symbol) = symbol_at(symbols, index) else {
            break;
        };
        let (name, value, size, info) =
            (symbol.st_name, symbol.st_value, symbol.st_size, symbol.st_info);
        writeln!(
            out,
            "{:08x} {:>6} {:<7} {:<6} {}",
            value,
            size,
            symbol_type(info),
            symbol_binding(info),
            string_at(strtab, name).unwrap_or("?")
        )?;
    }
    Ok(())
}

/// [`display_segments`] followed by [`display_symbols`].
pub fn display<W: Write>(image: &[u8], out: &mut W) -> fmt::Result {
    display_segments(image, out)?;
    display_symbols(image, out)
}
