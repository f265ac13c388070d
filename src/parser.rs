//! Goblin-based multi-format binary loader.
//!
//! Produces a [`Binary`] whose sections carry their file bytes. Zero-fill
//! sections (`.bss`, `__bss`, uninitialised PE data) have no bytes on disk and
//! are left out; a section is code when the container marks it executable.

use std::fmt;

use goblin::elf::section_header::{SHF_ALLOC, SHT_NOBITS};
use goblin::mach::constants::cputype;
use goblin::mach::{Mach, MachO};
use goblin::{elf, pe, Object};

use crate::{Address, Architecture, Binary, BinaryParser, BinaryType, DisassemblyError, Section, SectionType};

// Mach-O section flag bits
const MACHO_SECTION_TYPE: u32 = 0x0000_00ff;
const MACHO_S_ZEROFILL: u32 = 0x1;
const MACHO_S_GB_ZEROFILL: u32 = 0xc;
const MACHO_S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;
const MACHO_S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
const MACHO_S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;

/// A parser that handles ELF, PE, and Mach-O via Goblin.
#[derive(Debug, Default)]
pub struct GoblinParser;

/// Slice `data[offset..offset + size]`, failing if it runs past the file.
fn file_range<'d>(data: &'d [u8], offset: u64, size: u64, name: &str) -> Result<&'d [u8], DisassemblyError> {
    let start = usize::try_from(offset).ok();
    let end = offset.checked_add(size).and_then(|e| usize::try_from(e).ok());
    match (start, end) {
        (Some(start), Some(end)) if end <= data.len() => Ok(&data[start..end]),
        _ => Err(DisassemblyError::ParsingError(format!(
            "section '{}' lies outside the file (offset 0x{:x}, size 0x{:x})",
            name, offset, size
        ))),
    }
}

fn section_type(executable: bool) -> SectionType {
    if executable {
        SectionType::Code
    } else {
        SectionType::Data
    }
}

impl GoblinParser {
    /// Construct a new GoblinParser.
    pub fn new() -> Self {
        GoblinParser
    }

    /// Parse an ELF image.
    fn parse_elf(&self, elf: elf::Elf, data: &[u8]) -> Result<Binary, DisassemblyError> {
        let arch = match elf.header.e_machine {
            elf::header::EM_386 | elf::header::EM_X86_64 => Architecture::X86,
            elf::header::EM_ARM => Architecture::Arm,
            elf::header::EM_AARCH64 => Architecture::AArch64,
            elf::header::EM_MIPS => Architecture::Mips,
            elf::header::EM_PPC | elf::header::EM_PPC64 => Architecture::Ppc,
            elf::header::EM_RISCV => Architecture::RiscV,
            _ => Architecture::Unknown,
        };

        let mut sections = Vec::new();
        for sh in &elf.section_headers {
            if sh.sh_type == SHT_NOBITS || sh.sh_flags & SHF_ALLOC as u64 == 0 || sh.sh_size == 0 {
                continue;
            }
            let Some(name) = elf.shdr_strtab.get_at(sh.sh_name) else {
                continue;
            };
            let bytes = file_range(data, sh.sh_offset, sh.sh_size, name)?;
            sections.push(Section::new(
                name,
                sh.sh_addr,
                bytes.to_vec(),
                section_type(sh.is_executable()),
            ));
        }

        Ok(Binary {
            filename: String::new(),
            binary_type: BinaryType::Elf,
            arch,
            bits: if elf.is_64 { 64 } else { 32 },
            entry: Some(elf.entry),
            sections,
        })
    }

    /// Parse a PE image.
    fn parse_pe(&self, pe: pe::PE<'_>, data: &[u8]) -> Result<Binary, DisassemblyError> {
        let arch = match pe.header.coff_header.machine {
            pe::header::COFF_MACHINE_X86 | pe::header::COFF_MACHINE_X86_64 => Architecture::X86,
            pe::header::COFF_MACHINE_ARM | pe::header::COFF_MACHINE_ARMNT => Architecture::Arm,
            pe::header::COFF_MACHINE_ARM64 => Architecture::AArch64,
            _ => Architecture::Unknown,
        };
        let image_base = pe.image_base as Address;

        let mut sections = Vec::new();
        for sect in &pe.sections {
            if sect.size_of_raw_data == 0 {
                continue;
            }
            let name = sect.name().unwrap_or("").to_string();
            let executable = sect.characteristics
                & (pe::section_table::IMAGE_SCN_MEM_EXECUTE | pe::section_table::IMAGE_SCN_CNT_CODE)
                != 0;

            // Raw data is file-aligned; the tail past virtual_size is padding
            let mut size = sect.size_of_raw_data as u64;
            if sect.virtual_size != 0 {
                size = size.min(sect.virtual_size as u64);
            }
            let bytes = file_range(data, sect.pointer_to_raw_data as u64, size, &name)?;

            sections.push(Section::new(
                name,
                image_base + sect.virtual_address as Address,
                bytes.to_vec(),
                section_type(executable),
            ));
        }

        Ok(Binary {
            filename: String::new(),
            binary_type: BinaryType::Pe,
            arch,
            bits: if pe.is_64 { 64 } else { 32 },
            entry: Some(image_base + pe.entry as Address),
            sections,
        })
    }

    /// Parse a single-architecture Mach-O binary
    fn parse_macho(&self, macho: &MachO) -> Result<Binary, DisassemblyError> {
        let arch = match macho.header.cputype {
            cputype::CPU_TYPE_I386 | cputype::CPU_TYPE_X86_64 => Architecture::X86,
            cputype::CPU_TYPE_ARM => Architecture::Arm,
            cputype::CPU_TYPE_ARM64 => Architecture::AArch64,
            cputype::CPU_TYPE_POWERPC | cputype::CPU_TYPE_POWERPC64 => Architecture::Ppc,
            _ => Architecture::Unknown,
        };

        let mut sections = Vec::new();
        for segment in &macho.segments {
            let segment_sections = segment
                .sections()
                .map_err(|e| DisassemblyError::ParsingError(e.to_string()))?;

            for (sect, bytes) in segment_sections {
                let kind = sect.flags & MACHO_SECTION_TYPE;
                if matches!(kind, MACHO_S_ZEROFILL | MACHO_S_GB_ZEROFILL | MACHO_S_THREAD_LOCAL_ZEROFILL)
                    || bytes.is_empty()
                {
                    continue;
                }
                let executable = sect.flags
                    & (MACHO_S_ATTR_PURE_INSTRUCTIONS | MACHO_S_ATTR_SOME_INSTRUCTIONS)
                    != 0;
                let name = sect.name().unwrap_or("").to_string();
                sections.push(Section::new(name, sect.addr, bytes.to_vec(), section_type(executable)));
            }
        }

        Ok(Binary {
            filename: String::new(),
            binary_type: BinaryType::MachO,
            arch,
            bits: if macho.is_64 { 64 } else { 32 },
            entry: (macho.entry != 0).then_some(macho.entry),
            sections,
        })
    }

    /// Parse a Mach-O image.
    fn parse_mach(&self, m: Mach<'_>) -> Result<Binary, DisassemblyError> {
        match m {
            Mach::Binary(binary) => self.parse_macho(&binary),
            Mach::Fat(_) => Err(DisassemblyError::ParsingError(
                "universal (fat) Mach-O images are not supported; extract a single architecture first".into(),
            )),
        }
    }
}

impl fmt::Display for GoblinParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GoblinParser")
    }
}

impl BinaryParser for GoblinParser {
    fn parse(&self, data: &[u8]) -> Result<Binary, DisassemblyError> {
        let binary = match Object::parse(data) {
            Ok(Object::Elf(elf)) => self.parse_elf(elf, data)?,
            Ok(Object::PE(pe)) => self.parse_pe(pe, data)?,
            Ok(Object::Mach(m)) => self.parse_mach(m)?,
            Ok(_) => return Err(DisassemblyError::ParsingError("Unsupported file format".into())),
            Err(e) => return Err(DisassemblyError::ParsingError(e.to_string())),
        };

        log::debug!(
            "loaded {} image: {} {}-bit, {} sections",
            binary.binary_type,
            binary.arch,
            binary.bits,
            binary.sections.len()
        );

        Ok(binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_u16(buf: &mut [u8], at: usize, v: u16) {
        buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], at: usize, v: u32) {
        buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u64(buf: &mut [u8], at: usize, v: u64) {
        buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }

    #[allow(clippy::too_many_arguments)]
    fn put_shdr(buf: &mut [u8], at: usize, name: u32, kind: u32, flags: u64, addr: u64, offset: u64, size: u64) {
        put_u32(buf, at, name);
        put_u32(buf, at + 4, kind);
        put_u64(buf, at + 8, flags);
        put_u64(buf, at + 16, addr);
        put_u64(buf, at + 24, offset);
        put_u64(buf, at + 32, size);
        put_u64(buf, at + 48, 1);
    }

    /// ELF64 x86-64 image with `.text`, `.shstrtab`, `.bss` and `.data`.
    fn tiny_elf() -> Vec<u8> {
        const SHOFF: usize = 0x68;
        let mut buf = vec![0u8; SHOFF + 5 * 64];

        buf[..4].copy_from_slice(b"\x7fELF");
        buf[4] = 2; // ELFCLASS64
        buf[5] = 1; // little endian
        buf[6] = 1;
        put_u16(&mut buf, 16, 2); // ET_EXEC
        put_u16(&mut buf, 18, 62); // EM_X86_64
        put_u32(&mut buf, 20, 1);
        put_u64(&mut buf, 24, 0x401000);
        put_u64(&mut buf, 40, SHOFF as u64);
        put_u16(&mut buf, 52, 64);
        put_u16(&mut buf, 54, 56);
        put_u16(&mut buf, 58, 64);
        put_u16(&mut buf, 60, 5);
        put_u16(&mut buf, 62, 2);

        buf[0x40..0x43].copy_from_slice(&[0x90, 0x90, 0xc3]);
        buf[0x44..0x48].copy_from_slice(&[1, 2, 3, 4]);
        let strtab = b"\0.text\0.shstrtab\0.bss\0.data\0";
        buf[0x48..0x48 + strtab.len()].copy_from_slice(strtab);

        put_shdr(&mut buf, SHOFF + 64, 1, 1, 0x6, 0x401000, 0x40, 3);
        put_shdr(&mut buf, SHOFF + 128, 7, 3, 0, 0, 0x48, strtab.len() as u64);
        put_shdr(&mut buf, SHOFF + 192, 17, 8, 0x3, 0x402000, 0x60, 0x100);
        put_shdr(&mut buf, SHOFF + 256, 22, 1, 0x3, 0x403000, 0x44, 4);
        buf
    }

    #[test]
    fn test_parse_tiny_elf() {
        let bin = GoblinParser::new().parse(&tiny_elf()).unwrap();

        assert_eq!(bin.binary_type, BinaryType::Elf);
        assert_eq!(bin.arch, Architecture::X86);
        assert_eq!(bin.bits, 64);
        assert_eq!(bin.entry, Some(0x401000));

        let names: Vec<_> = bin.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![".text", ".data"]);

        let text = bin.find_section(".text").unwrap();
        assert!(text.is_code());
        assert_eq!(text.vma, 0x401000);
        assert_eq!(text.bytes, vec![0x90, 0x90, 0xc3]);

        let data = bin.find_section(".data").unwrap();
        assert_eq!(data.section_type, SectionType::Data);
        assert_eq!(data.bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_section_past_end_of_file() {
        let mut image = tiny_elf();
        // .data size runs off the end
        put_u64(&mut image, 0x68 + 256 + 32, 0x10_0000);

        assert!(matches!(
            GoblinParser::new().parse(&image),
            Err(DisassemblyError::ParsingError(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            GoblinParser::new().parse(b"definitely not an object file"),
            Err(DisassemblyError::ParsingError(_))
        ));
    }

    #[test]
    fn test_file_range() {
        let data = [0u8; 8];
        assert_eq!(file_range(&data, 2, 4, ".x").unwrap().len(), 4);
        assert!(file_range(&data, 6, 4, ".x").is_err());
        assert!(file_range(&data, u64::MAX, 2, ".x").is_err());
    }
}
