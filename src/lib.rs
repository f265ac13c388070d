//! Core IR, traits, loader types, and error taxonomy for the nucleus disassembler.
//!
//! The library recovers basic blocks from raw sections without symbols or debug
//! information. A [`strategy::Strategy`] proposes candidate blocks ("mutants"),
//! the [`block`] decoder fills them using a Capstone oracle and the per-arch
//! [`classify`] tables, and the [`disasm`] engine keeps the survivors in an
//! [`AddressMap`] until the worklist runs dry.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::fs;
//! use nucleus_disasm::{
//!     parser::GoblinParser,
//!     format::OutputFormat,
//!     strategy::StrategyKind,
//!     nucleus_disasm, BinaryParser, Options,
//! };
//!
//! let data = fs::read("path/to/binary").unwrap();
//! let binary = GoblinParser::new().parse(&data).unwrap();
//!
//! let options = Options {
//!     only_code_sections: true,
//!     strategy: StrategyKind::Recursive,
//! };
//! let sections = nucleus_disasm(&binary, &options).unwrap();
//!
//! let text = OutputFormat::Text.get_formatter().format(&sections).unwrap();
//! println!("{}", text);
//! ```

pub mod addrmap;
pub mod block;
pub mod classify;
pub mod decoder;
pub mod disasm;
pub mod format;
pub mod insn;
pub mod parser;
pub mod strategy;
#[cfg(feature = "extension-module")]
pub mod python;

/// Represents an address in memory
pub type Address = u64;

use std::fmt;

pub use addrmap::{AddrFlags, AddressMap};
pub use block::{decode_block, BasicBlock};
pub use decoder::{CapstoneDecoder, Decoded, Decoder, DecoderError};
pub use disasm::{nucleus_disasm, DisasmSection, Options};
pub use insn::{InsnFlags, InsnGroups, Instruction, MemOperand, Operand, OperandKind, RawInsn};

/// Supported architecture families.
///
/// Only [`Architecture::X86`] carries a classifier; the others are recognised
/// by the loader so that the engine can report them precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Architecture {
    /// x86 in 16, 32 or 64-bit mode
    X86,
    /// ARM (32-bit)
    Arm,
    /// AArch64 (ARM 64-bit)
    AArch64,
    /// MIPS
    Mips,
    /// PowerPC
    Ppc,
    /// RISC-V
    RiscV,
    /// Unknown architecture
    Unknown,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::Arm => write!(f, "ARM"),
            Architecture::AArch64 => write!(f, "AArch64"),
            Architecture::Mips => write!(f, "MIPS"),
            Architecture::Ppc => write!(f, "PowerPC"),
            Architecture::RiscV => write!(f, "RISC-V"),
            Architecture::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Container format family of a loaded binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryType {
    Elf,
    Pe,
    MachO,
    /// Flat image with no headers
    Raw,
}

impl fmt::Display for BinaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryType::Elf => write!(f, "ELF"),
            BinaryType::Pe => write!(f, "PE"),
            BinaryType::MachO => write!(f, "Mach-O"),
            BinaryType::Raw => write!(f, "raw"),
        }
    }
}

/// Whether a section holds code or data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionType {
    Code,
    Data,
}

/// A section in the binary: raw bytes mapped at `vma`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name
    pub name: String,
    /// Base virtual address of the section
    pub vma: Address,
    /// Raw contents
    pub bytes: Vec<u8>,
    /// Code or data
    pub section_type: SectionType,
}

impl Section {
    /// Create a new section
    pub fn new(name: impl Into<String>, vma: Address, bytes: Vec<u8>, section_type: SectionType) -> Self {
        Self {
            name: name.into(),
            vma,
            bytes,
            section_type,
        }
    }

    /// Size of this section in bytes
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// One past the last address of this section
    pub fn end(&self) -> Address {
        self.vma + self.size()
    }

    /// True if `addr` lies within `[vma, vma + size)`
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.vma && addr < self.end()
    }

    /// Offset of `addr` into `bytes`, if it lies within the section
    pub fn offset_of(&self, addr: Address) -> Option<usize> {
        if self.contains(addr) {
            Some((addr - self.vma) as usize)
        } else {
            None
        }
    }

    pub fn is_code(&self) -> bool {
        self.section_type == SectionType::Code
    }
}

/// A loaded binary, as produced by a [`BinaryParser`].
#[derive(Debug, Clone)]
pub struct Binary {
    /// Where the image came from (informational)
    pub filename: String,
    /// Container format family
    pub binary_type: BinaryType,
    /// Architecture family
    pub arch: Architecture,
    /// Instruction-set width: 16, 32 or 64
    pub bits: u8,
    /// Entry point address, if available
    pub entry: Option<Address>,
    /// Sections in load order
    pub sections: Vec<Section>,
}

impl Binary {
    /// Wrap a flat image as a single code section at `vma`.
    pub fn from_raw(bytes: Vec<u8>, vma: Address, arch: Architecture, bits: u8) -> Self {
        Self {
            filename: String::from("<raw>"),
            binary_type: BinaryType::Raw,
            arch,
            bits,
            entry: Some(vma),
            sections: vec![Section::new(".raw", vma, bytes, SectionType::Code)],
        }
    }

    /// Find a section by name
    pub fn find_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Get all code sections
    pub fn code_sections(&self) -> Vec<&Section> {
        self.sections.iter().filter(|s| s.is_code()).collect()
    }
}

/// Parser trait: turn raw file bytes into a [`Binary`].
pub trait BinaryParser {
    /// Parse binary data
    ///
    /// # Arguments
    /// * `data` - The file contents to parse
    fn parse(&self, data: &[u8]) -> Result<Binary, DisassemblyError>;
}

/// Error type for disassembly operations
#[derive(Debug, thiserror::Error)]
pub enum DisassemblyError {
    /// Failed to parse binary format
    #[error("Failed to parse binary format: {0}")]
    ParsingError(String),

    /// Decoder error
    #[error("Decoder error: {0}")]
    DecoderError(#[from] DecoderError),

    /// Unsupported architecture
    #[error("disassembly for architecture {0} is not supported")]
    UnsupportedArchitecture(Architecture),

    /// Unsupported instruction-set width for an otherwise supported architecture
    #[error("unsupported bit width {bits} for architecture {arch}")]
    UnsupportedBitWidth { bits: u8, arch: Architecture },

    /// A candidate block start lies outside its section
    #[error("basic block address 0x{addr:x} points outside of section '{section}'")]
    OutOfSection { addr: Address, section: String },

    /// The scoring policy signalled an unrecoverable condition
    #[error("scoring failed for basic block at 0x{addr:x} in section '{section}' (score {score})")]
    ScoreFailure {
        addr: Address,
        section: String,
        score: f64,
    },

    /// The selection policy signalled an unrecoverable condition
    #[error("selection failed in section '{section}': {reason}")]
    SelectFailure { section: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}
