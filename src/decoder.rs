//! Capstone-based decode oracle.
//!
//! The oracle decodes exactly one instruction at a time and hands back an
//! architecture-neutral [`RawInsn`]: opcode id, Intel-syntax text, semantic
//! groups and normalized operands. Classification happens in [`crate::classify`].

use std::fmt;

use capstone::arch::x86::{ArchMode as X86Mode, ArchSyntax as X86Syntax, X86OperandType};
use capstone::prelude::*;
use capstone::{Capstone, InsnDetail};

use crate::{Address, Architecture, Binary, InsnGroups, MemOperand, Operand, RawInsn};

/// Maximum instruction size in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 16;

// Capstone `cs_group_type` values, stable across releases.
const CS_GRP_JUMP: u8 = 1;
const CS_GRP_CALL: u8 = 2;
const CS_GRP_RET: u8 = 3;
const CS_GRP_INT: u8 = 4;
const CS_GRP_IRET: u8 = 5;
const CS_GRP_PRIVILEGE: u8 = 6;

/// Errors that can occur while setting up a decoder
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// Capstone error
    #[error("Capstone error: {0}")]
    CapstoneError(#[from] capstone::Error),

    /// Unsupported architecture
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(Architecture),

    /// Unsupported instruction-set width
    #[error("unsupported bit width {bits} for architecture {arch}")]
    UnsupportedBitWidth { bits: u8, arch: Architecture },
}

/// Outcome of decoding at one address.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A complete instruction
    Insn(RawInsn),
    /// The bytes do not form a valid instruction
    Invalid,
    /// No bytes left, or an instruction cut off by the end of `code`
    Truncated,
}

/// Decoder trait: architecture-specific single-instruction oracle.
pub trait Decoder {
    /// Decode one instruction from the start of `code`, which is mapped at `addr`.
    ///
    /// # Arguments
    /// * `code` - Bytes from the decode position to the end of the section
    /// * `addr` - Virtual address of `code[0]`
    fn decode(&self, code: &[u8], addr: Address) -> Decoded;

    /// Architecture this decoder was opened for
    fn architecture(&self) -> Architecture;
}

/// A Capstone handle opened with detail and Intel syntax.
///
/// The handle is released when the decoder is dropped.
pub struct CapstoneDecoder {
    cs: Capstone,
    arch: Architecture,
    bits: u8,
}

impl CapstoneDecoder {
    /// Open a decoder matching the architecture and width of `binary`.
    pub fn for_binary(binary: &Binary) -> Result<Self, DecoderError> {
        Self::new(binary.arch, binary.bits)
    }

    /// Open a decoder for a specific architecture and width
    pub fn new(arch: Architecture, bits: u8) -> Result<Self, DecoderError> {
        let cs = match arch {
            Architecture::X86 => Self::build_x86(bits)?,
            other => return Err(DecoderError::UnsupportedArchitecture(other)),
        };
        Ok(Self { cs, arch, bits })
    }

    /// Build an x86 decoder in 16, 32 or 64-bit mode
    pub fn build_x86(bits: u8) -> Result<Capstone, DecoderError> {
        let mode = match bits {
            16 => X86Mode::Mode16,
            32 => X86Mode::Mode32,
            64 => X86Mode::Mode64,
            _ => {
                return Err(DecoderError::UnsupportedBitWidth {
                    bits,
                    arch: Architecture::X86,
                })
            }
        };

        Ok(Capstone::new()
            .x86()
            .mode(mode)
            .syntax(X86Syntax::Intel)
            .detail(true)
            .build()?)
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// True if `code` is the start of an instruction that runs past its end.
    ///
    /// Capstone fails the same way on a bad opcode and on a short buffer, so
    /// the bytes are decoded again padded with zeros to the maximum length.
    fn runs_past_end(&self, code: &[u8], addr: Address) -> bool {
        if code.len() >= MAX_INSTRUCTION_SIZE {
            return false;
        }

        let mut padded = [0u8; MAX_INSTRUCTION_SIZE];
        padded[..code.len()].copy_from_slice(code);

        match self.cs.disasm_count(&padded, addr, 1) {
            Ok(insns) => insns
                .iter()
                .next()
                .is_some_and(|insn| insn.id().0 != 0 && insn.bytes().len() > code.len()),
            Err(_) => false,
        }
    }

    fn undecodable(&self, code: &[u8], addr: Address) -> Decoded {
        if self.runs_past_end(code, addr) {
            log::trace!("instruction at 0x{:x} cut off after {} bytes", addr, code.len());
            Decoded::Truncated
        } else {
            Decoded::Invalid
        }
    }

    /// Map Capstone's group ids onto [`InsnGroups`].
    fn groups(detail: &InsnDetail) -> InsnGroups {
        detail
            .groups()
            .iter()
            .fold(InsnGroups::empty(), |acc, group| {
                acc | match group.0 {
                    CS_GRP_JUMP => InsnGroups::JUMP,
                    CS_GRP_CALL => InsnGroups::CALL,
                    CS_GRP_RET => InsnGroups::RET,
                    CS_GRP_INT => InsnGroups::INT,
                    CS_GRP_IRET => InsnGroups::IRET,
                    CS_GRP_PRIVILEGE => InsnGroups::PRIVILEGE,
                    _ => InsnGroups::empty(),
                }
            })
    }

    /// Normalize x86 operands; returns the address size alongside.
    fn x86_operands(detail: &InsnDetail) -> (u8, Vec<Operand>) {
        let arch_detail = detail.arch_detail();
        let Some(x86) = arch_detail.x86() else {
            return (0, Vec::new());
        };

        let operands = x86
            .operands()
            .map(|op| match op.op_type {
                X86OperandType::Reg(reg) => Operand::reg(reg.0, op.size),
                X86OperandType::Imm(imm) => Operand::imm(imm, op.size),
                X86OperandType::Mem(mem) => Operand::mem(
                    MemOperand {
                        segment: mem.segment().0,
                        base: mem.base().0,
                        index: mem.index().0,
                        scale: mem.scale(),
                        disp: mem.disp(),
                    },
                    op.size,
                ),
                _ => Operand::none(),
            })
            .collect();

        (x86.addr_size(), operands)
    }
}

impl fmt::Debug for CapstoneDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapstoneDecoder")
            .field("arch", &self.arch)
            .field("bits", &self.bits)
            .finish()
    }
}

impl fmt::Display for CapstoneDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapstoneDecoder::{}-{}", self.arch, self.bits)
    }
}

impl Decoder for CapstoneDecoder {
    fn decode(&self, code: &[u8], addr: Address) -> Decoded {
        if code.is_empty() {
            return Decoded::Truncated;
        }

        // Only look at a small slice (16 bytes max)
        let window = &code[..code.len().min(MAX_INSTRUCTION_SIZE)];

        let insns = match self.cs.disasm_count(window, addr, 1) {
            Ok(insns) => insns,
            Err(e) => {
                log::trace!("capstone failed at 0x{:x}: {}", addr, e);
                return self.undecodable(window, addr);
            }
        };
        let Some(insn) = insns.iter().next() else {
            return self.undecodable(window, addr);
        };
        if insn.id().0 == 0 {
            return self.undecodable(window, addr);
        }

        let size = insn.bytes().len();
        if size == 0 {
            return Decoded::Truncated;
        }

        let detail = match self.cs.insn_detail(&insn) {
            Ok(detail) => detail,
            Err(e) => {
                log::trace!("no instruction detail at 0x{:x}: {}", addr, e);
                return Decoded::Invalid;
            }
        };

        let (addr_size, operands) = Self::x86_operands(&detail);

        Decoded::Insn(RawInsn {
            id: insn.id().0,
            address: insn.address(),
            size: size as u8,
            addr_size,
            mnemonic: insn.mnemonic().unwrap_or("").to_string(),
            op_str: insn.op_str().unwrap_or("").to_string(),
            groups: Self::groups(&detail),
            operands,
        })
    }

    fn architecture(&self) -> Architecture {
        self.arch
    }
}
