//! Instruction and operand IR shared by the decoder, classifier and block builder.

use std::fmt;

use bitflags::bitflags;

use crate::Address;

bitflags! {
    /// Control-flow attributes of one classified instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InsnFlags: u16 {
        const NOP      = 0x001;
        const RET      = 0x002;
        const JMP      = 0x004;
        const COND     = 0x008;
        const CFLOW    = 0x010;
        const CALL     = 0x020;
        /// Branch target is not statically known
        const INDIRECT = 0x040;
    }
}

bitflags! {
    /// Semantic groups reported by the decode oracle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InsnGroups: u8 {
        const JUMP      = 0x01;
        const CALL      = 0x02;
        const RET       = 0x04;
        const INT       = 0x08;
        const IRET      = 0x10;
        const PRIVILEGE = 0x20;
    }
}

impl InsnGroups {
    /// Jump, call, return or interrupt-return
    pub fn is_control_flow(&self) -> bool {
        self.intersects(InsnGroups::JUMP | InsnGroups::CALL | InsnGroups::RET | InsnGroups::IRET)
    }
}

/// Memory operand expression: `segment:[base + index*scale + disp]`.
///
/// Register ids are architecture-specific; `0` means "no register".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemOperand {
    pub segment: u16,
    pub base: u16,
    pub index: u16,
    pub scale: i32,
    pub disp: i64,
}

/// Payload of one operand, keyed by its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperandKind {
    None,
    Reg(u16),
    Imm(i64),
    Mem(MemOperand),
    Fp(f64),
}

/// One normalized operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Operand {
    pub kind: OperandKind,
    /// Operand size in bytes
    pub size: u8,
}

impl Operand {
    pub fn none() -> Self {
        Self { kind: OperandKind::None, size: 0 }
    }

    pub fn reg(reg: u16, size: u8) -> Self {
        Self { kind: OperandKind::Reg(reg), size }
    }

    pub fn imm(value: i64, size: u8) -> Self {
        Self { kind: OperandKind::Imm(value), size }
    }

    pub fn mem(mem: MemOperand, size: u8) -> Self {
        Self { kind: OperandKind::Mem(mem), size }
    }

    pub fn fp(value: f64, size: u8) -> Self {
        Self { kind: OperandKind::Fp(value), size }
    }

    /// Register or memory operand, i.e. a value not known statically
    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, OperandKind::Reg(_) | OperandKind::Mem(_))
    }
}

/// Architecture-neutral view of one instruction as returned by the oracle,
/// before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInsn {
    /// Backend opcode id (e.g. a Capstone `X86_INS_*` value)
    pub id: u32,
    pub address: Address,
    pub size: u8,
    /// Effective address size in bytes
    pub addr_size: u8,
    pub mnemonic: String,
    /// Intel-syntax operand string
    pub op_str: String,
    pub groups: InsnGroups,
    pub operands: Vec<Operand>,
}

/// One decoded and classified machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub start: Address,
    pub size: u8,
    pub addr_size: u8,
    pub mnem: String,
    pub op_str: String,
    pub flags: InsnFlags,
    pub privileged: bool,
    pub trap: bool,
    /// Direct control-flow target, if the operand is an immediate
    pub target: Option<Address>,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn end(&self) -> Address {
        self.start + self.size as Address
    }

    pub fn is_cflow(&self) -> bool {
        self.flags.contains(InsnFlags::CFLOW)
    }

    pub fn is_nop(&self) -> bool {
        self.flags.contains(InsnFlags::NOP)
    }

    pub fn is_ret(&self) -> bool {
        self.flags.contains(InsnFlags::RET)
    }

    pub fn is_call(&self) -> bool {
        self.flags.contains(InsnFlags::CALL)
    }

    pub fn is_indirect(&self) -> bool {
        self.flags.contains(InsnFlags::INDIRECT)
    }

    /// Unconditional jump: control can not fall through to the next address
    pub fn is_unconditional_jmp(&self) -> bool {
        self.flags.contains(InsnFlags::JMP) && !self.flags.contains(InsnFlags::COND)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op_str.is_empty() {
            write!(f, "{}", self.mnem)
        } else {
            write!(f, "{} {}", self.mnem, self.op_str)
        }
    }
}
