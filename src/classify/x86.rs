//! x86 instruction semantics: opcode-id tables and semantic no-op patterns.

use std::collections::HashMap;
use std::sync::OnceLock;

use bitflags::bitflags;
use capstone::arch::x86::{X86Insn, X86Reg};

use crate::{BinaryType, OperandKind, RawInsn};

use super::Classification;

bitflags! {
    /// Precomputed per-opcode classification bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpcodeClass: u8 {
        const NOP        = 0x01;
        const TRAP       = 0x02;
        const CALL       = 0x04;
        const RET        = 0x08;
        const UNCOND_JMP = 0x10;
        const COND       = 0x20;
        const PRIV       = 0x40;
    }
}

const NOP_INSNS: &[u32] = &[X86Insn::X86_INS_NOP as u32, X86Insn::X86_INS_FNOP as u32];

const TRAP_INSNS: &[u32] = &[X86Insn::X86_INS_INT3 as u32, X86Insn::X86_INS_UD2 as u32];

const CALL_INSNS: &[u32] = &[X86Insn::X86_INS_CALL as u32, X86Insn::X86_INS_LCALL as u32];

const RET_INSNS: &[u32] = &[X86Insn::X86_INS_RET as u32, X86Insn::X86_INS_RETF as u32];

const UNCOND_JMP_INSNS: &[u32] = &[X86Insn::X86_INS_JMP as u32];

const COND_INSNS: &[u32] = &[
    X86Insn::X86_INS_JAE as u32,
    X86Insn::X86_INS_JA as u32,
    X86Insn::X86_INS_JBE as u32,
    X86Insn::X86_INS_JB as u32,
    X86Insn::X86_INS_JCXZ as u32,
    X86Insn::X86_INS_JECXZ as u32,
    X86Insn::X86_INS_JE as u32,
    X86Insn::X86_INS_JGE as u32,
    X86Insn::X86_INS_JG as u32,
    X86Insn::X86_INS_JLE as u32,
    X86Insn::X86_INS_JL as u32,
    X86Insn::X86_INS_JNE as u32,
    X86Insn::X86_INS_JNO as u32,
    X86Insn::X86_INS_JNP as u32,
    X86Insn::X86_INS_JNS as u32,
    X86Insn::X86_INS_JO as u32,
    X86Insn::X86_INS_JP as u32,
    X86Insn::X86_INS_JRCXZ as u32,
    X86Insn::X86_INS_JS as u32,
];

const PRIV_INSNS: &[u32] = &[
    X86Insn::X86_INS_HLT as u32,
    X86Insn::X86_INS_IN as u32,
    X86Insn::X86_INS_INSB as u32,
    X86Insn::X86_INS_INSW as u32,
    X86Insn::X86_INS_INSD as u32,
    X86Insn::X86_INS_OUT as u32,
    X86Insn::X86_INS_OUTSB as u32,
    X86Insn::X86_INS_OUTSW as u32,
    X86Insn::X86_INS_OUTSD as u32,
    X86Insn::X86_INS_RDMSR as u32,
    X86Insn::X86_INS_WRMSR as u32,
    X86Insn::X86_INS_RDPMC as u32,
    X86Insn::X86_INS_RDTSC as u32,
    X86Insn::X86_INS_LGDT as u32,
    X86Insn::X86_INS_LLDT as u32,
    X86Insn::X86_INS_LTR as u32,
    X86Insn::X86_INS_LMSW as u32,
    X86Insn::X86_INS_CLTS as u32,
    X86Insn::X86_INS_INVD as u32,
    X86Insn::X86_INS_INVLPG as u32,
    X86Insn::X86_INS_WBINVD as u32,
];

fn build_table() -> HashMap<u32, OpcodeClass> {
    let sets: [(&[u32], OpcodeClass); 7] = [
        (NOP_INSNS, OpcodeClass::NOP),
        (TRAP_INSNS, OpcodeClass::TRAP),
        (CALL_INSNS, OpcodeClass::CALL),
        (RET_INSNS, OpcodeClass::RET),
        (UNCOND_JMP_INSNS, OpcodeClass::UNCOND_JMP),
        (COND_INSNS, OpcodeClass::COND),
        (PRIV_INSNS, OpcodeClass::PRIV),
    ];

    let mut table = HashMap::new();
    for (insns, class) in sets {
        for &id in insns {
            *table.entry(id).or_insert_with(OpcodeClass::empty) |= class;
        }
    }
    table
}

/// Classification bits for a Capstone x86 opcode id.
pub fn opcode_class(id: u32) -> OpcodeClass {
    static TABLE: OnceLock<HashMap<u32, OpcodeClass>> = OnceLock::new();
    TABLE
        .get_or_init(build_table)
        .get(&id)
        .copied()
        .unwrap_or_default()
}

const MOV: u32 = X86Insn::X86_INS_MOV as u32;
const XCHG: u32 = X86Insn::X86_INS_XCHG as u32;
const LEA: u32 = X86Insn::X86_INS_LEA as u32;
const REG_INVALID: u16 = X86Reg::X86_REG_INVALID as u16;
const REG_EIZ: u16 = X86Reg::X86_REG_EIZ as u16;

pub fn is_nop(raw: &RawInsn) -> bool {
    opcode_class(raw.id).contains(OpcodeClass::NOP)
}

/// `mov r,r`, `xchg r,r`, `lea r,[r+0]` and `lea r,[r+eiz*s+0]`.
pub fn is_semantic_nop(raw: &RawInsn) -> bool {
    let [dst, src] = raw.operands.as_slice() else {
        return false;
    };

    match raw.id {
        MOV | XCHG => {
            matches!((dst.kind, src.kind), (OperandKind::Reg(a), OperandKind::Reg(b)) if a == b)
        }
        LEA => match (dst.kind, src.kind) {
            // scale is irrelevant: the index is either absent or the zero register
            (OperandKind::Reg(reg), OperandKind::Mem(mem)) => {
                mem.segment == REG_INVALID
                    && mem.base == reg
                    && (mem.index == REG_INVALID || mem.index == REG_EIZ)
                    && mem.disp == 0
            }
            _ => false,
        },
        _ => false,
    }
}

pub fn is_trap(raw: &RawInsn) -> bool {
    opcode_class(raw.id).contains(OpcodeClass::TRAP)
}

pub fn is_call(raw: &RawInsn) -> bool {
    opcode_class(raw.id).contains(OpcodeClass::CALL)
}

pub fn is_ret(raw: &RawInsn) -> bool {
    opcode_class(raw.id).contains(OpcodeClass::RET)
}

pub fn is_unconditional_jmp(raw: &RawInsn) -> bool {
    opcode_class(raw.id).contains(OpcodeClass::UNCOND_JMP)
}

pub fn is_conditional_cflow(raw: &RawInsn) -> bool {
    opcode_class(raw.id).contains(OpcodeClass::COND)
}

pub fn is_privileged(raw: &RawInsn) -> bool {
    opcode_class(raw.id).contains(OpcodeClass::PRIV)
}

/// Classify one x86 instruction for a binary of the given container format.
pub fn classify(binary_type: BinaryType, raw: &RawInsn) -> Classification {
    let pe = binary_type == BinaryType::Pe;
    let trap = is_trap(raw);

    // PE toolchains pad with int3 and emit semantic nops at function starts
    let nop = is_nop(raw) || (is_semantic_nop(raw) && !pe) || (trap && pe);

    Classification {
        nop,
        trap,
        ret: is_ret(raw),
        jmp: is_unconditional_jmp(raw) || is_conditional_cflow(raw),
        cond: is_conditional_cflow(raw),
        cflow: raw.groups.is_control_flow(),
        call: is_call(raw),
        privileged: is_privileged(raw),
    }
}
