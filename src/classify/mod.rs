//! Architecture-specific instruction classification.
//!
//! Each backend turns a [`RawInsn`] into a [`Classification`]; [`classify`]
//! dispatches on the binary's architecture and width and then builds the final
//! [`Instruction`] with its flags, indirect marking and direct branch target.

pub mod x86;

use crate::{Address, Architecture, Binary, DisassemblyError, InsnFlags, Instruction, OperandKind, RawInsn};

/// Classification predicates for one decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    /// Architectural or semantic no-op, after format-specific rules
    pub nop: bool,
    pub trap: bool,
    pub ret: bool,
    /// Unconditional or conditional jump
    pub jmp: bool,
    pub cond: bool,
    /// Ends a basic block
    pub cflow: bool,
    pub call: bool,
    pub privileged: bool,
}

impl Classification {
    pub fn flags(&self) -> InsnFlags {
        let mut flags = InsnFlags::empty();
        flags.set(InsnFlags::NOP, self.nop);
        flags.set(InsnFlags::RET, self.ret);
        flags.set(InsnFlags::JMP, self.jmp);
        flags.set(InsnFlags::COND, self.cond);
        flags.set(InsnFlags::CFLOW, self.cflow);
        flags.set(InsnFlags::CALL, self.call);
        flags
    }
}

/// Fail unless `binary` targets an architecture and width with a classifier.
pub fn ensure_supported(binary: &Binary) -> Result<(), DisassemblyError> {
    match (binary.arch, binary.bits) {
        (Architecture::X86, 16 | 32 | 64) => Ok(()),
        (Architecture::X86, bits) => Err(DisassemblyError::UnsupportedBitWidth {
            bits,
            arch: binary.arch,
        }),
        (arch, _) => Err(DisassemblyError::UnsupportedArchitecture(arch)),
    }
}

/// Classify `raw` according to the architecture, width and format of `binary`.
///
/// Unsupported architectures and widths are hard errors.
pub fn classify(binary: &Binary, raw: &RawInsn) -> Result<Classification, DisassemblyError> {
    ensure_supported(binary)?;
    Ok(x86::classify(binary.binary_type, raw))
}

/// Build the classified [`Instruction`] for `raw`.
///
/// Control flow through a register or memory operand is marked
/// [`InsnFlags::INDIRECT`]; an immediate operand of a control-flow
/// instruction becomes its `target`.
pub fn build_instruction(raw: RawInsn, class: &Classification) -> Instruction {
    let mut flags = class.flags();
    let mut target = None;

    if raw.groups.is_control_flow() {
        for op in &raw.operands {
            match op.kind {
                OperandKind::Imm(imm) => target = Some(imm as Address),
                OperandKind::Reg(_) | OperandKind::Mem(_) => flags |= InsnFlags::INDIRECT,
                _ => {}
            }
        }
    }

    Instruction {
        start: raw.address,
        size: raw.size,
        addr_size: raw.addr_size,
        mnem: raw.mnemonic,
        op_str: raw.op_str,
        flags,
        privileged: class.privileged,
        trap: class.trap,
        target,
        operands: raw.operands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryType, InsnGroups, MemOperand, Operand};
    use capstone::arch::x86::X86Insn;

    fn binary(arch: Architecture, bits: u8) -> Binary {
        let mut bin = Binary::from_raw(vec![0x90], 0x1000, arch, bits);
        bin.binary_type = BinaryType::Elf;
        bin
    }

    fn raw(id: u32, groups: InsnGroups, operands: Vec<Operand>) -> RawInsn {
        RawInsn {
            id,
            address: 0x1000,
            size: 2,
            addr_size: 8,
            mnemonic: "jmp".to_string(),
            op_str: String::new(),
            groups,
            operands,
        }
    }

    #[test]
    fn test_unsupported_architecture() {
        let insn = raw(X86Insn::X86_INS_NOP as u32, InsnGroups::empty(), Vec::new());

        assert!(matches!(
            classify(&binary(Architecture::Arm, 32), &insn),
            Err(DisassemblyError::UnsupportedArchitecture(Architecture::Arm))
        ));
        assert!(matches!(
            classify(&binary(Architecture::X86, 128), &insn),
            Err(DisassemblyError::UnsupportedBitWidth { bits: 128, .. })
        ));
        assert!(classify(&binary(Architecture::X86, 16), &insn).unwrap().nop);
    }

    #[test]
    fn test_direct_jump_target() {
        let jmp = raw(
            X86Insn::X86_INS_JMP as u32,
            InsnGroups::JUMP,
            vec![Operand::imm(0x1040, 8)],
        );
        let class = classify(&binary(Architecture::X86, 64), &jmp).unwrap();
        let insn = build_instruction(jmp, &class);

        assert_eq!(insn.target, Some(0x1040));
        assert!(insn.flags.contains(InsnFlags::JMP | InsnFlags::CFLOW));
        assert!(!insn.is_indirect());
    }

    #[test]
    fn test_indirect_call_through_memory() {
        let call = raw(
            X86Insn::X86_INS_CALL as u32,
            InsnGroups::CALL,
            vec![Operand::mem(MemOperand { base: 37, scale: 1, disp: 0x10, ..MemOperand::default() }, 8)],
        );
        let class = classify(&binary(Architecture::X86, 64), &call).unwrap();
        let insn = build_instruction(call, &class);

        assert!(insn.is_indirect());
        assert!(insn.is_call());
        assert_eq!(insn.target, None);
    }

    #[test]
    fn test_register_operand_outside_cflow_is_not_indirect() {
        let mov = raw(
            X86Insn::X86_INS_MOV as u32,
            InsnGroups::empty(),
            vec![Operand::reg(19, 4), Operand::imm(5, 4)],
        );
        let class = classify(&binary(Architecture::X86, 32), &mov).unwrap();
        let insn = build_instruction(mov, &class);

        assert!(insn.flags.is_empty());
        assert_eq!(insn.target, None);
    }
}
