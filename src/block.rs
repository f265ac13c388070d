//! Basic blocks and the block decoder.

use std::cmp::Ordering;

use crate::classify::{self, Classification};
use crate::decoder::{Decoded, Decoder};
use crate::{Address, Binary, DisassemblyError, Instruction, Section};

/// A candidate or accepted run of instructions `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// Starting address of the basic block
    pub start: Address,
    /// One past the last decoded byte
    pub end: Address,
    /// Name of the owning section
    pub section: String,
    /// Instructions within this basic block
    pub insns: Vec<Instruction>,
    pub invalid: bool,
    pub privileged: bool,
    /// Block is a run of no-ops
    pub padding: bool,
    pub trap: bool,
    /// Still under consideration, or accepted
    pub alive: bool,
    pub score: f64,
}

impl BasicBlock {
    /// Create an empty mutant at `start`
    pub fn new(start: Address) -> Self {
        Self {
            start,
            end: start,
            section: String::new(),
            insns: Vec::new(),
            invalid: false,
            privileged: false,
            padding: false,
            trap: false,
            alive: false,
            score: 0.0,
        }
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Get the last instruction in the block
    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.insns.last()
    }

    /// True if the block ends on a control-flow instruction
    pub fn is_terminated(&self) -> bool {
        self.last_instruction().is_some_and(Instruction::is_cflow)
    }

    /// Order blocks by start address
    pub fn comparator(a: &BasicBlock, b: &BasicBlock) -> Ordering {
        a.start.cmp(&b.start)
    }

    fn absorb(&mut self, class: &Classification, insn: Instruction) {
        self.end += insn.size as Address;
        self.privileged |= class.privileged;
        self.padding |= class.nop;
        self.trap |= class.trap;
        self.insns.push(insn);
    }
}

/// Decode the block starting at `bb.start` in `section`.
///
/// The block stops after a control-flow instruction, before the first
/// instruction that breaks a run of no-ops (or starts one), on an invalid
/// opcode (consuming one byte) or at the end of the section. An instruction
/// cut off by the section end is left out without flagging the block. A
/// block with no instructions is marked invalid and spans exactly one byte.
///
/// Returns the number of instructions decoded.
pub fn decode_block(
    binary: &Binary,
    section: &Section,
    decoder: &dyn Decoder,
    bb: &mut BasicBlock,
) -> Result<usize, DisassemblyError> {
    classify::ensure_supported(binary)?;

    let mut offset = section
        .offset_of(bb.start)
        .ok_or_else(|| DisassemblyError::OutOfSection {
            addr: bb.start,
            section: section.name.clone(),
        })?;

    bb.section = section.name.clone();
    bb.end = bb.start;

    let mut ndisassembled = 0;
    let mut only_nop = false;

    loop {
        let raw = match decoder.decode(&section.bytes[offset..], bb.end) {
            Decoded::Insn(raw) => raw,
            Decoded::Invalid => {
                bb.invalid = true;
                bb.end += 1;
                break;
            }
            Decoded::Truncated => break,
        };

        let class = classify::classify(binary, &raw)?;
        if ndisassembled == 0 {
            only_nop = class.nop;
        } else if class.nop != only_nop {
            break;
        }

        let insn = classify::build_instruction(raw, &class);
        let cflow = insn.is_cflow();
        offset += insn.size as usize;
        bb.absorb(&class, insn);
        ndisassembled += 1;

        if cflow {
            break;
        }
    }

    if ndisassembled == 0 {
        bb.invalid = true;
        bb.end = bb.start + 1;
    }

    log::trace!(
        "decoded bb 0x{:x}-0x{:x} ({} insns{})",
        bb.start,
        bb.end,
        ndisassembled,
        if bb.invalid { ", invalid" } else { "" }
    );

    Ok(ndisassembled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Architecture, BinaryType, CapstoneDecoder, InsnFlags, SectionType};
    use rstest::rstest;

    fn binary(bytes: &[u8], bits: u8, binary_type: BinaryType) -> Binary {
        let mut bin = Binary::from_raw(bytes.to_vec(), 0x1000, Architecture::X86, bits);
        bin.binary_type = binary_type;
        bin
    }

    fn decode_at(bin: &Binary, start: Address) -> Result<(BasicBlock, usize), DisassemblyError> {
        let decoder = CapstoneDecoder::for_binary(bin)?;
        let mut bb = BasicBlock::new(start);
        let n = decode_block(bin, &bin.sections[0], &decoder, &mut bb)?;
        Ok((bb, n))
    }

    #[test]
    fn test_padding_run_then_ret() {
        let bin = binary(&[0x90, 0x90, 0xc3], 64, BinaryType::Elf);

        let (pad, n) = decode_at(&bin, 0x1000).unwrap();
        assert_eq!(n, 2);
        assert_eq!((pad.start, pad.end), (0x1000, 0x1002));
        assert!(pad.padding);
        assert!(!pad.invalid);
        assert!(pad.insns.iter().all(Instruction::is_nop));
        assert_eq!(pad.section, ".raw");

        let (ret, n) = decode_at(&bin, 0x1002).unwrap();
        assert_eq!(n, 1);
        assert_eq!(ret.end, 0x1003);
        assert!(ret.insns[0].flags.contains(InsnFlags::CFLOW | InsnFlags::RET));
        assert!(ret.is_terminated());
        assert!(!ret.padding);
    }

    #[test]
    fn test_invalid_single_byte() {
        let bin = binary(&[0xff], 64, BinaryType::Elf);
        let (bb, n) = decode_at(&bin, 0x1000).unwrap();

        assert_eq!(n, 0);
        assert!(bb.invalid);
        assert_eq!(bb.end, 0x1001);
        assert!(bb.insns.is_empty());
    }

    #[test]
    fn test_lea_padding_depends_on_format() {
        // lea eax, [eax + 0]; ret
        let code = [0x8d, 0x40, 0x00, 0xc3];

        let (elf, _) = decode_at(&binary(&code, 32, BinaryType::Elf), 0x1000).unwrap();
        assert!(elf.padding);
        assert_eq!(elf.end, 0x1003);

        let (pe, n) = decode_at(&binary(&code, 32, BinaryType::Pe), 0x1000).unwrap();
        assert!(!pe.padding);
        assert_eq!(n, 2);
        assert_eq!(pe.end, 0x1004);
    }

    #[test]
    fn test_code_stops_before_nop() {
        // xor eax, eax; nop; ret
        let bin = binary(&[0x31, 0xc0, 0x90, 0xc3], 64, BinaryType::Elf);
        let (bb, n) = decode_at(&bin, 0x1000).unwrap();

        assert_eq!(n, 1);
        assert_eq!(bb.end, 0x1002);
        assert!(!bb.is_terminated());
        assert!(!bb.invalid);
    }

    #[rstest]
    // xor eax, eax; then the first byte of a 5-byte call
    #[case(&[0x31, 0xc0, 0xe8])]
    // xor eax, eax; then four of the five call bytes
    #[case(&[0x31, 0xc0, 0xe8, 0x00, 0x00, 0x00])]
    fn test_truncated_tail_is_not_invalid(#[case] code: &[u8]) {
        let bin = binary(code, 64, BinaryType::Elf);
        let (bb, n) = decode_at(&bin, 0x1000).unwrap();

        assert_eq!(n, 1);
        assert!(!bb.invalid);
        assert_eq!(bb.end, 0x1002);
        assert_eq!(bb.insns[0].mnem, "xor");
    }

    #[test]
    fn test_block_at_cut_off_instruction() {
        let bin = binary(&[0x31, 0xc0, 0xe8], 64, BinaryType::Elf);
        let (bb, n) = decode_at(&bin, 0x1002).unwrap();

        assert_eq!(n, 0);
        assert!(bb.invalid);
        assert!(bb.insns.is_empty());
        assert_eq!(bb.end, 0x1003);
    }

    #[test]
    fn test_privileged_and_trap_propagate() {
        // hlt; int3 (ELF: not padding)
        let bin = binary(&[0xf4, 0xcc], 64, BinaryType::Elf);
        let (bb, _) = decode_at(&bin, 0x1000).unwrap();
        assert!(bb.privileged);

        let bin = binary(&[0xcc], 64, BinaryType::Pe);
        let (bb, _) = decode_at(&bin, 0x1000).unwrap();
        assert!(bb.trap);
        assert!(bb.padding);
    }

    #[rstest]
    #[case(&[0x90, 0x90, 0xc3])]
    #[case(&[0xff, 0xff, 0xff])]
    #[case(&[0x0f, 0x0b, 0x48, 0x89, 0xe5, 0xe9, 0x00, 0x00, 0x00, 0x00])]
    #[case(&[0x00, 0x00, 0x00])]
    fn test_forward_progress(#[case] code: &[u8]) {
        let bin = binary(code, 64, BinaryType::Elf);
        let section = &bin.sections[0];

        for start in section.vma..section.end() {
            let (bb, _) = decode_at(&bin, start).unwrap();
            assert!(bb.end > bb.start, "no progress at 0x{:x}", start);
            assert!(bb.end <= section.end() || bb.invalid);
        }
    }

    #[test]
    fn test_out_of_section() {
        let bin = binary(&[0x90], 64, BinaryType::Elf);
        assert!(matches!(
            decode_at(&bin, 0x2000),
            Err(DisassemblyError::OutOfSection { addr: 0x2000, .. })
        ));
    }

    struct NeverCalled;

    impl Decoder for NeverCalled {
        fn decode(&self, _code: &[u8], _addr: Address) -> Decoded {
            panic!("decoder used for an unsupported target");
        }

        fn architecture(&self) -> Architecture {
            Architecture::Arm
        }
    }

    #[test]
    fn test_unsupported_architecture() {
        let bin = Binary::from_raw(vec![0x00; 4], 0, Architecture::Arm, 32);
        let section = Section::new(".text", 0, vec![0x00; 4], SectionType::Code);
        let mut bb = BasicBlock::new(0);

        assert!(matches!(
            decode_block(&bin, &section, &NeverCalled, &mut bb),
            Err(DisassemblyError::UnsupportedArchitecture(Architecture::Arm))
        ));
    }

    #[test]
    fn test_sort_by_start() {
        let mut bbs = vec![BasicBlock::new(0x30), BasicBlock::new(0x10), BasicBlock::new(0x20)];
        bbs.sort_by(BasicBlock::comparator);
        let starts: Vec<_> = bbs.iter().map(|bb| bb.start).collect();
        assert_eq!(starts, vec![0x10, 0x20, 0x30]);
    }
}
