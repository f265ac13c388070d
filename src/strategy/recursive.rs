//! Recursive descent policy

use std::collections::HashSet;

use crate::disasm::DisasmSection;
use crate::strategy::Strategy;
use crate::{AddrFlags, Address, BasicBlock, DisassemblyError};

const PRIVILEGED_PENALTY: f64 = 0.5;
const TRAP_PENALTY: f64 = 0.25;

/// Follow direct branch targets and fall-through edges from the entry point.
///
/// Code reachable only through indirect control flow is not discovered.
#[derive(Debug, Default)]
pub struct RecursiveStrategy {
    entry: Option<Address>,
}

impl RecursiveStrategy {
    pub fn new(entry: Option<Address>) -> Self {
        Self { entry }
    }

    fn is_bb_start(dis: &DisasmSection<'_>, addr: Address) -> bool {
        dis.addrmap.get_addr_type(addr).contains(AddrFlags::BB_START)
    }

    /// Successor addresses of an accepted block that are worth decoding.
    fn successors(dis: &DisasmSection<'_>, parent: &BasicBlock) -> Vec<Address> {
        let mut succs = Vec::new();
        let Some(last) = parent.last_instruction() else {
            return succs;
        };

        if last.is_cflow() {
            if let Some(target) = last.target {
                if dis.section.contains(target) && !Self::is_bb_start(dis, target) {
                    succs.push(target);
                }
            }
        }

        let falls_through = !(last.is_ret() || last.is_unconditional_jmp());
        if falls_through
            && dis.section.contains(parent.end)
            && !Self::is_bb_start(dis, parent.end)
        {
            succs.push(parent.end);
        }

        succs
    }
}

impl Strategy for RecursiveStrategy {
    fn mutate(&mut self, dis: &DisasmSection<'_>, parent: Option<&BasicBlock>) -> Vec<BasicBlock> {
        let addrs: Vec<Address> = match parent {
            None => self
                .entry
                .filter(|&entry| dis.section.contains(entry))
                .or_else(|| dis.addrmap.lowest_unmapped())
                .into_iter()
                .collect(),
            Some(bb) => Self::successors(dis, bb),
        };
        addrs.into_iter().map(BasicBlock::new).collect()
    }

    fn score(&self, _dis: &DisasmSection<'_>, bb: &mut BasicBlock) -> f64 {
        let mut score = if bb.invalid { 0.0 } else { 1.0 };
        if score > 0.0 {
            if bb.privileged {
                score -= PRIVILEGED_PENALTY;
            }
            if bb.trap {
                score -= TRAP_PENALTY;
            }
        }
        bb.score = score;
        score
    }

    fn select(&self, dis: &DisasmSection<'_>, bbs: &mut [BasicBlock]) -> Result<usize, DisassemblyError> {
        let mut seen = HashSet::new();
        let mut alive = 0;

        for bb in bbs.iter_mut() {
            bb.alive = bb.score > 0.0
                && !dis.addrmap.get_addr_type(bb.start).contains(AddrFlags::CODE)
                && seen.insert(bb.start);
            if bb.alive {
                alive += 1;
            }
        }

        Ok(alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InsnFlags, Instruction, Section, SectionType};

    fn section() -> Section {
        Section::new(".text", 0x1000, vec![0x90; 0x20], SectionType::Code)
    }

    fn block(start: Address, end: Address, flags: InsnFlags, target: Option<Address>) -> BasicBlock {
        let mut bb = BasicBlock::new(start);
        bb.end = end;
        bb.insns.push(Instruction {
            start,
            size: (end - start) as u8,
            addr_size: 8,
            mnem: String::new(),
            op_str: String::new(),
            flags,
            privileged: false,
            trap: false,
            target,
            operands: Vec::new(),
        });
        bb
    }

    #[test]
    fn test_seed_prefers_entry_in_section() {
        let sec = section();
        let dis = DisasmSection::new(&sec);

        let seeded = RecursiveStrategy::new(Some(0x1010)).mutate(&dis, None);
        assert_eq!(seeded[0].start, 0x1010);

        let fallback = RecursiveStrategy::new(Some(0x9000)).mutate(&dis, None);
        assert_eq!(fallback[0].start, 0x1000);

        let none = RecursiveStrategy::new(None).mutate(&dis, None);
        assert_eq!(none[0].start, 0x1000);
    }

    #[test]
    fn test_conditional_branch_has_two_successors() {
        let sec = section();
        let dis = DisasmSection::new(&sec);
        let jcc = block(0x1000, 0x1002, InsnFlags::JMP | InsnFlags::COND | InsnFlags::CFLOW, Some(0x1010));

        let starts: Vec<_> = RecursiveStrategy::new(None)
            .mutate(&dis, Some(&jcc))
            .iter()
            .map(|bb| bb.start)
            .collect();
        assert_eq!(starts, vec![0x1010, 0x1002]);
    }

    #[test]
    fn test_ret_and_jmp_do_not_fall_through() {
        let sec = section();
        let dis = DisasmSection::new(&sec);
        let mut strategy = RecursiveStrategy::new(None);

        let ret = block(0x1000, 0x1001, InsnFlags::RET | InsnFlags::CFLOW, None);
        assert!(strategy.mutate(&dis, Some(&ret)).is_empty());

        let jmp = block(0x1000, 0x1002, InsnFlags::JMP | InsnFlags::CFLOW, Some(0x1008));
        let succs = strategy.mutate(&dis, Some(&jmp));
        assert_eq!(succs.len(), 1);
        assert_eq!(succs[0].start, 0x1008);
    }

    #[test]
    fn test_targets_outside_section_or_known_are_dropped() {
        let sec = section();
        let mut dis = DisasmSection::new(&sec);
        dis.addrmap.add_addr_flag(0x1002, AddrFlags::BB_START);
        let call = block(0x1000, 0x1002, InsnFlags::CALL | InsnFlags::CFLOW, Some(0x5000));

        assert!(RecursiveStrategy::new(None).mutate(&dis, Some(&call)).is_empty());
    }

    #[test]
    fn test_score_penalties() {
        let sec = section();
        let dis = DisasmSection::new(&sec);
        let strategy = RecursiveStrategy::new(None);

        let mut bb = BasicBlock::new(0x1000);
        assert_eq!(strategy.score(&dis, &mut bb), 1.0);
        bb.privileged = true;
        assert_eq!(strategy.score(&dis, &mut bb), 0.5);
        bb.trap = true;
        assert_eq!(strategy.score(&dis, &mut bb), 0.25);
        bb.invalid = true;
        assert_eq!(strategy.score(&dis, &mut bb), 0.0);
    }

    #[test]
    fn test_select_rejects_mapped_duplicate_and_zero() {
        let sec = section();
        let mut dis = DisasmSection::new(&sec);
        dis.addrmap.add_addr_flag(0x1004, AddrFlags::CODE);
        let strategy = RecursiveStrategy::new(None);

        let mut bbs: Vec<_> = [0x1000, 0x1000, 0x1004, 0x1008]
            .into_iter()
            .map(|start| {
                let mut bb = BasicBlock::new(start);
                bb.score = 1.0;
                bb
            })
            .collect();
        bbs[3].score = 0.0;

        assert_eq!(strategy.select(&dis, &mut bbs).unwrap(), 1);
        let alive: Vec<_> = bbs.iter().map(|bb| bb.alive).collect();
        assert_eq!(alive, vec![true, false, false, false]);
    }
}
