//! Linear sweep policy

use crate::disasm::DisasmSection;
use crate::strategy::Strategy;
use crate::{Address, BasicBlock, DisassemblyError};

/// Partition the section into consecutive blocks, front to back.
///
/// Every candidate is kept, invalid ones included, so the sweep covers the
/// whole section.
#[derive(Debug, Default)]
pub struct LinearStrategy;

impl LinearStrategy {
    pub fn new() -> Self {
        Self
    }

    /// First unmapped address at or after `from`.
    fn next_unmapped(dis: &DisasmSection<'_>, from: Address) -> Option<Address> {
        (from..dis.section.end()).find(|&addr| dis.addrmap.is_unmapped(addr))
    }
}

impl Strategy for LinearStrategy {
    fn mutate(&mut self, dis: &DisasmSection<'_>, parent: Option<&BasicBlock>) -> Vec<BasicBlock> {
        let next = match parent {
            None => dis.addrmap.lowest_unmapped(),
            Some(bb) => Self::next_unmapped(dis, bb.end),
        };
        next.map(BasicBlock::new).into_iter().collect()
    }

    fn score(&self, _dis: &DisasmSection<'_>, bb: &mut BasicBlock) -> f64 {
        bb.score = if bb.invalid { 0.0 } else { 1.0 };
        bb.score
    }

    fn select(&self, _dis: &DisasmSection<'_>, bbs: &mut [BasicBlock]) -> Result<usize, DisassemblyError> {
        for bb in bbs.iter_mut() {
            bb.alive = true;
        }
        Ok(bbs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddrFlags, Section, SectionType};

    fn section() -> Section {
        Section::new(".text", 0x1000, vec![0x90; 8], SectionType::Code)
    }

    #[test]
    fn test_seed_is_lowest_unmapped() {
        let sec = section();
        let mut dis = DisasmSection::new(&sec);
        dis.addrmap.add_addr_flag(0x1000, AddrFlags::CODE);

        let mutants = LinearStrategy::new().mutate(&dis, None);
        assert_eq!(mutants.len(), 1);
        assert_eq!(mutants[0].start, 0x1001);
    }

    #[test]
    fn test_follows_parent_end() {
        let sec = section();
        let mut dis = DisasmSection::new(&sec);
        let mut parent = BasicBlock::new(0x1000);
        parent.end = 0x1003;
        for addr in 0x1000..0x1005 {
            dis.addrmap.add_addr_flag(addr, AddrFlags::CODE);
        }

        let mutants = LinearStrategy::new().mutate(&dis, Some(&parent));
        assert_eq!(mutants[0].start, 0x1005);
    }

    #[test]
    fn test_stops_at_section_end() {
        let sec = section();
        let dis = DisasmSection::new(&sec);
        let mut parent = BasicBlock::new(0x1007);
        parent.end = 0x1008;

        assert!(LinearStrategy::new().mutate(&dis, Some(&parent)).is_empty());
    }

    #[test]
    fn test_score_and_select_keep_everything() {
        let sec = section();
        let dis = DisasmSection::new(&sec);
        let strategy = LinearStrategy::new();

        let mut bbs = vec![BasicBlock::new(0x1000), BasicBlock::new(0x1001)];
        bbs[1].invalid = true;
        assert_eq!(strategy.score(&dis, &mut bbs[0]), 1.0);
        assert_eq!(strategy.score(&dis, &mut bbs[1]), 0.0);

        assert_eq!(strategy.select(&dis, &mut bbs).unwrap(), 2);
        assert!(bbs.iter().all(|bb| bb.alive));
    }
}
