//! Section exploration engine and top-level driver.

use std::collections::VecDeque;

use crate::block::decode_block;
use crate::decoder::CapstoneDecoder;
use crate::strategy::{Strategy, StrategyKind};
use crate::{AddrFlags, AddressMap, Address, BasicBlock, Binary, DisassemblyError, Section};

/// Run-wide options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Leave data sections alone
    pub only_code_sections: bool,
    pub strategy: StrategyKind,
}

/// Disassembly state for one section: its address map and accepted blocks.
#[derive(Debug, Clone)]
pub struct DisasmSection<'a> {
    pub section: &'a Section,
    pub addrmap: AddressMap,
    pub bbs: Vec<BasicBlock>,
}

impl<'a> DisasmSection<'a> {
    /// Track every byte of `section` as unmapped.
    pub fn new(section: &'a Section) -> Self {
        let mut addrmap = AddressMap::new();
        for addr in section.vma..section.end() {
            addrmap.insert(addr);
        }
        Self {
            section,
            addrmap,
            bbs: Vec::new(),
        }
    }

    /// Sort accepted blocks by start address.
    pub fn sort_bbs(&mut self) {
        self.bbs.sort_by(BasicBlock::comparator);
    }

    /// Record an accepted block in the address map and keep it.
    ///
    /// Returns the index of the stored block.
    fn accept(&mut self, bb: BasicBlock) -> usize {
        self.addrmap.add_addr_flag(bb.start, AddrFlags::BB_START);
        for insn in &bb.insns {
            self.addrmap.add_addr_flag(insn.start, AddrFlags::INS_START);
        }
        let end: Address = bb.end.min(self.section.end());
        for addr in bb.start..end {
            self.addrmap.add_addr_flag(addr, AddrFlags::CODE);
        }
        self.bbs.push(bb);
        self.bbs.len() - 1
    }
}

/// One [`DisasmSection`] per section to explore, with every byte unmapped.
///
/// Data sections are included unless `only_code_sections` is set.
pub fn init_disasm<'a>(binary: &'a Binary, options: &Options) -> Vec<DisasmSection<'a>> {
    binary
        .sections
        .iter()
        .filter(|sec| sec.is_code() || !options.only_code_sections)
        .map(DisasmSection::new)
        .collect()
}

/// Explore one section until the strategy stops producing survivors.
///
/// A single decoder handle serves every block of the section and is dropped
/// when this returns. An unsupported architecture or width, a decode error,
/// a negative score or a selection error aborts the section.
pub fn disasm_section(
    binary: &Binary,
    dis: &mut DisasmSection<'_>,
    strategy: &mut dyn Strategy,
    options: &Options,
) -> Result<(), DisassemblyError> {
    if !dis.section.is_code() && options.only_code_sections {
        log::warn!("skipping non-code section '{}'", dis.section.name);
        return Ok(());
    }

    log::debug!("disassembling section '{}'", dis.section.name);

    crate::classify::ensure_supported(binary)?;
    let decoder = CapstoneDecoder::for_binary(binary)?;
    let mut queue: VecDeque<Option<usize>> = VecDeque::from([None]);

    while let Some(parent) = queue.pop_front() {
        let mut mutants = strategy.mutate(dis, parent.map(|i| &dis.bbs[i]));

        for bb in mutants.iter_mut() {
            decode_block(binary, dis.section, &decoder, bb)?;
            let score = strategy.score(dis, bb);
            if score < 0.0 {
                return Err(DisassemblyError::ScoreFailure {
                    addr: bb.start,
                    section: dis.section.name.clone(),
                    score,
                });
            }
        }

        let survivors = strategy.select(dis, &mut mutants)?;
        log::trace!(
            "{} of {} candidates survive in '{}'",
            survivors,
            mutants.len(),
            dis.section.name
        );

        for bb in mutants.into_iter().filter(|bb| bb.alive) {
            let idx = dis.accept(bb);
            queue.push_back(Some(idx));
        }
    }

    log::debug!(
        "section '{}': {} basic blocks, {} bytes unmapped",
        dis.section.name,
        dis.bbs.len(),
        dis.addrmap.unmapped_count()
    );

    Ok(())
}

/// Disassemble every section of `binary` with the configured strategy.
///
/// Sections are explored in order; the first fatal error aborts the run.
pub fn nucleus_disasm<'a>(
    binary: &'a Binary,
    options: &Options,
) -> Result<Vec<DisasmSection<'a>>, DisassemblyError> {
    log::info!(
        "disassembling {} ({} {}-bit, {}) with {}",
        binary.filename,
        binary.arch,
        binary.bits,
        binary.binary_type,
        options.strategy
    );

    let mut sections = init_disasm(binary, options);
    for dis in sections.iter_mut() {
        let mut strategy = options.strategy.build(binary);
        disasm_section(binary, dis, strategy.as_mut(), options)?;
    }

    Ok(sections)
}
