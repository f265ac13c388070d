//! JSON and JSON Lines output formatters

use serde::{Deserialize, Serialize};

use super::{bb_flags, insn_bytes, sorted_bbs, DisassemblyFormatter};
use crate::disasm::DisasmSection;
use crate::{BasicBlock, DisassemblyError, Instruction, Section};

/// Serializable instruction for JSON output
#[derive(Serialize, Deserialize)]
struct InstructionJson {
    address: String,
    size: u8,
    mnemonic: String,
    operands: String,
    /// Bytes of the instruction as hex string
    bytes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    cflow: bool,
    call: bool,
    ret: bool,
    nop: bool,
    indirect: bool,
}

/// Serializable basic block for JSON output
#[derive(Serialize, Deserialize)]
struct BasicBlockJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    section: Option<String>,
    start: String,
    end: String,
    score: f64,
    /// Compact `iptn` attribute string
    flags: String,
    invalid: bool,
    privileged: bool,
    trap: bool,
    padding: bool,
    instructions: Vec<InstructionJson>,
}

/// Serializable section for JSON output
#[derive(Serialize, Deserialize)]
struct SectionJson {
    name: String,
    #[serde(rename = "type")]
    section_type: String,
    vma: String,
    size: u64,
    unmapped: usize,
    blocks: Vec<BasicBlockJson>,
}

/// Serializable disassembly result for JSON output
#[derive(Serialize, Deserialize)]
struct DisassemblyJson {
    sections: Vec<SectionJson>,
}

fn json_error(e: serde_json::Error) -> DisassemblyError {
    DisassemblyError::Generic(format!("JSON serialization error: {}", e))
}

impl DisassemblyFormatter for super::JsonFormatter {
    fn format(&self, sections: &[DisasmSection<'_>]) -> Result<String, DisassemblyError> {
        let result = DisassemblyJson {
            sections: sections.iter().map(section_to_json).collect(),
        };

        serde_json::to_string_pretty(&result).map_err(json_error)
    }
}

impl DisassemblyFormatter for super::JsonLinesFormatter {
    fn format(&self, sections: &[DisasmSection<'_>]) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        for dis in sections {
            for bb in sorted_bbs(dis) {
                let mut block = block_to_json(dis.section, bb);
                block.section = Some(dis.section.name.clone());
                output.push_str(&serde_json::to_string(&block).map_err(json_error)?);
                output.push('\n');
            }
        }

        Ok(output)
    }
}

fn section_to_json(dis: &DisasmSection<'_>) -> SectionJson {
    let sec = dis.section;
    SectionJson {
        name: sec.name.clone(),
        section_type: if sec.is_code() { "code" } else { "data" }.to_string(),
        vma: format!("0x{:x}", sec.vma),
        size: sec.size(),
        unmapped: dis.addrmap.unmapped_count(),
        blocks: sorted_bbs(dis)
            .into_iter()
            .map(|bb| block_to_json(sec, bb))
            .collect(),
    }
}

/// Convert a basic block to JSON format
fn block_to_json(section: &Section, bb: &BasicBlock) -> BasicBlockJson {
    BasicBlockJson {
        section: None,
        start: format!("0x{:x}", bb.start),
        end: format!("0x{:x}", bb.end),
        score: bb.score,
        flags: bb_flags(bb),
        invalid: bb.invalid,
        privileged: bb.privileged,
        trap: bb.trap,
        padding: bb.padding,
        instructions: bb
            .insns
            .iter()
            .map(|insn| instruction_to_json(section, insn))
            .collect(),
    }
}

/// Convert an instruction to JSON format
fn instruction_to_json(section: &Section, insn: &Instruction) -> InstructionJson {
    InstructionJson {
        address: format!("0x{:x}", insn.start),
        size: insn.size,
        mnemonic: insn.mnem.clone(),
        operands: insn.op_str.clone(),
        bytes: insn_bytes(section, insn),
        target: insn.target.map(|t| format!("0x{:x}", t)),
        cflow: insn.is_cflow(),
        call: insn.is_call(),
        ret: insn.is_ret(),
        nop: insn.is_nop(),
        indirect: insn.is_indirect(),
    }
}
