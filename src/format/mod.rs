//! Output formats for explored sections

mod csv;
mod json;

use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use clap::ValueEnum;

use crate::disasm::DisasmSection;
use crate::{BasicBlock, DisassemblyError, Instruction, Section};

/// Supported output formats for disassembly results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text, one listing per section (default)
    #[default]
    Text,
    /// JSON format (hierarchical)
    Json,
    /// JSON Lines format (one JSON object per block)
    JsonLines,
    /// CSV format, one row per instruction
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn DisassemblyFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Formatter trait for disassembly output
pub trait DisassemblyFormatter {
    /// Render the accepted blocks of every section, sorted by start address
    fn format(&self, sections: &[DisasmSection<'_>]) -> Result<String, DisassemblyError>;
}

/// Format disassembly in plain text
pub struct TextFormatter;

/// Format disassembly in JSON
pub struct JsonFormatter;

/// Format disassembly in JSON Lines
pub struct JsonLinesFormatter;

/// Format disassembly in CSV
pub struct CsvFormatter;

/// Write rendered output to `path`.
pub fn write_output(path: impl AsRef<Path>, text: &str) -> Result<(), DisassemblyError> {
    fs::write(path, text)?;
    Ok(())
}

/// Blocks of `dis` in start-address order, without touching the section.
pub(crate) fn sorted_bbs<'s>(dis: &'s DisasmSection<'_>) -> Vec<&'s BasicBlock> {
    let mut bbs: Vec<_> = dis.bbs.iter().collect();
    bbs.sort_by(|a, b| BasicBlock::comparator(a, b));
    bbs
}

/// Hex bytes of `insn`, read back from its section.
pub(crate) fn insn_bytes(section: &Section, insn: &Instruction) -> String {
    let Some(offset) = section.offset_of(insn.start) else {
        return String::new();
    };
    let end = (offset + insn.size as usize).min(section.bytes.len());
    section.bytes[offset..end]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One-letter block attributes: invalid, privileged, trap, padding.
pub(crate) fn bb_flags(bb: &BasicBlock) -> String {
    [
        (bb.invalid, 'i'),
        (bb.privileged, 'p'),
        (bb.trap, 't'),
        (bb.padding, 'n'),
    ]
    .iter()
    .map(|&(set, c)| if set { c } else { '-' })
    .collect()
}

impl DisassemblyFormatter for TextFormatter {
    fn format(&self, sections: &[DisasmSection<'_>]) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        for dis in sections {
            let sec = dis.section;
            let _ = writeln!(
                output,
                "<Section {} {} @0x{:016x} (size {})>\n",
                sec.name,
                if sec.is_code() { "C" } else { "D" },
                sec.vma,
                sec.size()
            );

            for bb in sorted_bbs(dis) {
                let _ = writeln!(
                    output,
                    "BB @0x{:016x} (score {:.10}) {} {{",
                    bb.start,
                    bb.score,
                    bb_flags(bb)
                );
                if bb.invalid && bb.insns.is_empty() {
                    let _ = writeln!(output, "  0x{:016x}  (bad)", bb.start);
                }
                for insn in &bb.insns {
                    let _ = write!(output, "  0x{:016x}  {:<8} {}", insn.start, insn.mnem, insn.op_str);
                    if let Some(target) = insn.target {
                        let _ = write!(output, "  ; -> 0x{:x}", target);
                    }
                    output.push('\n');
                }
                output.push_str("}\n\n");
            }
        }

        Ok(output)
    }
}
