//! CSV output formatter

use ::csv::WriterBuilder;
use serde::Serialize;

use super::{insn_bytes, sorted_bbs, DisassemblyFormatter};
use crate::disasm::DisasmSection;
use crate::DisassemblyError;

/// One row per instruction; invalid blocks without instructions get one row.
#[derive(Serialize)]
struct InstructionRow<'a> {
    section: &'a str,
    block_start: String,
    block_end: String,
    score: f64,
    invalid: bool,
    padding: bool,
    address: String,
    size: u8,
    mnemonic: &'a str,
    operands: &'a str,
    bytes: String,
}

fn csv_error(e: impl std::fmt::Display) -> DisassemblyError {
    DisassemblyError::Generic(format!("CSV serialization error: {}", e))
}

impl DisassemblyFormatter for super::CsvFormatter {
    fn format(&self, sections: &[DisasmSection<'_>]) -> Result<String, DisassemblyError> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());

        for dis in sections {
            let sec = dis.section;
            for bb in sorted_bbs(dis) {
                let block_start = format!("0x{:x}", bb.start);
                let block_end = format!("0x{:x}", bb.end);

                if bb.insns.is_empty() {
                    writer
                        .serialize(InstructionRow {
                            section: &sec.name,
                            block_start: block_start.clone(),
                            block_end: block_end.clone(),
                            score: bb.score,
                            invalid: bb.invalid,
                            padding: bb.padding,
                            address: block_start.clone(),
                            size: 0,
                            mnemonic: "(bad)",
                            operands: "",
                            bytes: String::new(),
                        })
                        .map_err(csv_error)?;
                }

                for insn in &bb.insns {
                    writer
                        .serialize(InstructionRow {
                            section: &sec.name,
                            block_start: block_start.clone(),
                            block_end: block_end.clone(),
                            score: bb.score,
                            invalid: bb.invalid,
                            padding: bb.padding,
                            address: format!("0x{:x}", insn.start),
                            size: insn.size,
                            mnemonic: &insn.mnem,
                            operands: &insn.op_str,
                            bytes: insn_bytes(sec, insn),
                        })
                        .map_err(csv_error)?;
                }
            }
        }

        let data = writer.into_inner().map_err(csv_error)?;
        String::from_utf8(data).map_err(csv_error)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample_binary;
    use super::super::CsvFormatter;
    use super::*;
    use crate::{nucleus_disasm, Options};

    #[test]
    fn test_csv_rows() {
        let bin = sample_binary();
        let sections = nucleus_disasm(&bin, &Options::default()).unwrap();
        let out = CsvFormatter.format(&sections).unwrap();

        let mut reader = ::csv::Reader::from_reader(out.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "section");
        assert_eq!(&headers[7], "size");

        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        // nop, nop, ret, then two invalid bytes of .rodata
        assert_eq!(rows.len(), 5);
        assert_eq!(&rows[2][8], "ret");
        assert_eq!(&rows[2][10], "c3");
        assert_eq!(&rows[3][0], ".rodata");
        assert_eq!(&rows[3][8], "(bad)");
        assert_eq!(&rows[3][4], "true");
    }

    #[test]
    fn test_operands_with_commas_are_quoted() {
        // mov rbp, rsp; ret
        let bin = crate::Binary::from_raw(vec![0x48, 0x89, 0xe5, 0xc3], 0, crate::Architecture::X86, 64);
        let sections = nucleus_disasm(&bin, &Options::default()).unwrap();
        let out = CsvFormatter.format(&sections).unwrap();

        assert!(out.contains("\"rbp, rsp\""));
    }
}
