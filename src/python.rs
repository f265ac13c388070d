//! Python bindings for the nucleus disassembler

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::format::OutputFormat;
use crate::strategy::StrategyKind;
use crate::{nucleus_disasm, parser::GoblinParser, BinaryParser, Options};

fn parse_strategy(name: &str) -> PyResult<StrategyKind> {
    match name.to_lowercase().as_str() {
        "linear" => Ok(StrategyKind::Linear),
        "recursive" => Ok(StrategyKind::Recursive),
        _ => Err(PyValueError::new_err(format!("Unknown strategy: {}", name))),
    }
}

fn parse_output_format(name: &str) -> PyResult<OutputFormat> {
    match name.to_lowercase().as_str() {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        "jsonl" | "jsonlines" | "json-lines" => Ok(OutputFormat::JsonLines),
        "csv" => Ok(OutputFormat::Csv),
        _ => Err(PyValueError::new_err(format!("Unknown output format: {}", name))),
    }
}

/// Disassemble an ELF, PE or Mach-O image held in memory
#[pyfunction]
#[pyo3(signature = (
    binary_data,
    strategy="linear",
    output_format="text",
    only_code_sections=true
))]
fn disassemble(
    binary_data: Vec<u8>,
    strategy: &str,
    output_format: &str,
    only_code_sections: bool,
) -> PyResult<String> {
    let options = Options {
        only_code_sections,
        strategy: parse_strategy(strategy)?,
    };
    let output_format = parse_output_format(output_format)?;

    let binary = GoblinParser::new()
        .parse(&binary_data)
        .map_err(|e| PyValueError::new_err(format!("Failed to parse binary: {}", e)))?;

    let sections = nucleus_disasm(&binary, &options)
        .map_err(|e| PyValueError::new_err(format!("Disassembly failed: {}", e)))?;

    output_format
        .get_formatter()
        .format(&sections)
        .map_err(|e| PyValueError::new_err(format!("Failed to format output: {}", e)))
}

/// Disassemble a file with specified strategy and output format
#[pyfunction]
#[pyo3(signature = (
    file_path,
    strategy="linear",
    output_format="text",
    only_code_sections=true
))]
fn disassemble_file(
    file_path: &str,
    strategy: &str,
    output_format: &str,
    only_code_sections: bool,
) -> PyResult<String> {
    let bytes = std::fs::read(file_path)
        .map_err(|e| PyIOError::new_err(format!("Failed to read file {}: {}", file_path, e)))?;

    log::debug!("disassembling file {} from python", file_path);
    disassemble(bytes, strategy, output_format, only_code_sections)
}

/// Python module initialization
#[pymodule]
#[pyo3(name = "nucleus_disasm")]
fn py_nucleus_disasm(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(disassemble, m)?)?;
    m.add_function(wrap_pyfunction!(disassemble_file, m)?)?;

    let py = m.py();
    let output_format = PyDict::new(py);
    output_format.set_item("TEXT", "text")?;
    output_format.set_item("JSON", "json")?;
    output_format.set_item("JSONL", "jsonl")?;
    output_format.set_item("CSV", "csv")?;
    m.setattr("OutputFormat", output_format)?;

    let strategy = PyDict::new(py);
    strategy.set_item("LINEAR", "linear")?;
    strategy.set_item("RECURSIVE", "recursive")?;
    m.setattr("Strategy", strategy)?;

    Ok(())
}
