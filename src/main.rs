//! nucleus-disasm: recover basic blocks from stripped binaries.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use nucleus_disasm::format::{write_output, OutputFormat};
use nucleus_disasm::parser::GoblinParser;
use nucleus_disasm::strategy::StrategyKind;
use nucleus_disasm::{nucleus_disasm, Address, Architecture, Binary, BinaryParser, Options};

/// Architectures accepted for flat images.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum RawArch {
    X86,
}

impl From<RawArch> for Architecture {
    fn from(arch: RawArch) -> Self {
        match arch {
            RawArch::X86 => Architecture::X86,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "nucleus-disasm", version, about = "Compiler-agnostic basic block recovery")]
struct Cli {
    /// Binary to disassemble (ELF, PE, Mach-O, or a flat image with --raw)
    binary: PathBuf,

    /// Exploration strategy
    #[arg(short, long, value_enum, default_value_t = StrategyKind::Linear)]
    strategy: StrategyKind,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Only disassemble code sections
    #[arg(long)]
    only_code_sections: bool,

    /// Treat the input as a flat code image
    #[arg(long)]
    raw: bool,

    /// Architecture of a raw image (with --raw)
    #[arg(long, value_enum, default_value_t = RawArch::X86)]
    arch: RawArch,

    /// Instruction-set width of a raw image (with --raw)
    #[arg(long, default_value_t = 64)]
    bits: u8,

    /// Load address of a raw image (decimal or 0x-prefixed hex)
    #[arg(long, default_value = "0", value_parser = parse_address)]
    base: Address,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_address(s: &str) -> Result<Address, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => Address::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load(cli: &Cli) -> Result<Binary> {
    let data = fs::read(&cli.binary)
        .with_context(|| format!("failed to read {}", cli.binary.display()))?;
    if data.is_empty() {
        bail!("{} is empty", cli.binary.display());
    }

    let mut binary = if cli.raw {
        Binary::from_raw(data, cli.base, cli.arch.into(), cli.bits)
    } else {
        GoblinParser::new()
            .parse(&data)
            .with_context(|| format!("failed to load {}", cli.binary.display()))?
    };
    binary.filename = cli.binary.display().to_string();

    Ok(binary)
}

fn run(cli: &Cli) -> Result<()> {
    let binary = load(cli)?;
    let options = Options {
        only_code_sections: cli.only_code_sections,
        strategy: cli.strategy,
    };

    let sections = nucleus_disasm(&binary, &options)
        .with_context(|| format!("disassembly of {} failed", binary.filename))?;

    let text = cli
        .format
        .get_formatter()
        .format(&sections)
        .context("failed to render output")?;

    match &cli.output {
        Some(path) => write_output(path, &text)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{}", text),
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
