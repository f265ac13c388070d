//! Mutation, scoring and selection policies driving the exploration engine.

use std::fmt;

use clap::ValueEnum;

use crate::disasm::DisasmSection;
use crate::{BasicBlock, Binary, DisassemblyError};

pub mod linear;
pub mod recursive;

/// Policy hooks consulted by [`crate::disasm::disasm_section`].
///
/// The engine does not deduplicate candidates against the address map;
/// a policy that keeps proposing mapped addresses never terminates.
pub trait Strategy {
    /// Propose candidate blocks to decode next.
    ///
    /// `parent` is `None` exactly once per section, to seed the worklist.
    fn mutate(&mut self, dis: &DisasmSection<'_>, parent: Option<&BasicBlock>) -> Vec<BasicBlock>;

    /// Score a decoded candidate and record the score on it.
    ///
    /// A negative score aborts the section.
    fn score(&self, dis: &DisasmSection<'_>, bb: &mut BasicBlock) -> f64;

    /// Set `alive` on the candidates to keep; returns how many survive.
    fn select(&self, dis: &DisasmSection<'_>, bbs: &mut [BasicBlock]) -> Result<usize, DisassemblyError>;
}

/// Available exploration strategies.
#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Linear sweep over every byte of the section
    #[default]
    Linear,
    /// Recursive descent from the entry point, following branches
    Recursive,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Linear => write!(f, "Linear sweep"),
            StrategyKind::Recursive => write!(f, "Recursive descent"),
        }
    }
}

impl StrategyKind {
    /// Instantiate the policy for `binary`.
    pub fn build(&self, binary: &Binary) -> Box<dyn Strategy> {
        match self {
            StrategyKind::Linear => Box::new(linear::LinearStrategy::new()),
            StrategyKind::Recursive => Box::new(recursive::RecursiveStrategy::new(binary.entry)),
        }
    }

    /// Return all available strategies
    pub fn all() -> &'static [StrategyKind] {
        &[StrategyKind::Linear, StrategyKind::Recursive]
    }
}
