//! Error types for the analysis crate.

use detac_primitives::{DisasmError, ValueError};

/// Fatal analysis failures. Everything else — unresolved jumps, symbolic
/// overflow, iteration caps, timeouts — is recorded on the graph and
/// analysis continues.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A stack was popped past its bottom while `die_on_empty_pop` was set.
    #[error("empty stack popped in block {block:#x}")]
    EmptyPop { block: u32 },

    /// Operand arity disagreement inside a TAC operation.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// The input bytecode yielded no usable blocks.
    #[error(transparent)]
    Disasm(#[from] DisasmError),
}
