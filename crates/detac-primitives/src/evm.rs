//! Linear EVM operations and basic blocks, as produced by the disassembler.

use std::fmt;

use alloy_primitives::U256;

use crate::opcode::OpCode;

/// A single disassembled EVM instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmOp {
    /// Offset of this instruction's opcode byte.
    pub pc: u32,
    pub opcode: OpCode,
    /// The immediate, for PUSH instructions.
    pub value: Option<U256>,
}

impl EvmOp {
    pub fn new(pc: u32, opcode: OpCode) -> EvmOp {
        EvmOp {
            pc,
            opcode,
            value: None,
        }
    }

    pub fn with_value(pc: u32, opcode: OpCode, value: U256) -> EvmOp {
        EvmOp {
            pc,
            opcode,
            value: Some(value),
        }
    }
}

impl fmt::Display for EvmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{:#x}: {} {v:#x}", self.pc, self.opcode),
            None => write!(f, "{:#x}: {}", self.pc, self.opcode),
        }
    }
}

/// A maximal straight-line sequence of EVM instructions.
///
/// `entry` is the pc of the first instruction; `exit` is the pc of the last
/// byte in the block, which may be a PUSH immediate byte rather than an
/// instruction. Blocks tile the bytecode without gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmBlock {
    pub entry: u32,
    pub exit: u32,
    pub ops: Vec<EvmOp>,
}

impl EvmBlock {
    pub fn new(ops: Vec<EvmOp>) -> EvmBlock {
        let entry = ops.first().map(|op| op.pc).unwrap_or(0);
        let exit = ops
            .last()
            .map(|op| op.pc + op.opcode.push_len() as u32)
            .unwrap_or(entry);
        EvmBlock { entry, exit, ops }
    }
}

impl fmt::Display for EvmBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Block [{:#x}:{:#x}]", self.entry, self.exit)?;
        for op in &self.ops {
            writeln!(f, "{op}")?;
        }
        Ok(())
    }
}
