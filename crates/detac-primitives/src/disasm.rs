//! Linear-scan disassembly of EVM bytecode into basic blocks.
//!
//! The scan over-approximates: some blocks may turn out to be unreachable
//! data. A block ends after any JUMP, JUMPI or halting instruction, and
//! before any JUMPDEST.

use alloy_primitives::{hex, U256};

use crate::error::DisasmError;
use crate::evm::{EvmBlock, EvmOp};
use crate::opcode::OpCode;

/// Disassemble a hexadecimal bytecode string (optionally 0x-prefixed, with
/// interior whitespace tolerated) into basic blocks.
pub fn parse_hex(src: &str) -> Result<Vec<EvmBlock>, DisasmError> {
    let cleaned: String = src.split_whitespace().collect();
    let cleaned = cleaned.strip_prefix("0x").unwrap_or(&cleaned);
    let bytes = hex::decode(cleaned).map_err(|_| DisasmError::InvalidHex)?;
    parse_bytecode(&bytes)
}

/// Disassemble raw bytecode into basic blocks.
///
/// Undefined opcode bytes decode as INVALID. PUSH immediates that run past
/// the end of the code are zero-padded, as the EVM itself does.
pub fn parse_bytecode(bytes: &[u8]) -> Result<Vec<EvmBlock>, DisasmError> {
    if bytes.is_empty() {
        return Err(DisasmError::NoCode);
    }

    let mut blocks = Vec::new();
    let mut ops: Vec<EvmOp> = Vec::new();
    let mut pc = 0usize;

    while pc < bytes.len() {
        let opcode = OpCode::from_byte(bytes[pc]).unwrap_or(OpCode::Invalid);

        if opcode == OpCode::JumpDest && !ops.is_empty() {
            blocks.push(EvmBlock::new(std::mem::take(&mut ops)));
        }

        let op = if let OpCode::Push(n) = opcode {
            let mut immediate = [0u8; 32];
            let n = n as usize;
            for i in 0..n {
                if let Some(byte) = bytes.get(pc + 1 + i) {
                    immediate[32 - n + i] = *byte;
                }
            }
            EvmOp::with_value(pc as u32, opcode, U256::from_be_slice(&immediate))
        } else {
            EvmOp::new(pc as u32, opcode)
        };

        let splits_after = opcode.is_jump() || opcode.halts();
        ops.push(op);
        pc += 1 + opcode.push_len();

        if splits_after {
            blocks.push(EvmBlock::new(std::mem::take(&mut ops)));
        }
    }

    if !ops.is_empty() {
        blocks.push(EvmBlock::new(ops));
    }

    Ok(blocks)
}
