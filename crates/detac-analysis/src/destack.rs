//! Translation of stack-oriented EVM blocks into register-style TAC.

use detac_primitives::{
    AddressSpace, DefSites, EvmBlock, EvmOp, MemLoc, OpCode, Variable, VariableStack,
};

use crate::block::TacBlock;
use crate::op::{Lhs, TacArg, TacOp, TacOperand};

/// Converts EVM basic blocks into corresponding TAC blocks.
///
/// Most instructions map over directly, except:
/// * POP pops the symbolic stack and generates no TAC op;
/// * PUSH generates a CONST assignment;
/// * DUP and SWAP permute the symbolic stack and generate no ops;
/// * LOG0..LOG4 all translate to a generic LOG instruction.
///
/// A block whose EVM code produces no TAC ops receives a NOP so that every
/// block carries at least one operation with its pc.
#[derive(Debug, Default)]
pub struct Destackifier {
    ops: Vec<TacOp>,
    stack: VariableStack,
    /// Count of TAC variables assigned in the current block, for unique
    /// names within it.
    var_count: usize,
    block_entry: u32,
    overflow: bool,
}

impl Destackifier {
    pub fn new() -> Destackifier {
        Destackifier::default()
    }

    /// Reinitialise all structures in preparation for converting a block.
    fn fresh_init(&mut self, evm_block: &EvmBlock) {
        self.ops = Vec::new();
        self.stack = VariableStack::new();
        self.var_count = 0;
        self.block_entry = evm_block.entry;
        self.overflow = false;
    }

    fn new_var(&mut self) -> Variable {
        let var = Variable::fresh(
            format!("V{}", self.var_count),
            DefSites::singleton(self.block_entry),
        );
        self.var_count += 1;
        var
    }

    fn push_result(&mut self, var: Variable) {
        if !self.stack.push(var) {
            self.overflow = true;
        }
    }

    fn pop_args(&mut self, n: usize) -> Vec<TacOperand> {
        self.stack
            .pop_many(n)
            .into_iter()
            .map(|v| TacOperand::Arg(TacArg::from_var(v)))
            .collect()
    }

    /// Produce an equivalent three-address code sequence for the given EVM
    /// block, along with the delta stack summarising its effect on any
    /// caller's stack.
    pub fn convert_block(&mut self, evm_block: &EvmBlock) -> TacBlock {
        self.fresh_init(evm_block);

        for op in &evm_block.ops {
            self.handle_evm_op(op);
        }

        if self.ops.is_empty() {
            self.ops.push(TacOp::nop(evm_block.entry));
        }

        let mut block = TacBlock::new(
            evm_block.entry,
            evm_block.exit,
            std::mem::take(&mut self.ops),
            evm_block.ops.clone(),
            std::mem::take(&mut self.stack),
        );
        block.symbolic_overflow = self.overflow;
        block
    }

    fn handle_evm_op(&mut self, op: &EvmOp) {
        if op.opcode.is_swap() {
            if !self.stack.swap(op.opcode.pop()) {
                self.overflow = true;
            }
        } else if op.opcode.is_dup() {
            if !self.stack.dup(op.opcode.pop()) {
                self.overflow = true;
            }
        } else if op.opcode == OpCode::Pop {
            self.stack.pop();
        } else {
            self.gen_instruction(op);
        }
    }

    /// Generate the TAC operation for one EVM instruction, pushing any
    /// produced variable.
    fn gen_instruction(&mut self, op: &EvmOp) {
        // Anything that pushes, pushes exactly one word; its variable is
        // allocated before the arguments are popped.
        let var = if op.opcode.push() == 1 {
            Some(self.new_var())
        } else {
            None
        };

        let inst = match op.opcode {
            OpCode::Push(_) => {
                let immediate = op.value.expect("push carries an immediate");
                let args = vec![TacOperand::Arg(TacArg::from_var(Variable::constant(
                    immediate,
                )))];
                let mut inst = TacOp::assign(
                    Lhs::Var(var.clone().expect("push produces a variable")),
                    OpCode::Const,
                    args,
                    op.pc,
                );
                inst.print_name = false;
                inst
            }
            OpCode::Log(n) => {
                let args = self.pop_args(OpCode::Log(n).pop());
                TacOp::new(OpCode::GenericLog, args, op.pc)
            }
            OpCode::MLoad => {
                let address = self.pop_loc_arg();
                let mut inst = TacOp::assign(
                    Lhs::Var(var.clone().expect("mload produces a variable")),
                    op.opcode,
                    vec![TacOperand::Loc(MemLoc::mloc32(address))],
                    op.pc,
                );
                inst.print_name = false;
                inst
            }
            OpCode::MStore => self.gen_store(op, AddressSpace::Mem32),
            OpCode::MStore8 => self.gen_store(op, AddressSpace::Mem1),
            OpCode::SLoad => {
                let address = self.pop_loc_arg();
                let mut inst = TacOp::assign(
                    Lhs::Var(var.clone().expect("sload produces a variable")),
                    op.opcode,
                    vec![TacOperand::Loc(MemLoc::sloc32(address))],
                    op.pc,
                );
                inst.print_name = false;
                inst
            }
            OpCode::SStore => self.gen_store(op, AddressSpace::Storage),
            _ => {
                let args = self.pop_args(op.opcode.pop());
                match &var {
                    Some(var) => TacOp::assign(Lhs::Var(var.clone()), op.opcode, args, op.pc),
                    None => TacOp::new(op.opcode, args, op.pc),
                }
            }
        };

        if let Some(var) = var {
            self.push_result(var);
        }
        self.ops.push(inst);
    }

    fn pop_loc_arg(&mut self) -> TacArg {
        TacArg::from_var(self.stack.pop())
    }

    fn gen_store(&mut self, op: &EvmOp, space: AddressSpace) -> TacOp {
        let address = self.pop_loc_arg();
        let value = self.pop_args(1);
        TacOp {
            opcode: op.opcode,
            args: value,
            pc: op.pc,
            lhs: Some(Lhs::Loc(MemLoc { space, address })),
            print_name: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use detac_primitives::disasm::parse_hex;

    fn destackify(hex: &str) -> Vec<TacBlock> {
        let mut destack = Destackifier::new();
        parse_hex(hex)
            .unwrap()
            .iter()
            .map(|b| destack.convert_block(b))
            .collect()
    }

    #[test]
    fn push_add_sequence() {
        // PUSH1 3; PUSH1 4; ADD
        let blocks = destackify("6003600401");
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.tac_ops.len(), 3);

        assert_eq!(block.tac_ops[0].opcode, OpCode::Const);
        assert_eq!(block.tac_ops[0].lhs_var().unwrap().name(), "V0");
        assert_eq!(
            block.tac_ops[0].args[0].arg().unwrap().value().const_value(),
            Some(U256::from(3u64))
        );

        assert_eq!(block.tac_ops[2].opcode, OpCode::Add);
        assert_eq!(block.tac_ops[2].lhs_var().unwrap().name(), "V2");
        // ADD's first argument is the top of stack: V1.
        assert_eq!(
            block.tac_ops[2].args[0].arg().unwrap().value().name(),
            "V1"
        );
        assert_eq!(
            block.tac_ops[2].args[1].arg().unwrap().value().name(),
            "V0"
        );

        // The residual stack holds the result; nothing was popped from the
        // caller.
        assert_eq!(block.delta_stack.len(), 1);
        assert_eq!(block.delta_stack.empty_pops, 0);
    }

    #[test]
    fn underflowing_add_names_caller_slots() {
        // A bare ADD pops two meta-variables.
        let blocks = destackify("01");
        let block = &blocks[0];
        assert_eq!(block.delta_stack.empty_pops, 2);
        let op = &block.tac_ops[0];
        let s0 = op.args[0].arg().unwrap().value();
        let s1 = op.args[1].arg().unwrap().value();
        assert_eq!(s0.meta_depth(), Some(0));
        assert_eq!(s1.meta_depth(), Some(1));
    }

    #[test]
    fn stack_shuffles_emit_nop() {
        // DUP1; POP is pure stack traffic, so the block gets a NOP
        // placeholder carrying its pc.
        let blocks = destackify("8050");
        let block = &blocks[0];
        assert_eq!(block.tac_ops.len(), 1);
        assert_eq!(block.tac_ops[0].opcode, OpCode::Nop);
        // DUP1 on the empty stack duplicated a meta-variable, POP removed
        // one copy again.
        assert_eq!(block.delta_stack.len(), 1);
    }

    #[test]
    fn logs_become_generic() {
        // PUSH1 0; PUSH1 0; LOG1 pops three arguments.
        let blocks = destackify("60006000a1");
        let block = &blocks[0];
        let log = block.tac_ops.last().unwrap();
        assert_eq!(log.opcode, OpCode::GenericLog);
        assert_eq!(log.args.len(), 3);
        assert_eq!(block.delta_stack.empty_pops, 1);
    }

    #[test]
    fn stores_write_locations() {
        // PUSH1 0x40; MSTORE stores a caller value at a constant address.
        let blocks = destackify("604052");
        let block = &blocks[0];
        let store = block.tac_ops.last().unwrap();
        assert_eq!(store.opcode, OpCode::MStore);
        let loc = store.lhs.as_ref().unwrap().mem_loc().unwrap();
        assert_eq!(loc.space, AddressSpace::Mem32);
        assert_eq!(store.args.len(), 1);
        assert_eq!(block.delta_stack.empty_pops, 1);
    }

    #[test]
    fn loads_produce_variables() {
        // PUSH1 0x40; MLOAD
        let blocks = destackify("604051");
        let block = &blocks[0];
        let load = block.tac_ops.last().unwrap();
        assert_eq!(load.opcode, OpCode::MLoad);
        assert_eq!(load.lhs_var().unwrap().name(), "V1");
        let loc = load.args[0].mem_loc().unwrap();
        assert_eq!(loc.space, AddressSpace::Mem32);
        // The location is keyed by the address variable the block pushed.
        assert_eq!(loc.address.name(), "V0");
        assert_eq!(block.delta_stack.len(), 1);
    }

    #[test]
    fn fresh_variables_carry_def_sites() {
        let blocks = destackify("600456005b6003");
        // The JUMPDEST block starts at pc 4; its PUSH variable is defined
        // there.
        let block = &blocks[2];
        assert_eq!(block.entry, 4);
        let var = block.tac_ops.last().unwrap().lhs_var().unwrap();
        assert!(var.def_sites().iter().any(|pc| *pc == 4));
    }
}
