//! TAC basic blocks and their local dataflow passes.

use std::collections::HashMap;
use std::fmt;

use detac_primitives::{EvmOp, OpCode, ValueSet, VarId, Variable, VariableStack};

use crate::error::AnalysisError;
use crate::graph::BlockId;
use crate::op::TacOp;
use crate::settings::Settings;

/// A basic block containing three-address code, its source EVM code, and
/// the symbolic stack information discovered for it.
#[derive(Debug, Clone)]
pub struct TacBlock {
    /// The pc of the first byte in the source EVM block.
    pub entry: u32,
    /// The pc of the last byte in the source EVM block; possibly a PUSH
    /// immediate rather than an instruction.
    pub exit: u32,
    pub tac_ops: Vec<TacOp>,
    pub evm_ops: Vec<EvmOp>,
    /// The block's effect on a caller's stack: the items left on top, plus
    /// `empty_pops` recording how deep the block reached below its entry.
    /// Meta-variables named `Sn` denote the entry stack at depth n.
    pub delta_stack: VariableStack,
    /// The complete stack state before execution of the block.
    pub entry_stack: VariableStack,
    /// The complete stack state after execution of the block.
    pub exit_stack: VariableStack,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    pub has_unresolved_jump: bool,
    /// Set when dataflow analysis overflowed the symbolic stack in this
    /// block.
    pub symbolic_overflow: bool,
    /// Disambiguates blocks sharing an entry address after cloning or
    /// merging.
    pub ident_suffix: String,
}

impl TacBlock {
    pub fn new(
        entry: u32,
        exit: u32,
        tac_ops: Vec<TacOp>,
        evm_ops: Vec<EvmOp>,
        delta_stack: VariableStack,
    ) -> TacBlock {
        TacBlock {
            entry,
            exit,
            tac_ops,
            evm_ops,
            delta_stack,
            entry_stack: VariableStack::new(),
            exit_stack: VariableStack::new(),
            preds: Vec::new(),
            succs: Vec::new(),
            has_unresolved_jump: false,
            symbolic_overflow: false,
            ident_suffix: String::new(),
        }
    }

    pub fn ident(&self) -> String {
        format!("{:#x}{}", self.entry, self.ident_suffix)
    }

    /// The block's final operation. Blocks always carry at least one.
    pub fn final_op(&self) -> &TacOp {
        self.tac_ops.last().expect("block holds at least one op")
    }

    /// Propagate and fold constants through this block's operations.
    ///
    /// Values flow through an environment keyed by variable identity: a
    /// folded result is a redefinition of its variable, visible to later
    /// arguments in the block and, afterwards, to the delta stack.
    ///
    /// With `set_valued_ops`, folding also runs over variables holding
    /// several possible values, in all combinations; results wider than
    /// `widen_threshold` are promoted to Top when `widen_variables` is set.
    pub fn apply_operations(&mut self, settings: &Settings) -> Result<(), AnalysisError> {
        let mut env: HashMap<VarId, ValueSet> = HashMap::new();

        for op in &mut self.tac_ops {
            for operand in &mut op.args {
                if let Some(arg) = operand.arg_mut() {
                    if let Some(var) = arg.var_mut() {
                        if let Some(values) = env.get(&var.id()) {
                            var.set_values(values.clone());
                        }
                    }
                }
            }

            if op.opcode == OpCode::Const {
                let values = op.args[0].arg().expect("const takes a plain arg").value().values().clone();
                if let Some(lhs) = op.lhs_var_mut() {
                    lhs.set_values(values);
                }
            } else if op.opcode.is_arithmetic()
                && (op.constant_args() || (settings.set_valued_ops && op.constrained_args()))
            {
                let args: Vec<Variable> = op
                    .args
                    .iter()
                    .map(|a| a.arg().expect("arithmetic takes plain args").value().clone())
                    .collect();
                let arg_refs: Vec<&Variable> = args.iter().collect();
                let result = Variable::arith_op(op.opcode, &arg_refs)?;

                let mut values = result.values().clone();
                if settings.widen_variables
                    && values.len().is_some_and(|n| n > settings.widen_threshold)
                {
                    values = ValueSet::top();
                }
                if let Some(lhs) = op.lhs_var_mut() {
                    lhs.set_values(values);
                }
            }

            if let Some(lhs) = op.lhs_var() {
                env.insert(lhs.id(), lhs.values().clone());
            }
        }

        for slot in self.delta_stack.items_mut() {
            if let Some(values) = env.get(&slot.id()) {
                slot.set_values(values.clone());
            }
        }

        Ok(())
    }

    /// Bind stack meta-variables in argument positions to the actual
    /// variables at their entry-stack depths. Meta-variables past the
    /// bottom of the known entry stack are left alone: replacing them
    /// would lose information.
    pub fn hook_up_stack_vars(&mut self) {
        let entry_stack = &self.entry_stack;
        for op in &mut self.tac_ops {
            for operand in &mut op.args {
                if let Some(arg) = operand.arg_mut() {
                    if let Some(depth) = arg.stack_var().and_then(|sv| sv.meta_depth()) {
                        if depth < entry_stack.len() {
                            arg.set_var(entry_stack.peek(depth));
                        }
                    }
                }
            }
        }
    }

    /// Derive the exit stack from the entry stack and the delta summary:
    /// pop `empty_pops` slots, then push the delta items with their
    /// meta-variables resolved against the entry stack.
    ///
    /// Returns the new exit stack and whether pushing overflowed.
    pub fn derive_exit_stack(&self) -> (VariableStack, bool) {
        let mut exit = self.entry_stack.clone();
        exit.pop_many(self.delta_stack.empty_pops);

        let resolved: Vec<Variable> = self
            .delta_stack
            .items()
            .iter()
            .map(|slot| match slot.meta_depth() {
                Some(depth) if depth < self.entry_stack.len() => self.entry_stack.peek(depth),
                _ => slot.clone(),
            })
            .collect();

        let pushed = exit.push_many(resolved);
        (exit, !pushed)
    }
}

impl fmt::Display for TacBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Block {}", self.ident())?;
        writeln!(f, "[{:#x}:{:#x}]", self.entry, self.exit)?;
        writeln!(f, "---")?;
        for op in &self.tac_ops {
            writeln!(f, "{op}")?;
        }
        writeln!(f, "---")?;
        writeln!(f, "Entry stack: {}", self.entry_stack)?;
        writeln!(f, "Stack pops: {}", self.delta_stack.empty_pops)?;
        writeln!(f, "Stack additions: {}", self.delta_stack)?;
        write!(f, "Exit stack: {}", self.exit_stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destack::Destackifier;
    use alloy_primitives::U256;
    use detac_primitives::disasm::parse_hex;

    fn block_of(hex: &str) -> TacBlock {
        let mut destack = Destackifier::new();
        let blocks = parse_hex(hex).unwrap();
        destack.convert_block(&blocks[0])
    }

    #[test]
    fn folds_constants_through_add() {
        // PUSH1 3; PUSH1 4; ADD
        let mut block = block_of("6003600401");
        block.apply_operations(&Settings::default()).unwrap();
        let add = block.final_op();
        assert_eq!(
            add.lhs_var().unwrap().const_value(),
            Some(U256::from(7u64))
        );
        // The folded value reaches the delta stack slot for V2.
        assert_eq!(
            block.delta_stack.peek(0).const_value(),
            Some(U256::from(7u64))
        );
    }

    #[test]
    fn folding_respects_set_valued_switch() {
        // An ADD over an unhooked meta-variable cannot fold.
        let mut block = block_of("600301");
        block.apply_operations(&Settings::default()).unwrap();
        assert!(block.final_op().lhs_var().unwrap().is_unconstrained());
    }

    #[test]
    fn widening_promotes_wide_results() {
        let settings = Settings {
            widen_threshold: 3,
            ..Settings::default()
        };
        // Build a block computing over a 4-way value set via hooked args.
        let mut block = block_of("01");
        let wide: ValueSet = (0u64..4).map(U256::from).collect();
        assert!(block
            .entry_stack
            .push(Variable::with_values("A", wide)));
        assert!(block
            .entry_stack
            .push(Variable::with_values("B", ValueSet::singleton(U256::ZERO))));
        block.hook_up_stack_vars();
        block.apply_operations(&settings).unwrap();
        assert!(block.final_op().lhs_var().unwrap().is_unconstrained());
    }

    #[test]
    fn hook_up_binds_only_known_depths() {
        // ADD on an empty block stack: S0 and S1.
        let mut block = block_of("01");
        assert!(block
            .entry_stack
            .push(Variable::with_values("X", ValueSet::singleton(U256::from(5u64)))));
        block.hook_up_stack_vars();
        let op = block.final_op();
        // S0 resolves to the only entry slot; S1 stays symbolic.
        assert_eq!(
            op.args[0].arg().unwrap().value().const_value(),
            Some(U256::from(5u64))
        );
        assert!(op.args[1].arg().unwrap().var().is_none());
    }

    #[test]
    fn exit_stack_resolves_delta_metavars() {
        // SWAP1 leaves [S0, S1] in the delta with no pops beyond depth 2.
        let mut block = block_of("90");
        assert_eq!(block.delta_stack.empty_pops, 2);
        assert!(block
            .entry_stack
            .push(Variable::with_values("A", ValueSet::singleton(U256::from(1u64)))));
        assert!(block
            .entry_stack
            .push(Variable::with_values("B", ValueSet::singleton(U256::from(2u64)))));
        let (exit, overflow) = block.derive_exit_stack();
        assert!(!overflow);
        assert_eq!(exit.len(), 2);
        // The swap exchanged the two entry values.
        assert_eq!(exit.peek(0).const_value(), Some(U256::from(1u64)));
        assert_eq!(exit.peek(1).const_value(), Some(U256::from(2u64)));
    }
}
