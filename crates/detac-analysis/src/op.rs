//! Three-address-code operations.

use std::fmt;

use detac_primitives::{MemLoc, OpCode, Variable};

/// An argument to a TAC operation.
///
/// An argument may hold the current value of the operand, the entry-stack
/// meta-variable it came from, or both. Keeping the meta-variable around
/// lets refined stack data be re-resolved into the operation on every
/// dataflow iteration.
#[derive(Debug, Clone)]
pub struct TacArg {
    var: Option<Variable>,
    stack_var: Option<Variable>,
}

impl TacArg {
    /// Wrap a variable, routing meta-variables into the stack slot.
    pub fn from_var(var: Variable) -> TacArg {
        if var.is_meta() {
            TacArg {
                var: None,
                stack_var: Some(var),
            }
        } else {
            TacArg {
                var: Some(var),
                stack_var: None,
            }
        }
    }

    pub fn var(&self) -> Option<&Variable> {
        self.var.as_ref()
    }

    pub fn var_mut(&mut self) -> Option<&mut Variable> {
        self.var.as_mut()
    }

    pub fn stack_var(&self) -> Option<&Variable> {
        self.stack_var.as_ref()
    }

    /// Bind the actual variable this argument refers to, keeping the stack
    /// variable for later re-resolution.
    pub fn set_var(&mut self, var: Variable) {
        self.var = Some(var);
    }

    /// The argument's value: the bound variable if present, otherwise the
    /// stack meta-variable.
    pub fn value(&self) -> &Variable {
        self.var
            .as_ref()
            .or(self.stack_var.as_ref())
            .expect("TAC argument has no value")
    }
}

impl fmt::Display for TacArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// An operand position: either a plain argument or a symbolic
/// memory/storage location keyed by an address argument.
///
/// Location operands are unconstrained for folding purposes and are not
/// rewritten by stack-variable hookup.
#[derive(Debug, Clone)]
pub enum TacOperand {
    Arg(TacArg),
    Loc(MemLoc<TacArg>),
}

impl TacOperand {
    pub fn arg(&self) -> Option<&TacArg> {
        match self {
            TacOperand::Arg(arg) => Some(arg),
            TacOperand::Loc(_) => None,
        }
    }

    pub fn arg_mut(&mut self) -> Option<&mut TacArg> {
        match self {
            TacOperand::Arg(arg) => Some(arg),
            TacOperand::Loc(_) => None,
        }
    }

    /// True iff this operand's value is a known constant. Locations never
    /// are.
    pub fn is_const(&self) -> bool {
        match self {
            TacOperand::Arg(arg) => arg.value().is_const(),
            TacOperand::Loc(_) => false,
        }
    }

    /// True iff this operand's value could be anything. Locations always
    /// could.
    pub fn is_unconstrained(&self) -> bool {
        match self {
            TacOperand::Arg(arg) => arg.value().is_unconstrained(),
            TacOperand::Loc(_) => true,
        }
    }

    /// The location this operand reads, keyed by the address argument's
    /// current variable.
    pub fn mem_loc(&self) -> Option<MemLoc> {
        match self {
            TacOperand::Arg(_) => None,
            TacOperand::Loc(loc) => Some(MemLoc {
                space: loc.space,
                address: loc.address.value().clone(),
            }),
        }
    }
}

impl fmt::Display for TacOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TacOperand::Arg(arg) => arg.fmt(f),
            TacOperand::Loc(loc) => loc.fmt(f),
        }
    }
}

/// The target an assigning operation writes to.
#[derive(Debug, Clone)]
pub enum Lhs {
    Var(Variable),
    Loc(MemLoc<TacArg>),
}

impl Lhs {
    /// The location this target writes, keyed by the address argument's
    /// current variable.
    pub fn mem_loc(&self) -> Option<MemLoc> {
        match self {
            Lhs::Var(_) => None,
            Lhs::Loc(loc) => Some(MemLoc {
                space: loc.space,
                address: loc.address.value().clone(),
            }),
        }
    }
}

impl fmt::Display for Lhs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lhs::Var(var) => f.write_str(var.name()),
            Lhs::Loc(loc) => loc.fmt(f),
        }
    }
}

/// A three-address-code operation: an opcode, its operands, and the program
/// counter of the EVM instruction it was derived from. Assigning operations
/// additionally carry the target of the result.
#[derive(Debug, Clone)]
pub struct TacOp {
    pub opcode: OpCode,
    pub args: Vec<TacOperand>,
    pub pc: u32,
    pub lhs: Option<Lhs>,
    /// Some operations (CONST, loads, stores) read better without their
    /// opcode name.
    pub print_name: bool,
}

impl TacOp {
    pub fn new(opcode: OpCode, args: Vec<TacOperand>, pc: u32) -> TacOp {
        TacOp {
            opcode,
            args,
            pc,
            lhs: None,
            print_name: true,
        }
    }

    pub fn assign(lhs: Lhs, opcode: OpCode, args: Vec<TacOperand>, pc: u32) -> TacOp {
        TacOp {
            opcode,
            args,
            pc,
            lhs: Some(lhs),
            print_name: true,
        }
    }

    pub fn nop(pc: u32) -> TacOp {
        TacOp::new(OpCode::Nop, Vec::new(), pc)
    }

    /// The variable this operation defines, if any.
    pub fn lhs_var(&self) -> Option<&Variable> {
        match &self.lhs {
            Some(Lhs::Var(var)) => Some(var),
            _ => None,
        }
    }

    pub fn lhs_var_mut(&mut self) -> Option<&mut Variable> {
        match &mut self.lhs {
            Some(Lhs::Var(var)) => Some(var),
            _ => None,
        }
    }

    /// True iff every operand is a constant value.
    pub fn constant_args(&self) -> bool {
        self.args.iter().all(|a| a.is_const())
    }

    /// True iff no operand is value-unconstrained.
    pub fn constrained_args(&self) -> bool {
        self.args.iter().all(|a| !a.is_unconstrained())
    }

    /// Given a jump, the equivalent throw: JUMP becomes THROW, JUMPI
    /// becomes THROWI keeping the condition. Other operations are returned
    /// unchanged.
    pub fn convert_jump_to_throw(op: &TacOp) -> TacOp {
        match op.opcode {
            OpCode::Jump => TacOp::new(OpCode::Throw, Vec::new(), op.pc),
            OpCode::JumpI => TacOp::new(OpCode::ThrowI, vec![op.args[1].clone()], op.pc),
            _ => op.clone(),
        }
    }
}

impl fmt::Display for TacOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: ", self.pc)?;
        if let Some(lhs) = &self.lhs {
            write!(f, "{lhs} = ")?;
        }
        let mut parts: Vec<String> = Vec::new();
        if self.lhs.is_none() || self.print_name {
            parts.push(self.opcode.to_string());
        }
        parts.extend(self.args.iter().map(|a| a.to_string()));
        f.write_str(&parts.join(" "))
    }
}
