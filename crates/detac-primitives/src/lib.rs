//! Lattices, symbolic values and EVM primitives for the detac decompiler.
//!
//! This crate holds the leaves of the analysis: bounded lattice elements,
//! the symbolic [`Variable`] over the 2^256 integer ring, the symbolic
//! [`VariableStack`], memory/storage location descriptors, the EVM opcode
//! table and the linear-scan disassembler that produces the basic blocks
//! consumed by `detac-analysis`.

pub mod disasm;
pub mod error;
pub mod evm;
pub mod lattice;
pub mod location;
pub mod opcode;
pub mod stack;
pub mod value;

pub use error::{DisasmError, ValueError};
pub use evm::{EvmBlock, EvmOp};
pub use lattice::{FlatLattice, SubsetLattice};
pub use location::{AddressSpace, MemLoc};
pub use opcode::OpCode;
pub use stack::VariableStack;
pub use value::{DefSites, ValueSet, VarId, Variable};
