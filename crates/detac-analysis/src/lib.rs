//! Three-address-code recovery for EVM bytecode.
//!
//! This crate turns the linear basic blocks produced by
//! `detac-primitives` into a register-style TAC control-flow graph. The
//! [`Destackifier`] translates each block in isolation, summarising its
//! stack effect as a delta stack over meta-variables; the [`TacGraph`]
//! then resolves the data-dependent jumps by propagating symbolic stacks
//! to a fixed point under [`analyse_graph`].

pub mod block;
pub mod dataflow;
pub mod destack;
pub mod error;
pub mod graph;
pub mod op;
pub mod settings;
pub mod visitor;

pub use block::TacBlock;
pub use dataflow::{analyse_graph, Analytics};
pub use destack::Destackifier;
pub use error::AnalysisError;
pub use graph::{BlockId, TacGraph};
pub use op::{Lhs, TacArg, TacOp, TacOperand};
pub use settings::Settings;
pub use visitor::Visitor;
