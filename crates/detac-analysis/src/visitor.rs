//! Traversal surface for downstream consumers.

use crate::block::TacBlock;
use crate::graph::TacGraph;
use crate::op::TacOp;

/// A visitor over the blocks and operations of a [`TacGraph`].
///
/// Both hooks default to doing nothing, so implementors override only the
/// level they care about.
pub trait Visitor {
    fn visit_block(&mut self, _block: &TacBlock) {}

    fn visit_op(&mut self, _op: &TacOp) {}
}

impl TacGraph {
    /// Walk the graph in entry order, visiting each block and then its
    /// operations in sequence.
    pub fn accept<V: Visitor>(&self, visitor: &mut V) {
        for id in self.ids_by_entry() {
            let block = self.block(id);
            visitor.visit_block(block);
            for op in &block.tac_ops {
                visitor.visit_op(op);
            }
        }
    }
}
