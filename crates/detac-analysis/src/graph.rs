//! The TAC control-flow graph and its edge-discovery passes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use alloy_primitives::U256;
use tracing::{debug, trace};

use detac_primitives::{disasm, EvmBlock, OpCode, Variable, VariableStack};

use crate::block::TacBlock;
use crate::destack::Destackifier;
use crate::error::AnalysisError;
use crate::op::TacOp;
use crate::settings::Settings;

/// A stable handle to a block. Blocks live in an arena; removal never
/// invalidates other handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

/// A control-flow graph of TAC basic blocks.
///
/// Edges are stored as predecessor/successor id lists on the blocks, with
/// the graph maintaining both sides.
#[derive(Debug, Clone)]
pub struct TacGraph {
    blocks: Vec<Option<TacBlock>>,
    /// The block at program counter zero, if it exists.
    pub root: Option<BlockId>,
}

impl TacGraph {
    /// Convert a sequence of EVM blocks into TAC form. Constants are
    /// immediately propagated and folded, and edges connected wherever they
    /// can already be inferred.
    pub fn new(evm_blocks: &[EvmBlock], settings: &Settings) -> Result<TacGraph, AnalysisError> {
        let mut destack = Destackifier::new();
        let blocks: Vec<Option<TacBlock>> = evm_blocks
            .iter()
            .map(|b| Some(destack.convert_block(b)))
            .collect();

        let mut graph = TacGraph { blocks, root: None };
        graph.refresh_root();

        // Initial conversion folds constants conservatively and resolves no
        // jump mutations, whatever the analysis settings say.
        let init = Settings {
            set_valued_ops: false,
            mutate_jumps: false,
            generate_throws: false,
            ..settings.clone()
        };
        graph.apply_operations(&init)?;
        graph.hook_up_jumps(&init);
        Ok(graph)
    }

    /// Build a graph straight from a hexadecimal bytecode string.
    pub fn from_hex(src: &str, settings: &Settings) -> Result<TacGraph, AnalysisError> {
        let evm_blocks = disasm::parse_hex(src)?;
        TacGraph::new(&evm_blocks, settings)
    }

    /// Build a graph from raw bytecode.
    pub fn from_bytecode(bytes: &[u8], settings: &Settings) -> Result<TacGraph, AnalysisError> {
        let evm_blocks = disasm::parse_bytecode(bytes)?;
        TacGraph::new(&evm_blocks, settings)
    }

    pub fn block(&self, id: BlockId) -> &TacBlock {
        self.blocks[id.0].as_ref().expect("live block")
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut TacBlock {
        self.blocks[id.0].as_mut().expect("live block")
    }

    pub fn is_live(&self, id: BlockId) -> bool {
        self.blocks.get(id.0).map_or(false, |slot| slot.is_some())
    }

    /// Live block ids in arena order.
    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| BlockId(i))
    }

    /// Live block ids ordered by entry address.
    pub fn ids_by_entry(&self) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self.ids().collect();
        ids.sort_by_key(|id| (self.block(*id).entry, *id));
        ids
    }

    pub fn n_blocks(&self) -> usize {
        self.ids().count()
    }

    fn refresh_root(&mut self) {
        let root = self.ids().find(|id| self.block(*id).entry == 0);
        self.root = root;
    }

    /// Add a block to the arena. Incident edges are whatever its id lists
    /// already claim; callers normalise them.
    pub fn add_block(&mut self, block: TacBlock) -> BlockId {
        self.blocks.push(Some(block));
        BlockId(self.blocks.len() - 1)
    }

    /// Remove a block, disconnecting all incident edges.
    pub fn remove_block(&mut self, id: BlockId) {
        if self.root == Some(id) {
            self.root = None;
        }
        let preds = self.block(id).preds.clone();
        let succs = self.block(id).succs.clone();
        for p in preds {
            if self.is_live(p) {
                self.remove_edge(p, id);
            }
        }
        for s in succs {
            if self.is_live(s) {
                self.remove_edge(id, s);
            }
        }
        self.blocks[id.0] = None;
    }

    pub fn add_edge(&mut self, head: BlockId, tail: BlockId) {
        if !self.block(head).succs.contains(&tail) {
            self.block_mut(head).succs.push(tail);
        }
        if !self.block(tail).preds.contains(&head) {
            self.block_mut(tail).preds.push(head);
        }
    }

    pub fn remove_edge(&mut self, head: BlockId, tail: BlockId) {
        self.block_mut(head).succs.retain(|s| *s != tail);
        self.block_mut(tail).preds.retain(|p| *p != head);
    }

    /// Wipe and rebuild every predecessor list from the successor lists.
    pub fn recalc_preds(&mut self) {
        let ids: Vec<BlockId> = self.ids().collect();
        for id in &ids {
            self.block_mut(*id).preds.clear();
        }
        for id in &ids {
            let succs = self.block(*id).succs.clone();
            for s in succs {
                if !self.block(s).preds.contains(id) {
                    self.block_mut(s).preds.push(*id);
                }
            }
        }
    }

    /// The blocks whose pc spans include the given program counter.
    pub fn blocks_by_pc(&self, pc: u32) -> Vec<BlockId> {
        self.ids()
            .filter(|id| {
                let block = self.block(*id);
                block.entry <= pc && pc <= block.exit
            })
            .collect()
    }

    /// The blocks holding a TAC operation at exactly the given pc.
    pub fn blocks_with_op_at(&self, pc: u32) -> Vec<BlockId> {
        self.blocks_by_pc(pc)
            .into_iter()
            .filter(|id| self.block(*id).tac_ops.iter().any(|op| op.pc == pc))
            .collect()
    }

    /// True iff the given program counter refers to a valid jump
    /// destination.
    pub fn is_valid_jump_dest(&self, pc: u32) -> bool {
        self.blocks_by_pc(pc).into_iter().any(|id| {
            self.block(id)
                .tac_ops
                .iter()
                .any(|op| op.pc == pc && op.opcode == OpCode::JumpDest)
        })
    }

    /// Propagate and fold constants in every block.
    pub fn apply_operations(&mut self, settings: &Settings) -> Result<(), AnalysisError> {
        for id in self.ids_by_entry() {
            self.block_mut(id).apply_operations(settings)?;
        }
        Ok(())
    }

    /// Bind stack meta-variables in every block.
    pub fn hook_up_stack_vars(&mut self) {
        for id in self.ids_by_entry() {
            self.block_mut(id).hook_up_stack_vars();
        }
    }

    /// Resolve jump edges in every block. Returns true iff any edges
    /// changed.
    pub fn hook_up_jumps(&mut self, settings: &Settings) -> bool {
        let mut modified = false;
        for id in self.ids_by_entry() {
            modified |= self.hook_up_jumps_for(id, settings);
        }
        modified
    }

    /// Connect one block to the successors inferable from its jump
    /// condition and destination. Returns true iff its successor set
    /// changed.
    ///
    /// The edge update is monotone while resolution is partial: candidate
    /// lists are narrowed to successors already present when any overlap,
    /// and old successors are dropped only once the destination is
    /// definite.
    pub fn hook_up_jumps_for(&mut self, id: BlockId, settings: &Settings) -> bool {
        let (final_opcode, final_pc, exit_pc) = {
            let block = self.block(id);
            let op = block.final_op();
            (op.opcode, op.pc, block.exit)
        };

        // Valid destination pc -> blocks addressed there.
        let mut jumpdests: BTreeMap<u32, Vec<BlockId>> = BTreeMap::new();
        let mut fallthrough: Vec<BlockId> = Vec::new();
        let mut invalid_jump = false;
        let mut unresolved = true;
        let mut remove_final = false;
        let mut rewrite_to_jump = false;

        match final_opcode {
            OpCode::JumpI => {
                let (dest, cond) = {
                    let op = self.block(id).final_op();
                    (
                        op.args[0].arg().expect("jump dest is a plain arg").value().clone(),
                        op.args[1].arg().expect("jump cond is a plain arg").value().clone(),
                    )
                };

                if settings.mutate_jumps && cond.is_false() {
                    // The branch can never be taken: delete the jump.
                    remove_final = true;
                    fallthrough = self.blocks_by_pc(final_pc + 1);
                    unresolved = false;
                } else if settings.mutate_jumps && cond.is_true() {
                    // The branch is always taken: rewrite to a JUMP.
                    rewrite_to_jump = true;
                    if self.collect_valid_dests(&dest, &mut jumpdests) && jumpdests.is_empty() {
                        invalid_jump = true;
                    }
                    unresolved = false;
                } else {
                    fallthrough = self.blocks_by_pc(final_pc + 1);
                    if self.collect_valid_dests(&dest, &mut jumpdests) && jumpdests.is_empty() {
                        invalid_jump = true;
                    }
                    if !dest.is_unconstrained() {
                        unresolved = false;
                    }
                }
            }
            OpCode::Jump => {
                let dest = self
                    .block(id)
                    .final_op()
                    .args[0]
                    .arg()
                    .expect("jump dest is a plain arg")
                    .value()
                    .clone();
                if self.collect_valid_dests(&dest, &mut jumpdests) && jumpdests.is_empty() {
                    invalid_jump = true;
                }
                if !dest.is_unconstrained() {
                    unresolved = false;
                }
            }
            // Covers THROW and THROWI as well: no jump to resolve, and a
            // non-halting final op falls through to the next block.
            _ => {
                unresolved = false;
                if !final_opcode.halts() {
                    fallthrough = self.blocks_by_pc(exit_pc + 1);
                }
            }
        }

        {
            let block = self.block_mut(id);
            if remove_final {
                block.tac_ops.pop();
                if block.tac_ops.is_empty() {
                    block.tac_ops.push(TacOp::nop(final_pc));
                }
            } else if rewrite_to_jump {
                let op = block.tac_ops.last_mut().expect("final op present");
                op.opcode = OpCode::Jump;
                op.args.pop();
            }
            if settings.generate_throws && invalid_jump {
                let op = block.tac_ops.last_mut().expect("final op present");
                *op = TacOp::convert_jump_to_throw(op);
                trace!(block = %block.ident(), "invalid jump rewritten to throw");
            }
            block.has_unresolved_jump = unresolved;
        }

        // Prefer already-linked successors wherever the candidates overlap
        // them, so partial information never severs a previously valid edge.
        let old_succs: Vec<BlockId> = self.block(id).succs.clone();
        for blocks in jumpdests.values_mut() {
            let keep: Vec<BlockId> = blocks
                .iter()
                .copied()
                .filter(|b| old_succs.contains(b))
                .collect();
            if !keep.is_empty() {
                *blocks = keep;
            }
        }
        let keep: Vec<BlockId> = fallthrough
            .iter()
            .copied()
            .filter(|b| old_succs.contains(b))
            .collect();
        if !keep.is_empty() {
            fallthrough = keep;
        }

        let mut new_succs: BTreeSet<BlockId> = jumpdests.values().flatten().copied().collect();
        new_succs.extend(fallthrough.iter().copied());

        // A definite resolution supersedes old successors; a partial one
        // only accumulates, so edges discovered earlier survive iterations
        // that cannot rediscover them.
        if !unresolved {
            for s in &old_succs {
                if !new_succs.contains(s) {
                    self.remove_edge(id, *s);
                }
            }
        }
        for s in &new_succs {
            if !self.block(id).succs.contains(s) {
                self.add_edge(id, *s);
            }
        }

        let before: BTreeSet<BlockId> = old_succs.into_iter().collect();
        let after: BTreeSet<BlockId> = self.block(id).succs.iter().copied().collect();
        before != after
    }

    /// Record every concrete destination that lands on a JUMPDEST.
    /// Returns false iff the destination set is unconstrained, in which
    /// case nothing can be said about the jump's validity.
    fn collect_valid_dests(&self, dest: &Variable, out: &mut BTreeMap<u32, Vec<BlockId>>) -> bool {
        if dest.is_unconstrained() {
            return false;
        }
        for value in dest.values().iter() {
            if *value > U256::from(u32::MAX) {
                continue;
            }
            let pc = value.to::<u32>();
            if self.is_valid_jump_dest(pc) {
                out.insert(pc, self.blocks_with_op_at(pc));
            }
        }
        true
    }

    /// The blocks reachable from any block containing one of the origin
    /// addresses.
    pub fn transitive_closure(&self, origin_addresses: &[u32]) -> Vec<BlockId> {
        let mut queue: Vec<BlockId> = Vec::new();
        for pc in origin_addresses {
            for id in self.blocks_by_pc(*pc) {
                if !queue.contains(&id) {
                    queue.push(id);
                }
            }
        }

        let mut reached: BTreeSet<BlockId> = BTreeSet::new();
        while let Some(id) = queue.pop() {
            if !reached.insert(id) {
                continue;
            }
            for s in &self.block(id).succs {
                if !reached.contains(s) {
                    queue.push(*s);
                }
            }
        }
        reached.into_iter().collect()
    }

    /// Remove all blocks unreachable from the given origins.
    ///
    /// If not all jumps have been resolved, unreached blocks may actually
    /// be reachable.
    pub fn remove_unreachable_code(&mut self, origin_addresses: &[u32]) {
        let reached: BTreeSet<BlockId> = self.transitive_closure(origin_addresses).into_iter().collect();
        for id in self.ids().collect::<Vec<_>>() {
            if !reached.contains(&id) {
                self.remove_block(id);
            }
        }
    }

    /// Merge blocks sharing an entry address, and optionally identical
    /// edge sets. Stacks are joined and metafied; predecessor and
    /// successor lists union; overflow and unresolved flags OR together.
    /// Iterates until no group of duplicates remains.
    pub fn merge_duplicate_blocks(
        &mut self,
        ignore_preds: bool,
        ignore_succs: bool,
        settings: &Settings,
    ) -> Result<(), AnalysisError> {
        loop {
            let ids: Vec<BlockId> = self.ids().collect();
            let mut groups: Vec<Vec<BlockId>> = Vec::new();
            for id in ids {
                let mut grouped = false;
                for group in groups.iter_mut() {
                    if self.mergeable(id, group[0], ignore_preds, ignore_succs) {
                        group.push(id);
                        grouped = true;
                        break;
                    }
                }
                if !grouped {
                    groups.push(vec![id]);
                }
            }
            groups.retain(|g| g.len() > 1);
            if groups.is_empty() {
                return Ok(());
            }

            for (i, group) in groups.iter().enumerate() {
                debug!(
                    entry = self.block(group[0]).entry,
                    copies = group.len(),
                    "merging duplicate blocks"
                );
                let mut entry_stack =
                    VariableStack::join_all(group.iter().map(|id| &self.block(*id).entry_stack));
                entry_stack.metafy();
                let mut exit_stack =
                    VariableStack::join_all(group.iter().map(|id| &self.block(*id).exit_stack));
                exit_stack.metafy();

                let symbolic_overflow = group.iter().any(|id| self.block(*id).symbolic_overflow);
                let has_unresolved_jump =
                    group.iter().any(|id| self.block(*id).has_unresolved_jump);

                let mut preds: BTreeSet<BlockId> = BTreeSet::new();
                let mut succs: BTreeSet<BlockId> = BTreeSet::new();
                for id in group {
                    preds.extend(self.block(*id).preds.iter().copied());
                    succs.extend(self.block(*id).succs.iter().copied());
                }

                let mut merged = self.block(group[0]).clone();
                merged.entry_stack = entry_stack;
                merged.exit_stack = exit_stack;
                merged.preds = Vec::new();
                merged.succs = Vec::new();
                merged.symbolic_overflow = symbolic_overflow;
                merged.has_unresolved_jump = has_unresolved_jump;
                merged.ident_suffix = format!("_{i}");
                let new_id = self.add_block(merged);

                for p in &preds {
                    self.add_edge(*p, new_id);
                    for b in group {
                        self.remove_edge(*p, *b);
                    }
                }
                for s in &succs {
                    self.add_edge(new_id, *s);
                    for b in group {
                        self.remove_edge(*b, *s);
                    }
                }
                for b in group {
                    self.remove_block(*b);
                }

                if self.blocks_by_pc(self.block(new_id).entry).len() == 1 {
                    self.block_mut(new_id).ident_suffix.clear();
                }

                self.block_mut(new_id).hook_up_stack_vars();
                self.block_mut(new_id).apply_operations(settings)?;
                self.hook_up_jumps_for(new_id, settings);
            }
            self.refresh_root();
        }
    }

    fn mergeable(&self, a: BlockId, b: BlockId, ignore_preds: bool, ignore_succs: bool) -> bool {
        let ba = self.block(a);
        let bb = self.block(b);
        if ba.entry != bb.entry {
            return false;
        }
        if !ignore_preds {
            let pa: BTreeSet<BlockId> = ba.preds.iter().copied().collect();
            let pb: BTreeSet<BlockId> = bb.preds.iter().copied().collect();
            if pa != pb {
                return false;
            }
        }
        if !ignore_succs {
            let sa: BTreeSet<BlockId> = ba.succs.iter().copied().collect();
            let sb: BTreeSet<BlockId> = bb.succs.iter().copied().collect();
            if sa != sb {
                return false;
            }
        }
        true
    }

    /// Split chains feeding genuinely ambiguous jumps.
    ///
    /// A block ending in a jump whose destination set and definition-site
    /// set both hold several members took its destination from several
    /// upstream definitions. The unique-predecessor chain from the jump up
    /// to its most recent confluence point is duplicated once per
    /// confluence predecessor, each copy keeping one predecessor, which
    /// disambiguates which definition flowed to which exit. Iterates until
    /// no chain splits; returns true iff anything split.
    pub fn clone_ambiguous_jump_blocks(&mut self) -> bool {
        let mut modified_any = false;
        // Freshly generated blocks are not split again in this invocation;
        // some would certainly satisfy the fission condition.
        let mut skip: BTreeSet<BlockId> = BTreeSet::new();

        'rescan: loop {
            for id in self.ids().collect::<Vec<_>>() {
                if !self.is_live(id) || skip.contains(&id) {
                    continue;
                }
                if self.split_chain_at(id, &mut skip) {
                    modified_any = true;
                    continue 'rescan;
                }
            }
            break;
        }

        if modified_any {
            self.refresh_root();
        }
        modified_any
    }

    fn split_chain_at(&mut self, id: BlockId, skip: &mut BTreeSet<BlockId>) -> bool {
        {
            let block = self.block(id);
            let Some(final_op) = block.tac_ops.last() else {
                return false;
            };
            if !matches!(final_op.opcode, OpCode::Jump | OpCode::JumpI) {
                return false;
            }
            let Some(dest_arg) = final_op.args.first().and_then(|a| a.arg()) else {
                return false;
            };
            let dests = dest_arg.value();
            // Split only when several destinations were defined in several
            // different blocks. A destination with a single known
            // definition site is not ambiguous, however many values it
            // holds.
            if dests.values().is_const()
                || dests.def_sites().is_const()
                || (dests.is_unconstrained() && dests.def_sites().is_top())
            {
                return false;
            }
        }

        // Walk up the unique-predecessor chain to the most recent
        // confluence point.
        let mut chain = vec![id];
        let mut curr = id;
        let mut cycle = false;
        while self.block(curr).preds.len() == 1 {
            curr = self.block(curr).preds[0];
            if chain.contains(&curr) {
                cycle = true;
                break;
            }
            chain.push(curr);
        }

        let chain_preds: Vec<BlockId> = self.block(curr).preds.clone();
        let chain_succs: Vec<BlockId> = self.block(chain[0]).succs.clone();

        if cycle || chain_preds.is_empty() {
            return false;
        }
        if chain_preds.iter().any(|p| chain.contains(p)) {
            return false;
        }

        debug!(
            block = %self.block(id).ident(),
            chain_len = chain.len(),
            copies = chain_preds.len(),
            "splitting ambiguous jump chain"
        );

        // Duplicate the chain, one copy per confluence predecessor. Copies
        // inherit the originals' edge lists; the surgery below rewires
        // them.
        let copies: Vec<Vec<BlockId>> = chain_preds
            .iter()
            .map(|_| {
                chain
                    .iter()
                    .map(|b| {
                        let copy = self.block(*b).clone();
                        self.add_block(copy)
                    })
                    .collect()
            })
            .collect();

        // Detach every copy head from the confluence predecessors.
        for copy in &copies {
            for p in &chain_preds {
                self.remove_edge(*p, *copy.last().expect("chain is nonempty"));
            }
        }

        // Hand each predecessor its own copy of the chain.
        for (i, p) in chain_preds.iter().enumerate() {
            self.add_edge(*p, *copies[i].last().expect("chain is nonempty"));
            self.remove_edge(*p, *chain.last().expect("chain is nonempty"));
            let suffix = format!("_{}", self.block(*p).ident());
            for b in &copies[i] {
                self.block_mut(*b).ident_suffix.push_str(&suffix);
            }
        }

        // Connect the copies up within themselves.
        for copy in &copies {
            for i in 0..copy.len() - 1 {
                self.add_edge(copy[i + 1], copy[i]);
                self.remove_edge(copy[i + 1], chain[i]);
                self.remove_edge(chain[i + 1], copy[i]);
            }
        }

        // Rehang the chain successors onto the copies.
        for s in &chain_succs {
            self.remove_edge(chain[0], *s);
        }
        for copy in &copies {
            for b in copy {
                for s in self.block(*b).succs.clone() {
                    self.add_edge(*b, s);
                }
            }
        }

        for copy in &copies {
            skip.extend(copy.iter().copied());
        }
        for b in &chain {
            skip.insert(*b);
            self.remove_block(*b);
        }
        true
    }
}

impl fmt::Display for TacGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.ids_by_entry().into_iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
                writeln!(f)?;
            }
            let block = self.block(id);
            writeln!(f, "{block}")?;
            let preds: Vec<String> = block.preds.iter().map(|p| self.block(*p).ident()).collect();
            let succs: Vec<String> = block.succs.iter().map(|s| self.block(*s).ident()).collect();
            writeln!(f, "Predecessors: [{}]", preds.join(", "))?;
            write!(f, "Successors: [{}]", succs.join(", "))?;
            if block.has_unresolved_jump {
                write!(f, "\nHas unresolved jump.")?;
            }
        }
        Ok(())
    }
}
