//! End-to-end decompilation scenarios.

use alloy_primitives::U256;
use detac_analysis::{analyse_graph, BlockId, Settings, TacGraph};
use detac_primitives::{OpCode, VariableStack};

fn analysed(hex: &str, settings: &Settings) -> TacGraph {
    let mut graph = TacGraph::from_hex(hex, settings).unwrap();
    analyse_graph(&mut graph, settings).unwrap();
    graph
}

fn entries_of(graph: &TacGraph, ids: &[BlockId]) -> Vec<u32> {
    let mut entries: Vec<u32> = ids.iter().map(|id| graph.block(*id).entry).collect();
    entries.sort_unstable();
    entries
}

/// One sweep of the dataflow loop, written out with the public surface.
fn sweep_once(graph: &mut TacGraph, settings: &Settings) {
    for id in graph.ids_by_entry() {
        let preds = graph.block(id).preds.clone();
        let entry = VariableStack::join_all(preds.iter().map(|p| &graph.block(*p).exit_stack));
        graph.block_mut(id).entry_stack = entry;
        let (exit, _) = graph.block(id).derive_exit_stack();
        graph.block_mut(id).exit_stack = exit;
        graph.block_mut(id).hook_up_stack_vars();
        graph.block_mut(id).apply_operations(settings).unwrap();
        graph.hook_up_jumps_for(id, settings);
    }
}

#[test]
fn straight_line_push_add() {
    // PUSH1 3; PUSH1 4; ADD
    let graph = analysed("6003600401", &Settings::default());
    let root = graph.root.expect("block at pc 0");
    let block = graph.block(root);

    assert_eq!(block.tac_ops.len(), 3);
    assert_eq!(block.tac_ops[0].opcode, OpCode::Const);
    assert_eq!(block.tac_ops[1].opcode, OpCode::Const);
    let add = &block.tac_ops[2];
    assert_eq!(add.opcode, OpCode::Add);
    assert_eq!(add.lhs_var().unwrap().name(), "V2");
    assert_eq!(add.lhs_var().unwrap().const_value(), Some(U256::from(7u64)));
    assert!(block.succs.is_empty());
}

#[test]
fn constant_jump_connects_to_jumpdest() {
    // PUSH1 4; JUMP; STOP; JUMPDEST; STOP
    let graph = analysed("600456005b00", &Settings::default());
    let root = graph.root.unwrap();
    let block = graph.block(root);

    assert_eq!(block.succs.len(), 1);
    assert_eq!(graph.block(block.succs[0]).entry, 4);
    assert!(!block.has_unresolved_jump);
    assert_eq!(
        graph.block(block.succs[0]).tac_ops[0].opcode,
        OpCode::JumpDest
    );
}

#[test]
fn false_jumpi_is_deleted_under_mutation() {
    // PUSH1 0; PUSH1 6; JUMPI; STOP; JUMPDEST; STOP — the condition is
    // constant zero, so with mutate_jumps the JUMPI disappears and only
    // the fallthrough edge survives.
    let settings = Settings {
        mutate_jumps: true,
        ..Settings::default()
    };
    let graph = analysed("6000600657005b00", &settings);
    let root = graph.root.unwrap();
    let block = graph.block(root);

    assert!(block.tac_ops.iter().all(|op| op.opcode != OpCode::JumpI));
    assert_eq!(block.succs.len(), 1);
    assert_eq!(graph.block(block.succs[0]).entry, 5);
    assert!(!block.has_unresolved_jump);
}

#[test]
fn underflow_produces_meta_variables() {
    // A lone ADD reaches two slots into the caller's stack.
    let graph = analysed("01", &Settings::default());
    let root = graph.root.unwrap();
    let block = graph.block(root);

    assert_eq!(block.delta_stack.empty_pops, 2);
    let add = block.final_op();
    let args: Vec<Option<usize>> = add
        .args
        .iter()
        .map(|a| a.arg().unwrap().value().meta_depth())
        .collect();
    assert_eq!(args, vec![Some(0), Some(1)]);
}

#[test]
fn widening_marks_dependent_jumps_unresolved() {
    // Two predecessors feed {15, 17} into a block that computes its jump
    // target with an ADD. A widening threshold of one promotes the summed
    // set to Top, so the jump cannot resolve.
    let settings = Settings {
        widen_threshold: 1,
        ..Settings::default()
    };
    let graph = analysed("600f600a566011600a565b600001565b005b00", &settings);
    let jump_block = graph
        .ids()
        .find(|id| {
            graph.block(*id).entry == 10
                && graph.block(*id).final_op().opcode == OpCode::Jump
        })
        .expect("jump block survives");
    let block = graph.block(jump_block);
    assert!(block.final_op().args[0].arg().unwrap().value().is_unconstrained());
    assert!(block.has_unresolved_jump);
    assert!(block.succs.is_empty());
}

#[test]
fn without_widening_both_targets_resolve() {
    let settings = Settings {
        widen_variables: false,
        ..Settings::default()
    };
    let graph = analysed("600f600a566011600a565b600001565b005b00", &settings);
    let succs: Vec<u32> = graph
        .ids()
        .filter(|id| graph.block(*id).entry == 10)
        .flat_map(|id| graph.block(id).succs.clone())
        .map(|s| graph.block(s).entry)
        .collect();
    assert!(succs.contains(&15));
    assert!(succs.contains(&17));
}

#[test]
fn ambiguous_jump_chain_is_split() {
    // Two predecessors push distinct destinations for a shared JUMPDEST;
    // JUMP block:
    //   0x0: PUSH1 14; PUSH1 10; JUMP    (P1)
    //   0x5: PUSH1 17; PUSH1 10; JUMP    (P2)
    //   0xa: JUMPDEST; JUMP              (the ambiguous chain)
    //   0xe: JUMPDEST; STOP              (P1's target)
    //   0x11: JUMPDEST; STOP             (P2's target)
    let settings = Settings::default();
    let mut graph = TacGraph::from_hex("600e600a566011600a565b5600005b00005b00", &settings).unwrap();

    sweep_once(&mut graph, &settings);
    sweep_once(&mut graph, &settings);

    // Both predecessors and both targets are attached to the one chain
    // block before splitting.
    let chain: Vec<BlockId> = graph.ids().filter(|id| graph.block(*id).entry == 10).collect();
    assert_eq!(chain.len(), 1);
    assert_eq!(graph.block(chain[0]).preds.len(), 2);
    assert_eq!(graph.block(chain[0]).succs.len(), 2);

    assert!(graph.clone_ambiguous_jump_blocks());

    let copies: Vec<BlockId> = graph.ids().filter(|id| graph.block(*id).entry == 10).collect();
    assert_eq!(copies.len(), 2);

    // Each copy keeps exactly one predecessor, and they differ.
    let pred_entries: Vec<Vec<u32>> = copies
        .iter()
        .map(|id| entries_of(&graph, &graph.block(*id).preds))
        .collect();
    assert!(pred_entries.contains(&vec![0]));
    assert!(pred_entries.contains(&vec![5]));

    // After another propagation round, each copy resolves to exactly the
    // destination its predecessor pushed.
    sweep_once(&mut graph, &settings);
    for id in &copies {
        let block = graph.block(*id);
        assert_eq!(block.preds.len(), 1);
        assert_eq!(block.succs.len(), 1, "copy {} resolves uniquely", block.ident());
        let pred_entry = graph.block(block.preds[0]).entry;
        let succ_entry = graph.block(block.succs[0]).entry;
        match pred_entry {
            0 => assert_eq!(succ_entry, 14),
            5 => assert_eq!(succ_entry, 17),
            other => panic!("unexpected predecessor at {other:#x}"),
        }
        assert!(!block.has_unresolved_jump);
    }

    // The copies' suffixes record their retained predecessors.
    for id in &copies {
        assert!(graph.block(*id).ident_suffix.starts_with("_0x"));
    }
}

#[test]
fn full_analysis_merges_split_chains_back() {
    // The same ambiguous-chain program, through the whole driver: the
    // terminal merge re-joins the copies into one block carrying both
    // discovered targets.
    let graph = analysed("600e600a566011600a565b5600005b00005b00", &Settings::default());
    let chain: Vec<BlockId> = graph.ids().filter(|id| graph.block(*id).entry == 10).collect();
    assert_eq!(chain.len(), 1);
    let succs = entries_of(&graph, &graph.block(chain[0]).succs);
    assert_eq!(succs, vec![14, 17]);
    let preds = entries_of(&graph, &graph.block(chain[0]).preds);
    assert_eq!(preds, vec![0, 5]);
}

#[test]
fn unreachable_code_is_removed_on_request() {
    let settings = Settings {
        remove_unreachable: true,
        ..Settings::default()
    };
    // PUSH1 4; JUMP; STOP (dead); JUMPDEST; STOP
    let graph = analysed("600456005b00", &settings);
    let entries: Vec<u32> = graph.ids().map(|id| graph.block(id).entry).collect();
    assert!(entries.contains(&0));
    assert!(entries.contains(&4));
    assert!(!entries.contains(&3));
}

#[test]
fn invalid_jump_becomes_throw_in_terminal_pass() {
    // PUSH1 3; JUMP — destination 3 is a STOP, not a JUMPDEST.
    let graph = analysed("60035600", &Settings::default());
    let root = graph.root.unwrap();
    let block = graph.block(root);
    assert_eq!(block.final_op().opcode, OpCode::Throw);
    assert!(block.succs.is_empty());
}

#[test]
fn invalid_jumpi_keeps_condition_as_throwi() {
    // PUSH1 1; PUSH1 3; JUMPI; STOP — no JUMPDEST at 3, condition kept.
    let graph = analysed("600160035700", &Settings::default());
    let root = graph.root.unwrap();
    let block = graph.block(root);
    let last = block.final_op();
    assert_eq!(last.opcode, OpCode::ThrowI);
    assert_eq!(last.args.len(), 1);
    // THROWI does not halt: the fallthrough edge survives.
    assert_eq!(block.succs.len(), 1);
}

#[test]
fn dispatcher_shape_resolves_both_arms() {
    // A conditional dispatcher:
    //   PUSH1 1; PUSH1 8; JUMPI; PUSH1 0; STOP; JUMPDEST; STOP
    // The taken arm targets the JUMPDEST at 8; the fallthrough arm is the
    // PUSH/STOP block at 5.
    let graph = analysed("60016008576000005b00", &Settings::default());
    let root = graph.root.unwrap();
    let succs = entries_of(&graph, &graph.block(root).succs);
    assert_eq!(succs, vec![5, 8]);
    assert!(!graph.block(root).has_unresolved_jump);
}
