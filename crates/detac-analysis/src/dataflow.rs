//! The outer fixed-point driver.
//!
//! Stack states propagate forward through the graph until neither the
//! stacks nor the edge set change, interleaved with chain splitting for
//! ambiguous jumps. Termination is polite: the iteration cap, the
//! wall-clock bailout and stack clamping all degrade precision instead of
//! failing, and the terminal passes always run.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use detac_primitives::VariableStack;

use crate::error::AnalysisError;
use crate::graph::TacGraph;
use crate::settings::Settings;

/// Consecutive sweeps that may grow stacks without discovering edges
/// before stack heights are frozen (when `clamp_large_stacks` is set).
const CLAMP_TRIGGER_SWEEPS: usize = 2;

/// Per-run statistics, collected when `settings.analytics` is set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Analytics {
    /// Dataflow sweeps performed, including the terminal pass.
    pub iterations: i64,
    /// True when the wall-clock bailout cut the analysis short.
    pub bailed_out: bool,
    pub blocks: usize,
    pub tac_ops: usize,
    pub unresolved_jumps: usize,
    pub symbolic_overflows: usize,
}

/// Sweep budget shared across the analysis phases.
struct Budget {
    started: Instant,
    sweeps: i64,
}

impl Budget {
    fn new() -> Budget {
        Budget {
            started: Instant::now(),
            sweeps: 0,
        }
    }

    fn timed_out(&self, settings: &Settings) -> bool {
        settings.bailout_seconds >= 0
            && self.started.elapsed().as_secs() >= settings.bailout_seconds as u64
    }

    fn exhausted(&self, settings: &Settings) -> bool {
        let capped =
            settings.max_iterations >= 0 && self.sweeps >= settings.max_iterations;
        capped || self.timed_out(settings)
    }
}

#[derive(Default)]
struct SweepOutcome {
    stacks_changed: bool,
    edges_changed: bool,
}

/// Run the dataflow analysis over the graph to a fixed point, then apply
/// the terminal passes. Returns the run's statistics.
pub fn analyse_graph(
    graph: &mut TacGraph,
    settings: &Settings,
) -> Result<Analytics, AnalysisError> {
    let mut budget = Budget::new();

    if settings.reinit_stacks {
        for id in graph.ids().collect::<Vec<_>>() {
            let block = graph.block_mut(id);
            block.entry_stack = VariableStack::new();
            block.exit_stack = VariableStack::new();
            block.symbolic_overflow = false;
        }
    }

    let mut clamp: Option<usize> = None;
    loop {
        let modified = stack_analysis(graph, settings, &mut budget, &mut clamp)?;
        if !modified {
            break;
        }
        if budget.exhausted(settings) {
            info!(sweeps = budget.sweeps, "analysis budget exhausted");
            break;
        }
        graph.clone_ambiguous_jump_blocks();
    }

    // The terminal pass runs whatever the budget says, with the in-loop
    // jump mutation flags replaced by their final-pass values.
    let final_settings = settings.final_pass();
    stack_analysis(graph, &final_settings, &mut budget, &mut clamp)?;

    graph.merge_duplicate_blocks(true, true, &final_settings)?;

    if settings.remove_unreachable {
        graph.remove_unreachable_code(&[0]);
    }
    if settings.hook_up_stack_vars {
        graph.hook_up_stack_vars();
        graph.apply_operations(&final_settings)?;
    }
    if settings.hook_up_jumps {
        graph.hook_up_jumps(&final_settings);
    }

    let mut analytics = Analytics {
        iterations: budget.sweeps,
        bailed_out: budget.timed_out(settings),
        ..Analytics::default()
    };
    if settings.analytics {
        for id in graph.ids() {
            let block = graph.block(id);
            analytics.blocks += 1;
            analytics.tac_ops += block.tac_ops.len();
            analytics.unresolved_jumps += block.has_unresolved_jump as usize;
            analytics.symbolic_overflows += block.symbolic_overflow as usize;
        }
    }
    info!(
        sweeps = budget.sweeps,
        bailed_out = analytics.bailed_out,
        "dataflow analysis complete"
    );
    Ok(analytics)
}

/// Sweep the graph until stacks and edges stabilise or the budget runs
/// out. At least one sweep always happens. Returns true iff any edges
/// changed.
fn stack_analysis(
    graph: &mut TacGraph,
    settings: &Settings,
    budget: &mut Budget,
    clamp: &mut Option<usize>,
) -> Result<bool, AnalysisError> {
    let mut graph_modified = false;
    let mut stagnant_sweeps = 0usize;

    loop {
        budget.sweeps += 1;
        let outcome = sweep(graph, settings, *clamp)?;
        graph_modified |= outcome.edges_changed;
        debug!(
            sweep = budget.sweeps,
            stacks = outcome.stacks_changed,
            edges = outcome.edges_changed,
            "dataflow sweep"
        );

        if settings.clamp_large_stacks {
            if outcome.stacks_changed && !outcome.edges_changed {
                stagnant_sweeps += 1;
            } else {
                stagnant_sweeps = 0;
            }
            if clamp.is_none() && stagnant_sweeps >= CLAMP_TRIGGER_SWEEPS {
                let deepest = graph
                    .ids()
                    .map(|id| graph.block(id).entry_stack.len())
                    .max()
                    .unwrap_or(0);
                let limit = deepest.max(settings.clamp_stack_minimum);
                debug!(limit, "freezing stack growth");
                *clamp = Some(limit);
            }
        }

        if !(outcome.stacks_changed || outcome.edges_changed) {
            break;
        }
        if budget.exhausted(settings) {
            break;
        }
    }
    Ok(graph_modified)
}

/// One pass over every block: propagate entry stacks from predecessors,
/// derive exit stacks through the delta summaries, and run the local
/// hookups blockwise or at the end per `mutate_blockwise`.
fn sweep(
    graph: &mut TacGraph,
    settings: &Settings,
    clamp: Option<usize>,
) -> Result<SweepOutcome, AnalysisError> {
    let mut outcome = SweepOutcome::default();

    for id in graph.ids_by_entry() {
        // The entry stack is the join of the predecessors' exit stacks.
        let preds = graph.block(id).preds.clone();
        let mut entry = VariableStack::join_all(preds.iter().map(|p| &graph.block(*p).exit_stack));
        if let Some(limit) = clamp {
            entry.truncate_to(limit);
        }
        if entry != graph.block(id).entry_stack {
            outcome.stacks_changed = true;
        }
        graph.block_mut(id).entry_stack = entry;

        let block = graph.block(id);
        if settings.die_on_empty_pop && block.entry_stack.len() < block.delta_stack.empty_pops {
            return Err(AnalysisError::EmptyPop { block: block.entry });
        }

        if !(block.symbolic_overflow && settings.skip_stack_on_overflow) {
            let (exit, overflowed) = block.derive_exit_stack();
            let block = graph.block_mut(id);
            if overflowed {
                block.symbolic_overflow = true;
            }
            if !(overflowed && settings.skip_stack_on_overflow) {
                if exit != block.exit_stack {
                    outcome.stacks_changed = true;
                }
                block.exit_stack = exit;
            }
        }

        if settings.mutate_blockwise {
            graph.block_mut(id).hook_up_stack_vars();
            graph.block_mut(id).apply_operations(settings)?;
            outcome.edges_changed |= graph.hook_up_jumps_for(id, settings);
        }
    }

    if !settings.mutate_blockwise {
        graph.hook_up_stack_vars();
        graph.apply_operations(settings)?;
        outcome.edges_changed |= graph.hook_up_jumps(settings);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use detac_primitives::OpCode;

    fn analysed(hex: &str, settings: &Settings) -> TacGraph {
        let mut graph = TacGraph::from_hex(hex, settings).unwrap();
        analyse_graph(&mut graph, settings).unwrap();
        graph
    }

    #[test]
    fn straight_line_constant_folding() {
        // PUSH1 3; PUSH1 4; ADD
        let graph = analysed("6003600401", &Settings::default());
        let root = graph.root.unwrap();
        let add = graph.block(root).final_op();
        assert_eq!(add.opcode, OpCode::Add);
        assert_eq!(
            add.lhs_var().unwrap().const_value(),
            Some(U256::from(7u64))
        );
    }

    #[test]
    fn cross_block_stack_propagation() {
        // PUSH1 5; PUSH1 6; PUSH1 8; JUMP; STOP; JUMPDEST; ADD — the add
        // block receives both constants through its entry stack.
        let graph = analysed("60056006600856005b01", &Settings::default());
        let add_block = graph
            .ids()
            .find(|id| graph.block(*id).final_op().opcode == OpCode::Add)
            .unwrap();
        let block = graph.block(add_block);
        assert_eq!(
            block.final_op().lhs_var().unwrap().const_value(),
            Some(U256::from(11u64))
        );
        assert_eq!(block.entry_stack.len(), 2);
    }

    #[test]
    fn iteration_cap_is_respected() {
        let settings = Settings {
            max_iterations: 1,
            ..Settings::default()
        };
        let mut graph = TacGraph::from_hex("6003600401", &settings).unwrap();
        let analytics = analyse_graph(&mut graph, &settings).unwrap();
        // One capped sweep for the loop, plus the guaranteed terminal
        // sweep.
        assert!(analytics.iterations >= 1);
        assert!(!analytics.bailed_out);
    }

    #[test]
    fn fixed_point_is_idempotent() {
        let settings = Settings::default();
        let mut graph = TacGraph::from_hex("600456005b6002600301", &settings).unwrap();
        analyse_graph(&mut graph, &settings).unwrap();

        // Another full analysis changes neither edges nor stacks.
        let edges_before: Vec<(u32, Vec<u32>)> = graph
            .ids_by_entry()
            .into_iter()
            .map(|id| {
                let block = graph.block(id);
                let mut succs: Vec<u32> =
                    block.succs.iter().map(|s| graph.block(*s).entry).collect();
                succs.sort_unstable();
                (block.entry, succs)
            })
            .collect();
        analyse_graph(&mut graph, &settings).unwrap();
        let edges_after: Vec<(u32, Vec<u32>)> = graph
            .ids_by_entry()
            .into_iter()
            .map(|id| {
                let block = graph.block(id);
                let mut succs: Vec<u32> =
                    block.succs.iter().map(|s| graph.block(*s).entry).collect();
                succs.sort_unstable();
                (block.entry, succs)
            })
            .collect();
        assert_eq!(edges_before, edges_after);
    }

    #[test]
    fn analytics_populated_when_enabled() {
        let settings = Settings {
            analytics: true,
            ..Settings::default()
        };
        let mut graph = TacGraph::from_hex("600456005b00", &settings).unwrap();
        let analytics = analyse_graph(&mut graph, &settings).unwrap();
        assert!(analytics.blocks >= 3);
        assert!(analytics.tac_ops >= 4);
        assert!(analytics.iterations > 0);
    }

    #[test]
    fn die_on_empty_pop_raises() {
        let settings = Settings {
            die_on_empty_pop: true,
            ..Settings::default()
        };
        // A bare ADD pops the empty entry stack of the root block.
        let mut graph = TacGraph::from_hex("01", &settings).unwrap();
        let err = analyse_graph(&mut graph, &settings).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyPop { block: 0 }));
    }
}
