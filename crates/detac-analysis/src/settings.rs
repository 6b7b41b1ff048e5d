//! Dataflow analysis settings.
//!
//! An explicit, immutable record threaded by reference into the driver and
//! its callees. Integer caps use negative values to mean "no limit".

use std::path::Path;

use serde::Deserialize;

/// Analysis configuration. Defaults favour precision: no iteration or time
/// limit, widening and stack clamping enabled, throws generated only in the
/// terminal pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Maximum number of dataflow iterations; negative means no limit.
    /// Lower is faster, but potentially less precise.
    pub max_iterations: i64,
    /// Wall-clock cap in seconds; negative means no cap. Not a hard stop:
    /// at least one iteration always runs, and the terminal passes still
    /// follow. Bailing out early may leave the fixed point unreached.
    pub bailout_seconds: i64,
    /// Upon completion, remove blocks unreachable from the contract root.
    pub remove_unreachable: bool,
    /// Raise an error when an empty stack is popped, rather than
    /// synthesising a meta-variable.
    pub die_on_empty_pop: bool,
    /// Do not apply changes to exit stacks after a symbolic overflow
    /// occurs in their block.
    pub skip_stack_on_overflow: bool,
    /// Reinitialise all blocks' stacks at the start of the analysis.
    pub reinit_stacks: bool,
    /// After the analysis, propagate entry stack values into block bodies.
    pub hook_up_stack_vars: bool,
    /// After the analysis, connect any newly inferable edges.
    pub hook_up_jumps: bool,
    /// In-loop: JUMPIs with known conditions become JUMPs, or are deleted.
    pub mutate_jumps: bool,
    /// In-loop: jumps with invalid destinations become THROW and THROWI.
    pub generate_throws: bool,
    /// Mutate jumps in the terminal pass.
    pub final_mutate_jumps: bool,
    /// Generate throws in the terminal pass.
    pub final_generate_throws: bool,
    /// Hook up stack vars and jumps after each block rather than after each
    /// whole sweep.
    pub mutate_blockwise: bool,
    /// If stacks keep growing without the CFG gaining edges, freeze the
    /// maximum stack size to save computation.
    pub clamp_large_stacks: bool,
    /// Stacks are never clamped smaller than this.
    pub clamp_stack_minimum: usize,
    /// Promote value sets wider than `widen_threshold` to Top.
    pub widen_variables: bool,
    /// The widening cardinality threshold.
    pub widen_threshold: usize,
    /// Fold arithmetic over multi-valued variables, in all combinations.
    /// Disable to gain speed at the cost of precision.
    pub set_valued_ops: bool,
    /// Collect per-run statistics.
    pub analytics: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            max_iterations: -1,
            bailout_seconds: -1,
            remove_unreachable: false,
            die_on_empty_pop: false,
            skip_stack_on_overflow: true,
            reinit_stacks: true,
            hook_up_stack_vars: true,
            hook_up_jumps: true,
            mutate_jumps: false,
            generate_throws: false,
            final_mutate_jumps: false,
            final_generate_throws: true,
            mutate_blockwise: true,
            clamp_large_stacks: true,
            clamp_stack_minimum: 20,
            widen_variables: true,
            widen_threshold: 10,
            set_valued_ops: true,
            analytics: false,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file; absent keys take their defaults.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Settings, SettingsError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Settings::from_toml(&raw)?)
    }

    pub fn from_toml(raw: &str) -> Result<Settings, toml::de::Error> {
        toml::from_str(raw)
    }

    /// The configuration for the terminal analysis pass, with the in-loop
    /// jump mutation flags replaced by their final-pass counterparts.
    pub fn final_pass(&self) -> Settings {
        Settings {
            mutate_jumps: self.final_mutate_jumps,
            generate_throws: self.final_generate_throws,
            ..self.clone()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed settings file: {0}")]
    Parse(#[from] toml::de::Error),
}
