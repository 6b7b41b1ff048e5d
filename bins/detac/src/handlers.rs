//! Subcommand implementations.

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use detac_analysis::{analyse_graph, Settings, TacGraph};

use crate::command::{DecompileArgs, DisasmArgs};
use crate::utils::load_blocks;

pub fn decompile(args: &DecompileArgs) -> Result<()> {
    let settings = match &args.config {
        Some(path) => Settings::from_toml_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let settings = Settings {
        analytics: settings.analytics || args.analytics,
        ..settings
    };

    let evm_blocks = load_blocks(&args.input, args.bin)?;
    info!(blocks = evm_blocks.len(), "bytecode disassembled");

    let mut graph = TacGraph::new(&evm_blocks, &settings)
        .map_err(|e| anyhow::anyhow!("{}: {e}", "decompilation failed".red()))?;
    let analytics = analyse_graph(&mut graph, &settings)
        .map_err(|e| anyhow::anyhow!("{}: {e}", "analysis failed".red()))?;

    let listing = graph.to_string();
    match &args.out {
        Some(path) => {
            std::fs::write(path, listing)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("{} wrote {}", "Done:".green().bold(), path.display());
        }
        None => println!("{listing}"),
    }

    if settings.analytics {
        eprintln!("{}", serde_json::to_string_pretty(&analytics)?);
    }

    Ok(())
}

pub fn disassemble(args: &DisasmArgs) -> Result<()> {
    let blocks = load_blocks(&args.input, args.bin)?;
    for block in &blocks {
        for op in &block.ops {
            println!("{op}");
        }
    }
    Ok(())
}
