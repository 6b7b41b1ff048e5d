//! detac cli utils

use std::path::Path;

use anyhow::{Context, Result};
use detac_primitives::EvmBlock;

/// Initialize the logger with a nice formatted output
pub fn init_logger() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt::fmt().with_env_filter(filter).with_target(false).init();
}

/// Read and disassemble a bytecode file, hex by default or raw with `bin`.
pub fn load_blocks(input: &Path, bin: bool) -> Result<Vec<EvmBlock>> {
    let blocks = if bin {
        let bytes = std::fs::read(input)
            .with_context(|| format!("reading {}", input.display()))?;
        detac_primitives::disasm::parse_bytecode(&bytes)?
    } else {
        let text = std::fs::read_to_string(input)
            .with_context(|| format!("reading {}", input.display()))?;
        detac_primitives::disasm::parse_hex(&text)?
    };
    Ok(blocks)
}
