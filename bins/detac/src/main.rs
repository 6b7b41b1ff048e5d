//! detac cli
mod command;
mod handlers;
mod utils;

use anyhow::Result;
use clap::Parser;
use command::{Cli, Commands};
use handlers::{decompile, disassemble};
use utils::init_logger;

fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decompile(args) => decompile(&args)?,
        Commands::Disasm(args) => disassemble(&args)?,
    }

    Ok(())
}
