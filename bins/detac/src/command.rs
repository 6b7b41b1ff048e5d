//! Command-line argument structures.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[clap(name = "detac")]
#[clap(
    version,
    about = "Static EVM bytecode decompiler recovering three-address code and a CFG"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decompile bytecode into a three-address-code control-flow graph
    Decompile(DecompileArgs),

    /// Print the linear EVM disassembly of the bytecode
    Disasm(DisasmArgs),
}

#[derive(Args)]
pub struct DecompileArgs {
    /// Bytecode file: hexadecimal, or raw bytes with --bin
    pub input: PathBuf,

    /// Treat the input file as raw binary rather than hex
    #[clap(long)]
    pub bin: bool,

    /// Analysis settings file (TOML); absent keys take their defaults
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Write the decompiled listing here instead of stdout
    #[clap(short, long)]
    pub out: Option<PathBuf>,

    /// Print run statistics as JSON on stderr
    #[clap(long)]
    pub analytics: bool,
}

#[derive(Args)]
pub struct DisasmArgs {
    /// Bytecode file: hexadecimal, or raw bytes with --bin
    pub input: PathBuf,

    /// Treat the input file as raw binary rather than hex
    #[clap(long)]
    pub bin: bool,
}
