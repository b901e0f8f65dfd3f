//! # stagehand CLI
//!
//! Binary entry point for the `stagehand` command-line tool.
//!
//! It parses the command line with `clap`, sets up logging and signal
//! handling, and runs the selected command. Errors bubble up as `anyhow`
//! errors whose outermost context names the failing stage, and leave the
//! process with exit status 1.
//!
//! The orchestration itself lives in the `stagehand` library crate; the
//! binary is a thin wrapper around it.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
