//! # Completions Command Implementation
//!
//! Prints a shell completion script generated by `clap_complete` covering
//! every `stagehand` subcommand and flag.
//!
//! ```bash
//! stagehand completions bash > ~/.local/share/bash-completion/completions/stagehand
//! stagehand completions zsh > ~/.zfunc/_stagehand
//! stagehand completions fish > ~/.config/fish/completions/stagehand.fish
//! ```

use std::io;

use anyhow::Result;
use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};

use crate::cli::Cli;

/// Generate shell completion scripts
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// The shell to generate completions for (bash, zsh, fish, powershell, elvish)
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Write the completion script for `args.shell` to stdout.
pub fn execute(args: CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(args.shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}
