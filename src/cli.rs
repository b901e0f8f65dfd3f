//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::debug;

use crate::commands;
use stagehand::defaults::DEFAULT_CONFIG_FILENAME;
use stagehand::interrupt;

/// stagehand - Build, test and publish a Debian-packaged project in throwaway containers
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "FILE", default_value = DEFAULT_CONFIG_FILENAME, env = "STAGEHAND_CONFIG")]
    config: PathBuf,

    /// Target release series (overrides the configuration)
    #[arg(long, global = true, value_name = "SERIES")]
    series: Option<String>,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the development tests of a branch in a fresh container
    Devtest(commands::devtest::DevtestArgs),

    /// Install the published package of a branch in a fresh container and test it
    Pkgtest(commands::pkgtest::PkgtestArgs),

    /// Build the documentation of a branch in a fresh container
    Builddoc(commands::builddoc::BuilddocArgs),

    /// Build packages locally, optionally as a development version, and publish them
    Build(commands::build::BuildArgs),

    /// Show and reconcile the version literal and the changelog
    Version(commands::version::VersionArgs),

    /// Show the dependency pins recorded by the current run
    Pins(commands::pins::PinsArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    fn init_logging(&self) {
        // RUST_LOG wins over --log-level
        let env = env_logger::Env::default().default_filter_or(&self.log_level);
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp(None)
            .format_target(false)
            .try_init();
    }

    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        self.init_logging();
        interrupt::install()?;
        debug!("using configuration {}", self.config.display());

        let ctx = commands::Context {
            config_path: self.config,
            series: self.series,
            color: self.color,
        };

        match self.command {
            Commands::Devtest(args) => commands::devtest::execute(args, &ctx),
            Commands::Pkgtest(args) => commands::pkgtest::execute(args, &ctx),
            Commands::Builddoc(args) => commands::builddoc::execute(args, &ctx),
            Commands::Build(args) => commands::build::execute(args, &ctx),
            Commands::Version(args) => commands::version::execute(args, &ctx),
            Commands::Pins(args) => commands::pins::execute(args, &ctx),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}
