//! # CLI Command Implementations
//!
//! One file per subcommand of `stagehand`. Each holds an `Args` struct
//! derived with `clap` and an `execute` function that loads the
//! configuration, calls into the `stagehand` library and reports the outcome.
//!
//! Library errors are converted with [`in_stage`], which wraps them in an
//! `anyhow` context naming the stage they belong to, so the final message
//! always says where the run failed.

pub mod build;
pub mod builddoc;
pub mod completions;
pub mod devtest;
pub mod pins;
pub mod pkgtest;
pub mod version;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use log::warn;

use stagehand::config::{self, Config};
use stagehand::defaults::{DEPS_DIRNAME, PIN_RECORD_FILENAME};
use stagehand::environment::{EnvironmentManager, LxcBackend, RetryPolicy};
use stagehand::error::{Error, Stage};
use stagehand::output::{emoji, OutputConfig};
use stagehand::pins::PinStore;
use stagehand::remote::SshShell;
use stagehand::resolver::DependencyResolver;
use stagehand::tasks::{SourceTree, TaskKind, TaskRunner};

/// Global options shared by every command.
#[derive(Debug)]
pub struct Context {
    pub config_path: PathBuf,
    pub series: Option<String>,
    pub color: String,
}

impl Context {
    pub fn output(&self) -> OutputConfig {
        OutputConfig::from_env_and_flag(&self.color)
    }

    pub fn load(&self) -> Result<Config> {
        config::from_file(&self.config_path).map_err(in_stage(Stage::Config))
    }

    /// `--series`, else the configured default.
    pub fn series(&self, config: &Config) -> String {
        self.series.clone().unwrap_or_else(|| config.series.clone())
    }

    /// The project checkout: the directory holding the configuration file.
    pub fn source_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf()
    }
}

/// Map a library error to an `anyhow` error labelled with its stage,
/// falling back to `default` for errors that carry no stage of their own.
pub fn in_stage(default: Stage) -> impl FnOnce(Error) -> anyhow::Error {
    move |err| {
        if err.is_recoverable() {
            warn!("align the version literal with the changelog, or confirm the mismatch from a terminal");
        }
        let stage = err.stage().unwrap_or(default);
        anyhow::Error::new(err).context(format!("{} stage failed", stage))
    }
}

/// Map a library error to an `anyhow` error labelled with `stage`,
/// whatever the error's own classification.
pub fn at_stage(stage: Stage) -> impl FnOnce(Error) -> anyhow::Error {
    move |err| anyhow::Error::new(err).context(format!("{} stage failed", stage))
}

/// Arguments shared by the container tasks.
#[derive(Args, Debug)]
pub struct TaskArgs {
    /// Branch to test; dependencies are looked up on the same branch
    pub branch: String,

    /// Continue the pin record of a previous invocation instead of starting
    /// a new run
    #[arg(long)]
    pub keep_pins: bool,
}

/// Resolve, provision, run and tear down one container task.
pub fn run_task(ctx: &Context, task: TaskKind, args: &TaskArgs, allow_latest_build: bool) -> Result<()> {
    let out = ctx.output();
    let config = ctx.load()?;
    if task.config(&config).is_none() {
        return Err(at_stage(Stage::Config)(Error::Config {
            message: format!("no steps configured for task '{}'", task),
            hint: Some(format!("Add a tasks.{} section to {}", task, ctx.config_path.display())),
        }));
    }
    let series = ctx.series(&config);
    println!(
        "{} {}",
        emoji(&out, "🚀", "[RUN]"),
        out.heading(&format!("{} {} on {}", task, args.branch, series))
    );

    let pin_path = config.work_dir.join(PIN_RECORD_FILENAME);
    if !args.keep_pins {
        PinStore::reset(&pin_path).map_err(in_stage(Stage::Resolve))?;
    }
    let mut pins = PinStore::open(&pin_path).map_err(in_stage(Stage::Resolve))?;
    let source = SourceTree::pack(&ctx.source_dir(), &config.package, &config.work_dir)
        .map_err(in_stage(Stage::Resolve))?;

    let backend = LxcBackend::new(config.container.sudo);
    let shell = SshShell::new(config.container.user.clone());
    let retry = RetryPolicy::new(
        config.container.attempts,
        Duration::from_secs(config.container.interval_secs),
    );
    let environments = EnvironmentManager::new(&backend, &shell, retry).with_progress(out.spinner());
    let resolver = DependencyResolver::new(
        config.repositories.clone(),
        config.work_dir.join(DEPS_DIRNAME),
    );
    let runner = TaskRunner::new(&config, series, resolver, environments)
        .allow_latest_build(allow_latest_build);

    let report = runner
        .run(task, &args.branch, &source, &mut pins)
        .map_err(in_stage(Stage::Remote))?;

    for pin in &report.pins {
        println!(
            "   {} {} {}@{} ({})",
            emoji(&out, "📌", "[PIN]"),
            pin.name,
            pin.repository,
            pin.branch,
            pin.commit
        );
    }
    for artifact in &report.artifacts {
        println!("   {} {}", emoji(&out, "📄", "[OUT]"), artifact.display());
    }
    println!("{} {} passed", emoji(&out, "✅", "[OK]"), task);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_failure() -> Error {
        Error::GitCommand {
            command: "clone".to_string(),
            target: "oq-nrmllib".to_string(),
            stderr: "fatal".to_string(),
        }
    }

    #[test]
    fn test_call_site_label_names_the_stage() {
        let err = in_stage(Stage::Build)(git_failure().in_stage(Stage::Build));
        assert_eq!(err.to_string(), "build stage failed");

        let err = in_stage(Stage::Remote)(Error::Interrupted.in_stage(Stage::Provision));
        assert_eq!(err.to_string(), "provision stage failed");
    }

    #[test]
    fn test_unlabelled_errors_use_variant_then_default() {
        assert_eq!(in_stage(Stage::Build)(git_failure()).to_string(), "resolve stage failed");
        assert_eq!(in_stage(Stage::Remote)(Error::Interrupted).to_string(), "remote stage failed");
    }

    #[test]
    fn test_version_mismatch_keeps_its_stage() {
        let err = in_stage(Stage::Build)(Error::VersionMismatch {
            literal: "3.2.0".to_string(),
            changelog: "3.1.0".to_string(),
        });
        assert_eq!(err.to_string(), "version stage failed");
    }
}
