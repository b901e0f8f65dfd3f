//! # Build Command Implementation
//!
//! Builds the Debian packages on the host from the committed tree.
//!
//! ## Flags
//!
//! - `--source-only`: only the source package.
//! - `--unsigned`: leave `.dsc`/`.changes` and the repository `Release`
//!   manifest unsigned.
//! - `--dev`: stamp a `~dev<timestamp>+<commit>` version into the exported
//!   tree first.
//! - `--publish`: move the result into the local repository under the
//!   current commit, replacing an earlier build of that commit.
//! - `--yes`: clear a non-empty build directory without asking. A version
//!   mismatch is still always asked about.

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use stagehand::build::{self, BuildOptions, BuildRequest, DpkgBuilder};
use stagehand::error::Stage;
use stagehand::git;
use stagehand::output::emoji;
use stagehand::prompt::TerminalConfirm;
use stagehand::publish::{DpkgScanner, GpgSigner, Publisher};

use super::{at_stage, in_stage, Context};

/// Build packages locally, optionally as a development version, and publish them
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Build only the source package
    #[arg(short = 'S', long)]
    pub source_only: bool,

    /// Do not sign packages or the repository manifest
    #[arg(long)]
    pub unsigned: bool,

    /// Build a development version stamped with the time and commit
    #[arg(long)]
    pub dev: bool,

    /// Publish the result into the local package repository
    #[arg(long)]
    pub publish: bool,

    /// Clear a non-empty build directory without asking
    #[arg(short, long)]
    pub yes: bool,
}

pub fn execute(args: BuildArgs, ctx: &Context) -> Result<()> {
    let out = ctx.output();
    let config = ctx.load()?;
    let series = ctx.series(&config);
    let source_dir = ctx.source_dir();
    let commit = git::head_commit(&source_dir).map_err(at_stage(Stage::Build))?;
    let branch = git::current_branch(&source_dir).map_err(at_stage(Stage::Build))?;

    println!(
        "{} {}",
        emoji(&out, "🔨", "[BUILD]"),
        out.heading(&format!("{} {}@{} for {}", config.package, branch, commit, series))
    );

    let options = BuildOptions {
        source_only: args.source_only,
        unsigned: args.unsigned,
        dev: args.dev,
        assume_yes: args.yes,
    };
    let request = BuildRequest {
        source_dir: &source_dir,
        commit: &commit,
        series: &series,
        options,
        when: Utc::now(),
    };

    let scanner = DpkgScanner;
    let signer = GpgSigner::new(config.signing_key.clone());
    let publisher = args.publish.then(|| {
        let publisher = Publisher::new(&config.repo_root, series.as_str(), config.line.as_str(), &scanner);
        if args.unsigned {
            publisher
        } else {
            publisher.signed_by(&signer)
        }
    });

    let report = build::build_package(&config, &request, &DpkgBuilder, &TerminalConfirm, publisher.as_ref())
        .map_err(in_stage(Stage::Build))?;

    println!(
        "{} Built {} {}",
        emoji(&out, "✅", "[OK]"),
        config.package,
        report.version
    );
    for file in &report.artifacts.files {
        println!("   {}", file.display());
    }
    if let Some(entry) = &report.published {
        println!("{} Published to {}", emoji(&out, "📦", "[PUB]"), entry.display());
    }
    Ok(())
}
