//! # Pkgtest Command Implementation
//!
//! Installs the published build of the project for the checked-out commit,
//! together with its Debian-package dependencies, in a fresh container and
//! runs the `tasks.pkgtest` sequence against it.
//!
//! By default the build for the exact commit must exist in the local
//! repository. `--allow-latest-build` accepts the newest published build
//! instead and logs which one was chosen.

use anyhow::Result;
use clap::Args;

use stagehand::tasks::TaskKind;

use super::{run_task, Context, TaskArgs};

/// Install the published package of a branch in a fresh container and test it
#[derive(Args, Debug)]
pub struct PkgtestArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Fall back to the newest published build when the exact commit was
    /// never built
    #[arg(long)]
    pub allow_latest_build: bool,
}

pub fn execute(args: PkgtestArgs, ctx: &Context) -> Result<()> {
    run_task(ctx, TaskKind::Pkgtest, &args.task, args.allow_latest_build)
}
