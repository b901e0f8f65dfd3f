//! # Builddoc Command Implementation
//!
//! Builds the documentation of a branch in a fresh container and copies the
//! rendered output back to `<work-dir>/out/builddoc`.

use anyhow::Result;
use clap::Args;

use stagehand::tasks::TaskKind;

use super::{run_task, Context, TaskArgs};

/// Build the documentation of a branch in a fresh container
#[derive(Args, Debug)]
pub struct BuilddocArgs {
    #[command(flatten)]
    pub task: TaskArgs,
}

pub fn execute(args: BuilddocArgs, ctx: &Context) -> Result<()> {
    run_task(ctx, TaskKind::Builddoc, &args.task, false)
}
