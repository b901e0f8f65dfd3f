//! # Devtest Command Implementation
//!
//! Runs the `tasks.devtest` sequence for a branch: the project's committed
//! sources and its source dependencies are copied into a fresh container,
//! the steps run in order, and the declared artifacts (test reports, for
//! example) are copied back to `<work-dir>/out/devtest`.

use anyhow::Result;
use clap::Args;

use stagehand::tasks::TaskKind;

use super::{run_task, Context, TaskArgs};

/// Run the development tests of a branch in a fresh container
#[derive(Args, Debug)]
pub struct DevtestArgs {
    #[command(flatten)]
    pub task: TaskArgs,
}

pub fn execute(args: DevtestArgs, ctx: &Context) -> Result<()> {
    run_task(ctx, TaskKind::Devtest, &args.task, false)
}
