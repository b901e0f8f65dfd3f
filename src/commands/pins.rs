//! # Pins Command Implementation
//!
//! Prints the dependency pin record of the current run, one dependency per
//! line, or as JSON lines with `--json`.

use anyhow::Result;
use clap::Args;

use stagehand::defaults::PIN_RECORD_FILENAME;
use stagehand::error::Stage;
use stagehand::output::emoji;
use stagehand::pins::PinStore;

use super::{in_stage, Context};

/// Show the dependency pins recorded by the current run
#[derive(Args, Debug)]
pub struct PinsArgs {
    /// Print the raw JSON records
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: PinsArgs, ctx: &Context) -> Result<()> {
    let out = ctx.output();
    let config = ctx.load()?;
    let path = config.work_dir.join(PIN_RECORD_FILENAME);
    let store = PinStore::open(&path).map_err(in_stage(Stage::Resolve))?;

    if args.json {
        for pin in store.iter() {
            println!("{}", serde_json::to_string(pin)?);
        }
        return Ok(());
    }

    if store.is_empty() {
        println!(
            "{} No dependencies pinned in {}",
            emoji(&out, "ℹ️", "[INFO]"),
            path.display()
        );
        return Ok(());
    }

    println!(
        "{} {} pinned dependencies ({})",
        emoji(&out, "📌", "[PIN]"),
        store.len(),
        path.display()
    );
    for pin in store.iter() {
        println!(
            "   {:<28} {:<15} {} @ {} ({})",
            pin.name, pin.kind, pin.repository, pin.branch, pin.commit
        );
    }
    Ok(())
}
