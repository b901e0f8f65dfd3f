//! # Version Command Implementation
//!
//! Shows the version literal and the changelog header side by side and
//! checks that they agree on the release. A disagreement is put to the
//! operator; declining (or having no terminal) exits with an error.

use anyhow::Result;
use clap::Args;

use stagehand::error::{Error, Stage};
use stagehand::output::emoji;
use stagehand::prompt::TerminalConfirm;
use stagehand::version::{self, Reconciliation};

use super::{in_stage, Context};

/// Show and reconcile the version literal and the changelog
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Only report, never prompt; a mismatch is an error
    #[arg(long)]
    pub check: bool,
}

pub fn execute(args: VersionArgs, ctx: &Context) -> Result<()> {
    let out = ctx.output();
    let config = ctx.load()?;
    let sources = version::read_sources(&config.version_file, &config.changelog, &config.package)
        .map_err(in_stage(Stage::Version))?;

    println!("{} {}", emoji(&out, "🏷️", "[VER]"), out.heading(&config.package));
    println!("   version literal: {}", sources.literal);
    println!(
        "   changelog:       {} ({}, urgency={})",
        sources.changelog.version, sources.changelog.series, sources.changelog.urgency
    );

    let changelog = &sources.changelog.version;
    let accepted = if args.check {
        match version::compare(&sources.literal, changelog) {
            Reconciliation::Aligned => changelog.clone(),
            Reconciliation::Mismatch => {
                return Err(in_stage(Stage::Version)(Error::VersionMismatch {
                    literal: sources.literal.to_string(),
                    changelog: changelog.to_string(),
                }));
            }
        }
    } else {
        version::reconcile(&sources.literal, changelog, &TerminalConfirm).map_err(in_stage(Stage::Version))?
    };

    println!("{} Package version {}", emoji(&out, "✅", "[OK]"), accepted);
    Ok(())
}
