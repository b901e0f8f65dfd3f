//! # Local Package Builds
//!
//! Builds the Debian packages on the host from the committed tree:
//!
//! 1.  Reconcile the version literal with the changelog.
//! 2.  Export `HEAD` into `<build-dir>/<package>`, so uncommitted changes
//!     never reach a package and development stamping never touches the
//!     working tree.
//! 3.  Optionally stamp a development version into the exported tree.
//! 4.  Run `dpkg-buildpackage`, collect what it produced next to the tree,
//!     and optionally publish it under the source commit.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::config::{Config, Maintainer};
use crate::error::{Error, Result, Stage};
use crate::git;
use crate::prompt::Confirm;
use crate::publish::{ArtifactSet, Publisher};
use crate::version::{self, DevBuild, VersionTuple};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Only the source package (`dpkg-buildpackage -S`).
    pub source_only: bool,
    /// Skip signing the `.dsc` and `.changes` files.
    pub unsigned: bool,
    /// Stamp a `~dev<timestamp>+<commit>` version first.
    pub dev: bool,
    /// Clear a non-empty build directory without asking.
    pub assume_yes: bool,
}

impl BuildOptions {
    pub fn dpkg_args(&self) -> Vec<&'static str> {
        let mut args = vec!["-rfakeroot"];
        if self.source_only {
            args.push("-S");
        } else {
            args.push("-b");
        }
        if self.unsigned {
            args.extend(["-us", "-uc"]);
        }
        args
    }
}

/// Source export and package build tools - allows mocking in tests
pub trait PackageBuilder {
    /// Copy the committed tree of `source_dir` into `dest`.
    fn export(&self, source_dir: &Path, dest: &Path) -> Result<()>;

    /// Build packages from `tree`; outputs land in its parent directory.
    fn build(&self, tree: &Path, options: &BuildOptions) -> Result<()>;
}

/// `git` export plus `dpkg-buildpackage`.
pub struct DpkgBuilder;

impl PackageBuilder for DpkgBuilder {
    fn export(&self, source_dir: &Path, dest: &Path) -> Result<()> {
        git::export_head(source_dir, dest)
    }

    fn build(&self, tree: &Path, options: &BuildOptions) -> Result<()> {
        let args = options.dpkg_args();
        info!("dpkg-buildpackage {}", args.join(" "));
        let status = Command::new("dpkg-buildpackage")
            .args(&args)
            .current_dir(tree)
            .status()
            .map_err(|e| Error::Build {
                tool: "dpkg-buildpackage".to_string(),
                message: e.to_string(),
            })?;
        if !status.success() {
            return Err(Error::Build {
                tool: "dpkg-buildpackage".to_string(),
                message: match status.code() {
                    Some(code) => format!("exited with status {}", code),
                    None => "killed by signal".to_string(),
                },
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub version: VersionTuple,
    pub commit: String,
    pub artifacts: ArtifactSet,
    /// Repository entry, when published
    pub published: Option<PathBuf>,
}

fn relative_to<'p>(path: &'p Path, base: &Path) -> Result<&'p Path> {
    path.strip_prefix(base).map_err(|_| Error::Config {
        message: format!(
            "{} is outside the source directory {}",
            path.display(),
            base.display()
        ),
        hint: None,
    })
}

fn prepare_build_dir(dir: &Path, options: &BuildOptions, confirm: &dyn Confirm) -> Result<()> {
    let occupied = dir.is_dir() && fs::read_dir(dir)?.next().is_some();
    if occupied {
        let prompt = format!("Remove the contents of {}?", dir.display());
        if !options.assume_yes && !confirm.confirm(&prompt)? {
            return Err(Error::Build {
                tool: "stagehand".to_string(),
                message: format!("build directory {} is not empty", dir.display()),
            });
        }
        debug!("clearing {}", dir.display());
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Everything a local build needs besides the configuration.
pub struct BuildRequest<'a> {
    pub source_dir: &'a Path,
    pub commit: &'a str,
    pub series: &'a str,
    pub options: BuildOptions,
    pub when: DateTime<Utc>,
}

fn stamp_dev_version(config: &Config, request: &BuildRequest<'_>, tree: &Path) -> Result<VersionTuple> {
    let fallback;
    let maintainer = match &config.maintainer {
        Some(m) => m,
        None => {
            fallback = Maintainer {
                name: "stagehand".to_string(),
                email: "stagehand@localhost".to_string(),
            };
            &fallback
        }
    };
    version::synthesize_dev_version(
        &tree.join(relative_to(&config.version_file, request.source_dir)?),
        &tree.join(relative_to(&config.changelog, request.source_dir)?),
        &DevBuild {
            package: &config.package,
            series: request.series,
            maintainer,
            commit: request.commit,
            when: request.when,
        },
    )
}

fn run_build(
    config: &Config,
    request: &BuildRequest<'_>,
    builder: &dyn PackageBuilder,
    tree: &Path,
    version: &VersionTuple,
) -> Result<ArtifactSet> {
    builder.build(tree, &request.options)?;
    let artifacts = ArtifactSet::collect(&config.build_dir, &config.package, &version.to_string())?;
    if artifacts.is_empty() {
        return Err(Error::Build {
            tool: "dpkg-buildpackage".to_string(),
            message: format!("no packages found in {}", config.build_dir.display()),
        });
    }
    info!("built {} file(s)", artifacts.files.len());
    Ok(artifacts)
}

/// Build packages for `config`, publishing them when `publisher` is given.
///
/// Errors carry the stage they happened in (version, build or publish).
pub fn build_package(
    config: &Config,
    request: &BuildRequest<'_>,
    builder: &dyn PackageBuilder,
    confirm: &dyn Confirm,
    publisher: Option<&Publisher<'_>>,
) -> Result<BuildReport> {
    let sources = version::read_sources(&config.version_file, &config.changelog, &config.package)
        .map_err(|e| e.in_stage(Stage::Version))?;
    let mut version = version::reconcile(&sources.literal, &sources.changelog.version, confirm)
        .map_err(|e| e.in_stage(Stage::Version))?;
    info!("building {} {} ({})", config.package, version, request.commit);

    let tree = config.build_dir.join(&config.package);
    prepare_build_dir(&config.build_dir, &request.options, confirm)
        .and_then(|()| builder.export(request.source_dir, &tree))
        .map_err(|e| e.in_stage(Stage::Build))?;

    if request.options.dev {
        version = stamp_dev_version(config, request, &tree)
            .map_err(|e| e.in_stage(Stage::Version))?;
    }

    let artifacts = run_build(config, request, builder, &tree, &version)
        .map_err(|e| e.in_stage(Stage::Build))?;

    let published = match publisher {
        Some(publisher) => Some(
            publisher
                .publish(&artifacts, request.commit, request.when)
                .map_err(|e| e.in_stage(Stage::Publish))?,
        ),
        None => None,
    };

    Ok(BuildReport {
        version,
        commit: request.commit.to_string(),
        artifacts,
        published,
    })
}
