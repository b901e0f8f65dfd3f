//! # stagehand
//!
//! Build, test and release orchestration for a Debian-packaged project. The
//! library backs the `stagehand` command-line tool.
//!
//! ## Quick Example
//!
//! ```
//! use stagehand::config;
//! use stagehand::version::VersionTuple;
//!
//! let config = config::parse(r#"
//! package: python-oq-hazardlib
//! version_file: openquake/hazardlib/__init__.py
//! series: trusty
//! repositories: { canonical: "git://github.com/gem" }
//! container: { template: "ubuntu-lxc-{series}-eph" }
//! "#).unwrap();
//! assert_eq!(config.container.template_for("xenial"), "ubuntu-lxc-xenial-eph");
//!
//! let version: VersionTuple = "3.2.0-1~dev1425290400+a1b2c3d".parse().unwrap();
//! assert_eq!(version.core().to_string(), "3.2.0");
//! ```
//!
//! ## Core Concepts
//!
//! - **Configuration (`config`, `defaults`)**: the `.stagehand.yaml` schema.
//! - **Dependency resolution (`resolver`, `pins`, `git`)**: pins each
//!   dependency to a (repository, branch, commit) triple once per run and
//!   refuses to let it drift.
//! - **Ephemeral environments (`environment`, `remote`)**: throwaway LXC
//!   containers driven over SSH, always torn down.
//! - **Versions (`version`)**: the version literal and changelog grammar,
//!   reconciliation and development stamping.
//! - **Packaging (`build`, `publish`)**: local `dpkg-buildpackage` runs and
//!   the commit-addressed APT repository.
//! - **Tasks (`tasks`)**: `devtest`, `pkgtest` and `builddoc` put together
//!   from the pieces above.
//!
//! Failures are reported through [`error::Error`]; each variant maps to the
//! [`error::Stage`] it belongs to.

pub mod build;
pub mod config;
pub mod defaults;
pub mod environment;
pub mod error;
pub mod fsutil;
pub mod git;
pub mod interrupt;
pub mod output;
pub mod pins;
pub mod prompt;
pub mod publish;
pub mod remote;
pub mod resolver;
pub mod tasks;
pub mod version;

#[cfg(test)]
mod version_proptest;
