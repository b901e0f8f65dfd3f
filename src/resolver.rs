//! # Dependency Resolution
//!
//! This module turns the declarative dependency list into pinned
//! (repository, branch, commit) triples and local checkouts.
//!
//! ## Lookup order
//!
//! For a dependency `name` and a requested branch `B`:
//!
//! 1.  `<current>/<name>.git` on `B`, when a current base is configured.
//! 2.  `<canonical>/<name>.git` on `B`.
//! 3.  `<canonical>/<name>.git` on the canonical default branch.
//!
//! The first hit is cloned into `<deps_dir>/<name>` (or an existing checkout
//! of the same repository is fast-forwarded), its head commit is read, and the
//! result is recorded in the run's [`PinStore`]. A second resolution in the
//! same run must produce the same pin or the run aborts; a changed location
//! aborts before the existing checkout is touched.
//!
//! ## Design
//!
//! Git access goes through the [`GitOperations`] trait so the lookup and
//! pinning logic can be exercised without a network. [`DefaultGitOperations`]
//! delegates to [`crate::git`].

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::{Dependency, Repositories};
use crate::error::{Error, Result};
use crate::git;
use crate::pins::{Pin, PinStore};

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Whether `branch` exists on the remote at `url`.
    fn branch_exists(&self, url: &str, branch: &str) -> Result<bool>;

    /// Fresh clone of `url` at `branch` into `target_dir`.
    fn clone_branch(&self, url: &str, branch: &str, target_dir: &Path) -> Result<()>;

    /// Move an existing checkout to the remote tip of `branch`.
    fn update_checkout(&self, dir: &Path, branch: &str) -> Result<()>;

    /// Origin URL of an existing checkout.
    fn origin_url(&self, dir: &Path) -> Result<String>;

    /// Abbreviated head commit of a checkout.
    fn head_commit(&self, dir: &Path) -> Result<String>;
}

/// The default implementation of `GitOperations`, which uses the system's
/// `git` command.
pub struct DefaultGitOperations;

impl GitOperations for DefaultGitOperations {
    fn branch_exists(&self, url: &str, branch: &str) -> Result<bool> {
        git::remote_branch_exists(url, branch)
    }

    fn clone_branch(&self, url: &str, branch: &str, target_dir: &Path) -> Result<()> {
        git::clone_branch(url, branch, target_dir)
    }

    fn update_checkout(&self, dir: &Path, branch: &str) -> Result<()> {
        git::update_checkout(dir, branch)
    }

    fn origin_url(&self, dir: &Path) -> Result<String> {
        git::origin_url(dir)
    }

    fn head_commit(&self, dir: &Path) -> Result<String> {
        git::head_commit(dir)
    }
}

/// A pinned dependency and where it is checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub pin: Pin,
    pub checkout: PathBuf,
}

/// Resolves dependencies against the configured repository bases.
pub struct DependencyResolver {
    git_ops: Box<dyn GitOperations>,
    repositories: Repositories,
    deps_dir: PathBuf,
}

impl DependencyResolver {
    /// Creates a resolver using the system `git`, checking dependencies out
    /// under `deps_dir`.
    pub fn new(repositories: Repositories, deps_dir: PathBuf) -> Self {
        Self::with_operations(Box::new(DefaultGitOperations), repositories, deps_dir)
    }

    /// Creates a resolver with a custom `GitOperations` implementation.
    pub fn with_operations(
        git_ops: Box<dyn GitOperations>,
        repositories: Repositories,
        deps_dir: PathBuf,
    ) -> Self {
        Self {
            git_ops,
            repositories,
            deps_dir,
        }
    }

    /// Find the repository URL and branch to use for `name` when `branch`
    /// is requested.
    pub fn locate(&self, name: &str, branch: &str) -> Result<(String, String)> {
        if let Some(current) = &self.repositories.current {
            let url = git::repo_url(current, name);
            match self.git_ops.branch_exists(&url, branch) {
                Ok(true) => return Ok((url, branch.to_string())),
                Ok(false) => debug!("{}: no branch {} in {}", name, branch, url),
                // A developer base often lacks forks of some dependencies.
                Err(e) => debug!("{}: {} unavailable: {}", name, url, e),
            }
        }

        let canonical = git::repo_url(&self.repositories.canonical, name);
        if self.git_ops.branch_exists(&canonical, branch)? {
            return Ok((canonical, branch.to_string()));
        }

        let fallback = &self.repositories.default_branch;
        if fallback != branch {
            warn!(
                "{}: branch {} not found, falling back to {}@{}",
                name, branch, canonical, fallback
            );
        }
        Ok((canonical, fallback.clone()))
    }

    /// Resolve one dependency and record its pin.
    ///
    /// Returns `None` for subpackages, which are installed by name.
    pub fn resolve(
        &self,
        dep: &Dependency,
        branch: &str,
        pins: &mut PinStore,
    ) -> Result<Option<Resolution>> {
        if !dep.kind.is_pinned() {
            debug!("{}: subpackage, not resolved through git", dep.name);
            return Ok(None);
        }

        let (url, resolved_branch) = self.locate(&dep.name, branch)?;
        // A relocated dependency must not disturb the pinned checkout.
        if let Some(pinned) = pins.get(&dep.name) {
            let located = [
                ("repository", &pinned.repository, &url),
                ("branch", &pinned.branch, &resolved_branch),
            ];
            if let Some((field, was, now)) = located.into_iter().find(|(_, was, now)| was != now) {
                return Err(Error::ResolutionConflict {
                    dependency: dep.name.clone(),
                    field: field.to_string(),
                    pinned: was.clone(),
                    resolved: now.clone(),
                });
            }
        }
        let checkout = self.deps_dir.join(&dep.name);
        self.sync_checkout(&url, &resolved_branch, &checkout)?;
        let commit = self.git_ops.head_commit(&checkout)?;

        let pin = pins
            .record(Pin {
                name: dep.name.clone(),
                kind: dep.kind,
                repository: url,
                branch: resolved_branch,
                commit,
            })?
            .clone();

        info!(
            "{}: {}@{} ({})",
            pin.name, pin.repository, pin.branch, pin.commit
        );
        Ok(Some(Resolution { pin, checkout }))
    }

    /// Resolve every pinned dependency in declaration order.
    pub fn resolve_all(
        &self,
        deps: &[Dependency],
        branch: &str,
        pins: &mut PinStore,
    ) -> Result<Vec<Resolution>> {
        let mut resolved = Vec::new();
        for dep in deps {
            if let Some(r) = self.resolve(dep, branch, pins)? {
                resolved.push(r);
            }
        }
        Ok(resolved)
    }

    fn sync_checkout(&self, url: &str, branch: &str, checkout: &Path) -> Result<()> {
        if checkout.is_dir() {
            match self.git_ops.origin_url(checkout) {
                Ok(origin) if origin == url => {
                    debug!("reusing checkout {}", checkout.display());
                    return self.git_ops.update_checkout(checkout, branch);
                }
                Ok(origin) => debug!(
                    "checkout {} tracks {}, recloning from {}",
                    checkout.display(),
                    origin,
                    url
                ),
                Err(e) => debug!("checkout {} unusable: {}", checkout.display(), e),
            }
        }
        self.git_ops.clone_branch(url, branch, checkout)
    }
}
