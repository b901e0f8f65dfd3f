//! # Configuration Schema and Parsing
//!
//! This module defines the data structures that represent the `.stagehand.yaml`
//! configuration file and the logic for loading and validating it.
//!
//! ## Key Components
//!
//! - **`Config`**: The whole file: which package is being built, where its
//!   version literal and changelog live, which repositories dependencies are
//!   looked up in, which container template each task runs in, and the
//!   command sequences for each task.
//!
//! - **`Dependency`** / **`DependencyKind`**: The declarative dependency list.
//!   Source dependencies are pinned through Git, Debian-package dependencies
//!   are pinned through Git and installed from the local package repository,
//!   and subpackages are installed by name only.
//!
//! - **`TaskConfig`**: Ordered remote steps plus the artifact paths to copy
//!   back once every step succeeded. Steps may use `{placeholder}` variables
//!   (see [`PLACEHOLDERS`]), which are checked at load time.
//!
//! ## Parsing
//!
//! [`parse`] deserializes the YAML and then runs [`Config::validate`], so a
//! `Config` obtained through this module is always internally consistent.

use crate::defaults;
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Placeholders that task steps may reference.
pub const PLACEHOLDERS: &[&str] = &[
    "package",
    "branch",
    "series",
    "commit",
    "deps",
    "debs",
    "subpackages",
];

/// How a dependency is satisfied inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    /// Checked out from Git and copied into the container.
    #[serde(alias = "src")]
    Source,
    /// Pinned through Git, installed from the local package repository.
    #[serde(alias = "deb")]
    DebianPackage,
    /// Installed by package name; never resolved through Git.
    #[serde(alias = "sub")]
    Subpackage,
}

impl DependencyKind {
    /// Whether dependencies of this kind are pinned through source control.
    pub fn is_pinned(&self) -> bool {
        !matches!(self, DependencyKind::Subpackage)
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DependencyKind::Source => "source",
            DependencyKind::DebianPackage => "debian-package",
            DependencyKind::Subpackage => "subpackage",
        };
        f.pad(name)
    }
}

/// A named dependency of the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub kind: DependencyKind,
}

/// Identity written into synthesized changelog stanzas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    pub email: String,
}

/// Where dependency repositories are looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repositories {
    /// Base of the developer's own repositories, tried first.
    #[serde(default)]
    pub current: Option<String>,
    /// Base of the canonical repositories, tried second.
    pub canonical: String,
    /// Branch used when neither base has the requested branch.
    #[serde(default = "defaults::default_branch")]
    pub default_branch: String,
}

/// Ephemeral container settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Template container name; `{series}` is substituted.
    pub template: String,
    #[serde(default = "defaults::container_user")]
    pub user: String,
    /// Reachability polls before giving up.
    #[serde(default = "defaults::provision_attempts")]
    pub attempts: u32,
    /// Seconds between reachability polls.
    #[serde(default = "defaults::provision_interval_secs")]
    pub interval_secs: u64,
    /// Run the `lxc-*` tools through `sudo`.
    #[serde(default = "defaults::container_sudo")]
    pub sudo: bool,
}

impl ContainerConfig {
    /// The template container to clone for a series.
    pub fn template_for(&self, series: &str) -> String {
        self.template.replace("{series}", series)
    }
}

/// Remote steps and artifacts for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub steps: Vec<String>,
    /// Remote paths (relative to the container user's home) copied back
    /// after all steps succeed.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Per-task command sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tasks {
    #[serde(default)]
    pub devtest: Option<TaskConfig>,
    #[serde(default)]
    pub pkgtest: Option<TaskConfig>,
    #[serde(default)]
    pub builddoc: Option<TaskConfig>,
}

/// The complete `.stagehand.yaml` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Debian source package name, as it appears in the changelog header.
    pub package: String,
    /// File holding the `__version__ = '...'` literal.
    pub version_file: PathBuf,
    #[serde(default = "defaults::changelog_path")]
    pub changelog: PathBuf,
    /// Default target release series.
    pub series: String,
    /// Repository line the published builds are filed under.
    #[serde(default = "defaults::default_branch")]
    pub line: String,
    #[serde(default)]
    pub maintainer: Option<Maintainer>,
    /// GPG key for release manifests; gpg's default key when unset.
    #[serde(default)]
    pub signing_key: Option<String>,
    pub repositories: Repositories,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    pub container: ContainerConfig,
    #[serde(default = "defaults::default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "defaults::work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "defaults::build_dir")]
    pub build_dir: PathBuf,
    #[serde(default)]
    pub tasks: Tasks,
}

impl Config {
    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.package.trim().is_empty() {
            return Err(Error::Config {
                message: "package must not be empty".to_string(),
                hint: Some("Set 'package:' to the Debian source package name".to_string()),
            });
        }
        if self.series.trim().is_empty() {
            return Err(Error::Config {
                message: "series must not be empty".to_string(),
                hint: None,
            });
        }
        if self.container.attempts == 0 {
            return Err(Error::Config {
                message: "container.attempts must be at least 1".to_string(),
                hint: Some("The default is 40 polls".to_string()),
            });
        }

        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                return Err(Error::Config {
                    message: "dependency name must not be empty".to_string(),
                    hint: None,
                });
            }
            if !seen.insert(dep.name.as_str()) {
                return Err(Error::Config {
                    message: format!("duplicate dependency '{}'", dep.name),
                    hint: None,
                });
            }
        }

        let placeholder = Regex::new(r"\{([A-Za-z_]+)\}")?;
        for (task, cfg) in self.task_entries() {
            let templates = cfg
                .steps
                .iter()
                .map(|s| ("step", s))
                .chain(cfg.artifacts.iter().map(|a| ("artifact", a)));
            for (what, template) in templates {
                for cap in placeholder.captures_iter(template) {
                    let name = &cap[1];
                    if !PLACEHOLDERS.contains(&name) {
                        return Err(Error::Config {
                            message: format!(
                                "unknown placeholder '{{{}}}' in {} {}: {}",
                                name, task, what, template
                            ),
                            hint: Some(format!("Known placeholders: {}", PLACEHOLDERS.join(", "))),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Dependencies of the given kind, in declaration order.
    pub fn dependencies_of(&self, kind: DependencyKind) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(move |d| d.kind == kind)
    }

    fn task_entries(&self) -> Vec<(&'static str, &TaskConfig)> {
        let mut entries = Vec::new();
        if let Some(t) = &self.tasks.devtest {
            entries.push(("devtest", t));
        }
        if let Some(t) = &self.tasks.pkgtest {
            entries.push(("pkgtest", t));
        }
        if let Some(t) = &self.tasks.builddoc {
            entries.push(("builddoc", t));
        }
        entries
    }

    /// Resolve relative paths against `base` and expand `~`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |p: &Path| {
            let expanded = expand_home(p);
            if expanded.is_absolute() {
                expanded
            } else {
                base.join(expanded)
            }
        };
        self.version_file = resolve(&self.version_file);
        self.changelog = resolve(&self.changelog);
        self.repo_root = resolve(&self.repo_root);
        self.work_dir = resolve(&self.work_dir);
        self.build_dir = resolve(&self.build_dir);
        self
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Parse and validate a configuration from a YAML string.
pub fn parse(yaml_content: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(yaml_content)?;
    config.validate()?;
    Ok(config)
}

/// Load a configuration file; relative paths inside it are resolved against
/// the file's directory.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config = parse(&content)?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok(config.resolve_paths(base))
}
