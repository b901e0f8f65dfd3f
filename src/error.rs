//! # Error Handling
//!
//! This module defines the centralized error type for `stagehand`. It uses
//! `thiserror` to build a single `Error` enum covering every failure mode of
//! the orchestration run, so that library callers can match on the variants
//! that carry policy (for example, `VersionMismatch` is recoverable while
//! `ResolutionConflict` is not) and the binary can report the rest verbatim.
//!
//! ## Key Components
//!
//! - **`Error`**: every failure the library can produce.
//! - **`Result<T>`**: alias for `std::result::Result<T, Error>`.
//!
//! Failures are grouped roughly by the component that raises them:
//!
//! - Configuration loading and validation.
//! - Git commands and dependency pinning (`ResolutionConflict`).
//! - Container lifecycle (`ProvisioningTimeout`, `Container`).
//! - Remote execution (`RemoteCommandFailure`, `RemoteExec`, `RemoteCopy`).
//! - Version reconciliation (`VersionParse`, `VersionMismatch`).
//! - Local package builds, publishing and signing.
//! - Cooperative cancellation (`Interrupted`).
//! - Wrapped foreign errors (I/O, YAML, JSON, regex, glob, prompts).

use thiserror::Error;

/// Main error type for stagehand operations
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration file could not be parsed or failed validation.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// An error occurred while cloning a Git repository.
    #[error("Git clone error for {url}@{branch}: {message}")]
    GitClone {
        url: String,
        branch: String,
        message: String,
    },

    /// An error occurred while executing a Git command.
    #[error("Git command failed for {target}: {command} - {stderr}")]
    GitCommand {
        command: String,
        target: String,
        stderr: String,
    },

    /// A dependency resolved differently from the pin recorded earlier in
    /// the same run.
    #[error("Resolution conflict for {dependency}: {field} was pinned to '{pinned}' but now resolves to '{resolved}'")]
    ResolutionConflict {
        dependency: String,
        field: String,
        pinned: String,
        resolved: String,
    },

    /// The pin record on disk is unreadable.
    #[error("Pin record error in {path}: {message}")]
    PinRecord { path: String, message: String },

    /// A container never became reachable within the retry budget.
    #[error("Provisioning timeout: container {name} not reachable after {attempts} attempts")]
    ProvisioningTimeout { name: String, attempts: u32 },

    /// A container lifecycle command failed.
    #[error("Container error: {command} - {message}")]
    Container { command: String, message: String },

    /// A step of a remote command sequence exited unsuccessfully.
    #[error("Remote command failed at step {step} ({command}): exit status {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "killed by signal".to_string()))]
    RemoteCommandFailure {
        /// 1-based index of the failing step
        step: usize,
        command: String,
        exit_code: Option<i32>,
    },

    /// The SSH client could not be started or waited on.
    #[error("Could not run a command on {host}: {message}")]
    RemoteExec { host: String, message: String },

    /// Copying files to or from a container failed.
    #[error("Remote copy failed: {src} -> {dst}: {message}")]
    RemoteCopy {
        src: String,
        dst: String,
        message: String,
    },

    /// A version string did not match the expected grammar.
    #[error("Version parse error in {source_name}: {message}")]
    VersionParse {
        source_name: String,
        message: String,
    },

    /// The version literal and the changelog disagree and the operator did
    /// not confirm proceeding.
    #[error("Versions are not aligned: version literal {literal}, changelog {changelog}")]
    VersionMismatch { literal: String, changelog: String },

    /// A local package build tool failed.
    #[error("Build tool failed: {tool} - {message}")]
    Build { tool: String, message: String },

    /// Publishing to the local package repository failed.
    #[error("Publish error for {target}: {message}")]
    Publish { target: String, message: String },

    /// Signing the release manifest failed.
    #[error("Signing error: {message}")]
    Signing { message: String },

    /// No pre-built package exists for a dependency.
    #[error("No published build of {package} for commit {commit} in {location}")]
    BuildNotFound {
        package: String,
        commit: String,
        location: String,
    },

    /// The run was cancelled by SIGINT or SIGTERM.
    #[error("Interrupted by signal")]
    Interrupted,

    /// An error raised while `stage` was running. The label travels with
    /// errors whose variant alone does not say where they happened
    /// (interrupts, I/O, git used by a build).
    #[error("{inner}")]
    Staged { stage: Stage, inner: Box<Error> },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// An interactive prompt failed, wrapped from `dialoguer::Error`.
    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
}

impl Error {
    /// Whether the operator may override this error interactively.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.root(), Error::VersionMismatch { .. })
    }

    /// Label the error with the stage that was running. The innermost label
    /// wins, so a caller wrapping a whole pipeline does not override the
    /// stage a nested call already recorded.
    pub fn in_stage(self, stage: Stage) -> Error {
        match self {
            Error::Staged { .. } => self,
            other => Error::Staged {
                stage,
                inner: Box::new(other),
            },
        }
    }

    /// The error underneath any stage label.
    pub fn root(&self) -> &Error {
        match self {
            Error::Staged { inner, .. } => inner.root(),
            other => other,
        }
    }

    /// The stage this error belongs to: its label if it has one, else what
    /// the variant alone says.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Staged { stage, .. } => Some(*stage),
            Error::Config { .. } | Error::Yaml(_) => Some(Stage::Config),
            Error::GitClone { .. }
            | Error::GitCommand { .. }
            | Error::ResolutionConflict { .. }
            | Error::PinRecord { .. }
            | Error::BuildNotFound { .. } => Some(Stage::Resolve),
            Error::ProvisioningTimeout { .. } | Error::Container { .. } => Some(Stage::Provision),
            Error::RemoteCommandFailure { .. }
            | Error::RemoteExec { .. }
            | Error::RemoteCopy { .. } => Some(Stage::Remote),
            Error::VersionParse { .. } | Error::VersionMismatch { .. } => Some(Stage::Version),
            Error::Build { .. } => Some(Stage::Build),
            Error::Publish { .. } | Error::Signing { .. } => Some(Stage::Publish),
            _ => None,
        }
    }
}

/// Phase of a run, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Resolve,
    Provision,
    Remote,
    Version,
    Build,
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Stage::Config => "config",
            Stage::Resolve => "resolve",
            Stage::Provision => "provision",
            Stage::Remote => "remote",
            Stage::Version => "version",
            Stage::Build => "build",
            Stage::Publish => "publish",
        };
        f.write_str(label)
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
