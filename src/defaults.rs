//! Default values for stagehand configuration.
//!
//! This module provides centralized default values used across the
//! configuration schema and the commands, ensuring consistency and avoiding
//! duplication.

use std::path::PathBuf;

/// Default configuration file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILENAME: &str = ".stagehand.yaml";

/// File name of the per-run dependency pin record inside the work dir.
pub const PIN_RECORD_FILENAME: &str = "deps-pins.jsonl";

/// Directory inside the work dir holding dependency checkouts.
pub const DEPS_DIRNAME: &str = "deps";

pub fn default_branch() -> String {
    "master".to_string()
}

pub fn container_user() -> String {
    "ubuntu".to_string()
}

pub fn provision_attempts() -> u32 {
    40
}

pub fn provision_interval_secs() -> u64 {
    5
}

pub fn container_sudo() -> bool {
    true
}

pub fn changelog_path() -> PathBuf {
    PathBuf::from("debian/changelog")
}

pub fn work_dir() -> PathBuf {
    PathBuf::from(".stagehand")
}

pub fn build_dir() -> PathBuf {
    PathBuf::from("build-deb")
}

/// Returns the default root of the local package repository.
///
/// Uses the platform data directory (`~/.local/share/stagehand/repo` on
/// Linux), falling back to `.stagehand-repo` in the current directory if the
/// platform directory cannot be determined.
pub fn default_repo_root() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("stagehand").join("repo"))
        .unwrap_or_else(|| PathBuf::from(".stagehand-repo"))
}
