//! # Dependency Pin Record
//!
//! A pin fixes the (repository, branch, commit) a dependency resolved to in
//! the current run. Every later stage of the run must see the same triple, so
//! a dependency branch that moves or disappears while a long test is running
//! aborts the run instead of silently testing against different code.
//!
//! The record is an append-only JSON-lines file in the work directory. It is
//! validated, not locked: one run writes it at a time.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::DependencyKind;
use crate::error::{Error, Result};

/// A resolved dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub name: String,
    pub kind: DependencyKind,
    pub repository: String,
    pub branch: String,
    pub commit: String,
}

impl Pin {
    /// First field on which `other` disagrees with this pin, as
    /// `(field, ours, theirs)`.
    fn first_difference<'a>(&'a self, other: &'a Pin) -> Option<(&'static str, &'a str, &'a str)> {
        if self.repository != other.repository {
            return Some(("repository", &self.repository, &other.repository));
        }
        if self.branch != other.branch {
            return Some(("branch", &self.branch, &other.branch));
        }
        if self.commit != other.commit {
            return Some(("commit", &self.commit, &other.commit));
        }
        None
    }
}

/// Append-validated store of pins for one run.
#[derive(Debug, Default)]
pub struct PinStore {
    path: Option<PathBuf>,
    pins: BTreeMap<String, Pin>,
}

impl PinStore {
    /// A store that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the record at `path`, loading any pins written earlier in the
    /// run. A missing file is an empty record.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path: None,
            pins: BTreeMap::new(),
        };

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let pin: Pin = serde_json::from_str(line).map_err(|e| Error::PinRecord {
                    path: path.display().to_string(),
                    message: format!("line {}: {}", lineno + 1, e),
                })?;
                store.record(pin)?;
            }
            debug!("loaded {} pins from {}", store.pins.len(), path.display());
        }

        store.path = Some(path);
        Ok(store)
    }

    /// Remove the record at `path`, starting a fresh run.
    pub fn reset(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Pin> {
        self.pins.get(name)
    }

    /// Record a resolution.
    ///
    /// Re-recording an identical pin is a no-op. A pin that disagrees with
    /// the one already recorded for the same dependency is a
    /// [`Error::ResolutionConflict`] and leaves the record unchanged.
    pub fn record(&mut self, pin: Pin) -> Result<&Pin> {
        let known = match self.pins.get(&pin.name) {
            Some(existing) => {
                if let Some((field, pinned, resolved)) = existing.first_difference(&pin) {
                    return Err(Error::ResolutionConflict {
                        dependency: pin.name.clone(),
                        field: field.to_string(),
                        pinned: pinned.to_string(),
                        resolved: resolved.to_string(),
                    });
                }
                true
            }
            None => false,
        };

        if let (false, Some(path)) = (known, &self.path) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", serde_json::to_string(&pin)?)?;
        }

        let name = pin.name.clone();
        Ok(self.pins.entry(name).or_insert(pin))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}
