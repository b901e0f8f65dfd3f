//! Crash-safe file and directory replacement helpers.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};

/// Hidden name next to `path`, unique to this process.
pub(crate) fn sibling(path: &Path, tag: &str) -> Result<PathBuf> {
    let parent = path.parent().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path has no parent: {}", path.display()),
        ))
    })?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("failed to resolve filename for {}", path.display()),
            ))
        })?;
    Ok(parent.join(format!(".{}.{}-{}", file_name, tag, std::process::id())))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Replace `path` with `bytes` through a temp file and a rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = sibling(path, "tmp")?;
    write_synced(&temp_path, bytes)?;
    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })?;
    Ok(())
}

/// Rewrite several files so that either all of them take their new content
/// or none of them changes.
///
/// New contents are staged next to their targets first. Targets are then
/// swapped in one by one; if a swap fails, the targets already swapped are
/// restored from the contents read up front.
pub fn write_all_or_none(updates: &[(PathBuf, String)]) -> Result<()> {
    write_all_or_none_with(updates, |from, to| fs::rename(from, to))
}

fn write_all_or_none_with<F>(updates: &[(PathBuf, String)], rename: F) -> Result<()>
where
    F: Fn(&Path, &Path) -> std::io::Result<()>,
{
    let mut originals = Vec::with_capacity(updates.len());
    for (path, _) in updates {
        originals.push(fs::read(path)?);
    }

    let mut staged: Vec<PathBuf> = Vec::with_capacity(updates.len());
    for (path, content) in updates {
        let temp = match sibling(path, "new") {
            Ok(t) => t,
            Err(e) => {
                discard(&staged);
                return Err(e);
            }
        };
        if let Err(e) = write_synced(&temp, content.as_bytes()) {
            let _ = fs::remove_file(&temp);
            discard(&staged);
            return Err(e);
        }
        staged.push(temp);
    }

    for (i, ((path, _), temp)) in updates.iter().zip(&staged).enumerate() {
        if let Err(e) = rename(temp, path) {
            warn!("failed to replace {}, rolling back: {}", path.display(), e);
            for ((done, _), original) in updates[..i].iter().zip(&originals) {
                if let Err(restore) = atomic_write(done, original) {
                    warn!("could not restore {}: {}", done.display(), restore);
                }
            }
            discard(&staged[i..]);
            return Err(e.into());
        }
        debug!("rewrote {}", path.display());
    }

    Ok(())
}

fn discard(paths: &[PathBuf]) {
    for p in paths {
        let _ = fs::remove_file(p);
    }
}

/// Move the fully written directory `staged` to `target`, replacing any
/// directory already there.
///
/// The previous entry is renamed aside before the staged one is renamed in,
/// so `target` is never a partially written directory. Returns whether an
/// existing entry was replaced.
pub fn replace_dir(staged: &Path, target: &Path) -> Result<bool> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let replaced = target.exists();
    let retired = sibling(target, "old")?;
    if replaced {
        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }
        fs::rename(target, &retired)?;
    }

    if let Err(e) = fs::rename(staged, target) {
        if replaced {
            let _ = fs::rename(&retired, target);
        }
        return Err(e.into());
    }

    if replaced {
        fs::remove_dir_all(&retired)?;
    }
    Ok(replaced)
}
