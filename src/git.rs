//! Thin wrappers around the system `git` command.
//!
//! Using the system binary means SSH keys, credential helpers and anything
//! else configured in `~/.gitconfig` work without extra setup.

use std::fs;
use std::path::Path;
use std::process::Command;

use log::debug;

use crate::error::Error;

/// Run git with `args`, optionally inside `dir`, returning trimmed stdout.
///
/// `target` only labels the error (a URL or a checkout path).
fn run_git(dir: Option<&Path>, args: &[&str], target: &str) -> Result<String, Error> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.arg("-C").arg(dir);
    }
    cmd.args(args);
    debug!("git {}", args.join(" "));

    let output = cmd.output().map_err(|e| Error::GitCommand {
        command: args.join(" "),
        target: target.to_string(),
        stderr: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(Error::GitCommand {
            command: args.join(" "),
            target: target.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Build the clone URL of a named repository under a base.
///
/// `git@github.com:gem` + `oq-nrmllib` gives `git@github.com:gem/oq-nrmllib.git`.
pub fn repo_url(base: &str, name: &str) -> String {
    format!("{}/{}.git", base.trim_end_matches('/'), name)
}

/// Check whether `branch` exists as a head on the remote.
pub fn remote_branch_exists(url: &str, branch: &str) -> Result<bool, Error> {
    let refspec = format!("refs/heads/{}", branch);
    let stdout = run_git(None, &["ls-remote", "--heads", url, &refspec], url)?;

    // Output format: <hash>\t<ref>
    Ok(stdout
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .any(|r| r == refspec))
}

/// Clone `url` at `branch` into `target_dir`, replacing anything already there.
pub fn clone_branch(url: &str, branch: &str, target_dir: &Path) -> Result<(), Error> {
    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent)?;
    }

    let output = Command::new("git")
        .args(["clone", "--quiet", "--branch", branch, url])
        .arg(target_dir)
        .output()
        .map_err(|e| Error::GitClone {
            url: url.to_string(),
            branch: branch.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);

        // Provide helpful error message for common auth failures
        let message = if stderr.contains("Authentication failed")
            || stderr.contains("Permission denied")
            || stderr.contains("Could not read from remote repository")
        {
            format!(
                "Authentication failed. Make sure you have access to the repository.\n\
                Ensure your SSH key is loaded in ssh-agent or credentials are configured.\n\
                Error: {}",
                stderr
            )
        } else {
            stderr.to_string()
        };

        return Err(Error::GitClone {
            url: url.to_string(),
            branch: branch.to_string(),
            message,
        });
    }

    Ok(())
}

/// Bring an existing checkout to the tip of `branch` on its origin.
pub fn update_checkout(dir: &Path, branch: &str) -> Result<(), Error> {
    let target = dir.display().to_string();
    run_git(Some(dir), &["fetch", "--quiet", "origin", branch], &target)?;
    run_git(
        Some(dir),
        &["checkout", "--quiet", "-B", branch, "FETCH_HEAD"],
        &target,
    )?;
    Ok(())
}

/// URL of the `origin` remote of a checkout.
pub fn origin_url(dir: &Path) -> Result<String, Error> {
    run_git(
        Some(dir),
        &["config", "--get", "remote.origin.url"],
        &dir.display().to_string(),
    )
}

/// Abbreviated hash of `HEAD`.
pub fn head_commit(dir: &Path) -> Result<String, Error> {
    run_git(
        Some(dir),
        &["log", "-1", "--pretty=format:%h"],
        &dir.display().to_string(),
    )
}

/// Name of the checked-out branch, or `HEAD` when detached.
pub fn current_branch(dir: &Path) -> Result<String, Error> {
    run_git(
        Some(dir),
        &["rev-parse", "--abbrev-ref", "HEAD"],
        &dir.display().to_string(),
    )
}

/// Export `HEAD` of a checkout as a tar archive whose entries sit under
/// `prefix/`.
pub fn archive(dir: &Path, prefix: &str, output: &Path) -> Result<(), Error> {
    let prefix_arg = format!("--prefix={}/", prefix.trim_end_matches('/'));
    let output_arg = format!("--output={}", output.display());
    run_git(
        Some(dir),
        &["archive", "--format=tar", &prefix_arg, &output_arg, "HEAD"],
        &dir.display().to_string(),
    )?;
    Ok(())
}

/// Copy the committed tree of `dir` to `dest`, without history or
/// uncommitted changes.
pub fn export_head(dir: &Path, dest: &Path) -> Result<(), Error> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    let source = dir.display().to_string();
    let dest_arg = dest.display().to_string();
    run_git(
        None,
        &["clone", "--quiet", "--no-hardlinks", &source, &dest_arg],
        &source,
    )?;
    fs::remove_dir_all(dest.join(".git"))?;
    Ok(())
}
