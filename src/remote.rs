//! # Remote Command Runner
//!
//! Runs ordered shell commands inside a container over SSH and copies files
//! in and out with `scp`.
//!
//! Sequences are fail-fast: the first step that exits non-zero ends the
//! sequence with [`Error::RemoteCommandFailure`], later steps never run and
//! nothing is retried. Artifacts are only fetched once every step succeeded.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::interrupt;

/// Transport to a container - allows mocking in tests
pub trait RemoteShell {
    /// Run `command` on `host`, returning its exit code (`None` when killed
    /// by a signal). Failing to start the transport is an `Err`.
    fn exec(&self, host: &str, command: &str) -> Result<Option<i32>>;

    /// Whether `host` accepts commands yet.
    fn probe(&self, host: &str) -> bool;

    fn copy_to(&self, host: &str, local: &Path, remote: &str) -> Result<()>;

    fn copy_from(&self, host: &str, remote: &str, local: &Path) -> Result<()>;
}

/// `ssh`/`scp` transport logging in as a fixed user.
pub struct SshShell {
    user: String,
}

impl SshShell {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    /// Host keys of throwaway containers change on every run.
    fn common_options(cmd: &mut Command) {
        cmd.args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "BatchMode=yes",
            "-o",
            "LogLevel=ERROR",
        ]);
    }

    fn target(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }

    fn scp(&self, src: &str, dst: &str) -> Result<()> {
        let mut cmd = Command::new("scp");
        Self::common_options(&mut cmd);
        cmd.args(["-r", "-q", src, dst]);
        debug!("scp {} {}", src, dst);

        let output = cmd.output().map_err(|e| Error::RemoteCopy {
            src: src.to_string(),
            dst: dst.to_string(),
            message: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(Error::RemoteCopy {
                src: src.to_string(),
                dst: dst.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl RemoteShell for SshShell {
    fn exec(&self, host: &str, command: &str) -> Result<Option<i32>> {
        let mut cmd = Command::new("ssh");
        Self::common_options(&mut cmd);
        cmd.arg(self.target(host)).arg(command);
        debug!("ssh {} {}", host, command);

        let exec_error = |e: std::io::Error| Error::RemoteExec {
            host: host.to_string(),
            message: e.to_string(),
        };
        let child = cmd.spawn().map_err(exec_error)?;
        let status = wait_interruptibly(child).map_err(|e| match e {
            Error::Io(io) => exec_error(io),
            other => other,
        })?;
        Ok(status.code())
    }

    fn probe(&self, host: &str) -> bool {
        let mut cmd = Command::new("ssh");
        Self::common_options(&mut cmd);
        cmd.args(["-o", "ConnectTimeout=5"])
            .arg(self.target(host))
            .arg("/bin/true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd.status().map(|s| s.success()).unwrap_or(false)
    }

    fn copy_to(&self, host: &str, local: &Path, remote: &str) -> Result<()> {
        // scp does not create missing parents
        if let Some(parent) = Path::new(remote).parent().filter(|p| !p.as_os_str().is_empty()) {
            let mkdir = format!("mkdir -p '{}'", parent.display());
            if self.exec(host, &mkdir)? != Some(0) {
                return Err(Error::RemoteCopy {
                    src: local.display().to_string(),
                    dst: remote.to_string(),
                    message: format!("could not create {}", parent.display()),
                });
            }
        }
        let dst = format!("{}:{}", self.target(host), remote);
        self.scp(&local.display().to_string(), &dst)
    }

    fn copy_from(&self, host: &str, remote: &str, local: &Path) -> Result<()> {
        let src = format!("{}:{}", self.target(host), remote);
        self.scp(&src, &local.display().to_string())
    }
}

const WAIT_POLL: Duration = Duration::from_millis(100);

/// Wait for `child` to exit, killing it when the run is interrupted.
fn wait_interruptibly(mut child: Child) -> Result<ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if interrupt::is_interrupted() {
            warn!("interrupted, killing pid {}", child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Interrupted);
        }
        thread::sleep(WAIT_POLL);
    }
}

/// Where a remote artifact lands under `dest`: its own relative path, with
/// root, `.` and `..` components dropped.
fn local_path(dest: &Path, artifact: &str) -> PathBuf {
    let relative: PathBuf = Path::new(artifact)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    dest.join(relative)
}

/// Run `steps` in order on `host`, then fetch `artifacts` into `dest`,
/// keeping each artifact's relative path.
///
/// Returns the local paths of the fetched artifacts.
pub fn run_sequence(
    shell: &dyn RemoteShell,
    host: &str,
    steps: &[String],
    artifacts: &[String],
    dest: &Path,
) -> Result<Vec<PathBuf>> {
    let mut targets: Vec<(&String, PathBuf)> = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let local = local_path(dest, artifact);
        if local == dest {
            return Err(Error::Config {
                message: format!("artifact '{}' does not name a file", artifact),
                hint: None,
            });
        }
        if let Some((other, _)) = targets.iter().find(|(_, l)| *l == local) {
            return Err(Error::Config {
                message: format!(
                    "artifacts '{}' and '{}' would both be fetched to {}",
                    other,
                    artifact,
                    local.display()
                ),
                hint: None,
            });
        }
        targets.push((artifact, local));
    }

    for (i, step) in steps.iter().enumerate() {
        interrupt::check()?;
        info!("[{}/{}] {}", i + 1, steps.len(), step);
        let code = shell.exec(host, step)?;
        if code != Some(0) {
            return Err(Error::RemoteCommandFailure {
                step: i + 1,
                command: step.clone(),
                exit_code: code,
            });
        }
    }

    let mut fetched = Vec::with_capacity(targets.len());
    for (artifact, local) in targets {
        interrupt::check()?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        shell.copy_from(host, artifact, &local)?;
        debug!("fetched {} -> {}", artifact, local.display());
        fetched.push(local);
    }
    Ok(fetched)
}
