//! # Ephemeral Environments
//!
//! Every task runs in a fresh container cloned from a template and discarded
//! afterwards. An [`EphemeralEnvironment`] moves through
//!
//! ```text
//! uninitialized -> provisioning -> reachable -> in-use -> torn-down
//! ```
//!
//! and is torn down on every exit path: explicitly by
//! [`EnvironmentManager::with_environment`], and by `Drop` when an error or an
//! interrupt unwinds past the handle.
//!
//! Reachability is polled with a fixed budget ([`RetryPolicy`]); running out
//! is [`Error::ProvisioningTimeout`].

use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::interrupt;
use crate::remote::{self, RemoteShell};

/// Container lifecycle operations - allows mocking in tests
pub trait ContainerBackend {
    /// Start an ephemeral clone of `template`, returning its name.
    fn clone_ephemeral(&self, template: &str) -> Result<String>;

    /// The container's IP address, once it has one.
    fn address(&self, name: &str) -> Result<Option<String>>;

    /// Stop the container; ephemeral clones vanish when stopped.
    fn destroy(&self, name: &str) -> Result<()>;
}

/// LXC containers driven through the `lxc-*` tools.
pub struct LxcBackend {
    sudo: bool,
}

impl LxcBackend {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    fn lxc(&self, tool: &str, args: &[&str]) -> Result<String> {
        let mut cmd = if self.sudo {
            let mut c = Command::new("sudo");
            c.arg(tool);
            c
        } else {
            Command::new(tool)
        };
        cmd.args(args);
        debug!("{} {}", tool, args.join(" "));

        let command = format!("{} {}", tool, args.join(" "));
        let output = cmd.output().map_err(|e| Error::Container {
            command: command.clone(),
            message: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(Error::Container {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl ContainerBackend for LxcBackend {
    fn clone_ephemeral(&self, template: &str) -> Result<String> {
        let name = format!(
            "{}-{}-{}",
            template,
            std::process::id(),
            chrono::Utc::now().timestamp()
        );
        self.lxc("lxc-copy", &["-n", template, "-N", &name, "-e"])?;
        Ok(name)
    }

    fn address(&self, name: &str) -> Result<Option<String>> {
        let stdout = self.lxc("lxc-info", &["-n", name, "-i", "-H"])?;
        // IPv4 first; the container may also list link-local IPv6
        let mut addrs: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        addrs.sort_by_key(|a| a.contains(':'));
        Ok(addrs.first().map(|a| a.to_string()))
    }

    fn destroy(&self, name: &str) -> Result<()> {
        self.lxc("lxc-stop", &["-n", name, "-k"])?;
        Ok(())
    }
}

/// Fixed-budget polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Sleep for `duration`, waking early to notice interrupts.
fn interruptible_sleep(duration: Duration) -> Result<()> {
    let deadline = Instant::now() + duration;
    loop {
        interrupt::check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}

/// Lifecycle of a handle. The uninitialized stage has no handle: one only
/// exists once the clone was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Provisioning,
    Reachable,
    InUse,
    TornDown,
}

/// A live container owned by the current task.
pub struct EphemeralEnvironment<'a> {
    name: String,
    address: Option<String>,
    state: EnvState,
    backend: &'a dyn ContainerBackend,
    shell: &'a dyn RemoteShell,
}

impl<'a> EphemeralEnvironment<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EnvState {
        self.state
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    fn host(&self) -> Result<&str> {
        match (&self.state, &self.address) {
            (EnvState::Reachable | EnvState::InUse, Some(addr)) => Ok(addr.as_str()),
            _ => Err(Error::Container {
                command: "use".to_string(),
                message: format!("container {} is not reachable ({:?})", self.name, self.state),
            }),
        }
    }

    /// Copy a local file or directory into the container.
    pub fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        interrupt::check()?;
        let host = self.host()?.to_string();
        self.state = EnvState::InUse;
        self.shell.copy_to(&host, local, remote)
    }

    /// Run a fail-fast command sequence and fetch its artifacts into `dest`.
    pub fn run(&mut self, steps: &[String], artifacts: &[String], dest: &Path) -> Result<Vec<PathBuf>> {
        let host = self.host()?.to_string();
        self.state = EnvState::InUse;
        remote::run_sequence(self.shell, &host, steps, artifacts, dest)
    }

    /// Release the container. Calling it again is a no-op.
    pub fn teardown(&mut self) -> Result<()> {
        if self.state == EnvState::TornDown {
            return Ok(());
        }
        self.state = EnvState::TornDown;
        info!("tearing down {}", self.name);
        self.backend.destroy(&self.name)
    }
}

impl Drop for EphemeralEnvironment<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("teardown of {} failed: {}", self.name, e);
        }
    }
}

/// Provisions containers and guarantees their release.
pub struct EnvironmentManager<'a> {
    backend: &'a dyn ContainerBackend,
    shell: &'a dyn RemoteShell,
    retry: RetryPolicy,
    progress: ProgressBar,
}

impl<'a> EnvironmentManager<'a> {
    pub fn new(backend: &'a dyn ContainerBackend, shell: &'a dyn RemoteShell, retry: RetryPolicy) -> Self {
        Self {
            backend,
            shell,
            retry,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report waiting on `progress` (a spinner in the CLI).
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Clone `template` and wait until the clone accepts commands.
    ///
    /// The handle exists from the moment the clone is requested, so a
    /// timeout or an interrupt while waiting still tears it down.
    pub fn provision(&self, template: &str) -> Result<EphemeralEnvironment<'a>> {
        interrupt::check()?;
        info!("provisioning container from {}", template);
        // A failed clone leaves nothing to release.
        let name = self.backend.clone_ephemeral(template)?;

        let mut env = EphemeralEnvironment {
            name,
            address: None,
            state: EnvState::Provisioning,
            backend: self.backend,
            shell: self.shell,
        };

        let result = self.wait_reachable(&mut env);
        self.progress.finish_and_clear();
        result?;
        Ok(env)
    }

    fn wait_reachable(&self, env: &mut EphemeralEnvironment<'a>) -> Result<()> {
        for attempt in 1..=self.retry.attempts {
            interrupt::check()?;
            self.progress.set_message(format!(
                "waiting for {} ({}/{})",
                env.name, attempt, self.retry.attempts
            ));
            self.progress.tick();

            if let Some(addr) = self.backend.address(&env.name)? {
                if self.shell.probe(&addr) {
                    info!("{} reachable at {}", env.name, addr);
                    env.address = Some(addr);
                    env.state = EnvState::Reachable;
                    return Ok(());
                }
                debug!("{} has address {} but no ssh yet", env.name, addr);
            }

            if attempt < self.retry.attempts {
                interruptible_sleep(self.retry.interval)?;
            }
        }

        Err(Error::ProvisioningTimeout {
            name: env.name.clone(),
            attempts: self.retry.attempts,
        })
    }

    /// Provision a container, hand it to `body`, and tear it down whatever
    /// `body` returns.
    ///
    /// A teardown failure is reported only when `body` itself succeeded.
    pub fn with_environment<T, F>(&self, template: &str, body: F) -> Result<T>
    where
        F: FnOnce(&mut EphemeralEnvironment<'a>) -> Result<T>,
    {
        let mut env = self.provision(template)?;
        let outcome = body(&mut env);
        let released = env.teardown();
        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown)) => {
                warn!("teardown of {} failed: {}", env.name(), teardown);
                Err(e)
            }
        }
    }
}
