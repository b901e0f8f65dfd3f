//! # Container Tasks
//!
//! `devtest`, `pkgtest` and `builddoc` share one shape:
//!
//! 1.  Pin every source and Debian-package dependency for the branch.
//! 2.  Provision a container from the series template.
//! 3.  Upload the inputs: the project's source archive, source dependency
//!     checkouts, and published builds of Debian-package dependencies
//!     (plus the project's own build for `pkgtest`).
//! 4.  Run the task's steps with placeholders filled in, then fetch the
//!     declared artifacts into `<work-dir>/out/<task>`.
//! 5.  Tear the container down, whatever happened.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::info;
use regex::{Captures, Regex};

use crate::config::{Config, DependencyKind, TaskConfig};
use crate::environment::{EnvironmentManager, EphemeralEnvironment};
use crate::error::{Error, Result, Stage};
use crate::git;
use crate::pins::{Pin, PinStore};
use crate::publish;
use crate::resolver::{DependencyResolver, Resolution};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("placeholder regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Devtest,
    Pkgtest,
    Builddoc,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Devtest => "devtest",
            TaskKind::Pkgtest => "pkgtest",
            TaskKind::Builddoc => "builddoc",
        }
    }

    pub fn config<'c>(&self, config: &'c Config) -> Option<&'c TaskConfig> {
        match self {
            TaskKind::Devtest => config.tasks.devtest.as_ref(),
            TaskKind::Pkgtest => config.tasks.pkgtest.as_ref(),
            TaskKind::Builddoc => config.tasks.builddoc.as_ref(),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Replace `{name}` references with their values. Unknown names are left as
/// they are; configuration validation rejects them up front.
pub fn render(template: &str, values: &HashMap<&str, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// The project's committed sources, packed for upload.
#[derive(Debug, Clone)]
pub struct SourceTree {
    pub archive: PathBuf,
    pub commit: String,
}

impl SourceTree {
    /// Archive `HEAD` of `source_dir` into `work_dir` as `<package>.tar`.
    pub fn pack(source_dir: &Path, package: &str, work_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let archive = work_dir.join(format!("{}.tar", package));
        git::archive(source_dir, package, &archive)?;
        let commit = git::head_commit(source_dir)?;
        Ok(Self { archive, commit })
    }
}

/// Result of a finished task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: TaskKind,
    pub pins: Vec<Pin>,
    pub artifacts: Vec<PathBuf>,
}

/// Where each input lands in the container, relative to the login directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub local: PathBuf,
    pub remote: String,
}

fn upload_and_run(
    env: &mut EphemeralEnvironment<'_>,
    uploads: &[Upload],
    steps: &[String],
    artifacts: &[String],
    dest: &Path,
) -> Result<Vec<PathBuf>> {
    for upload in uploads {
        info!("uploading {} to {}", upload.local.display(), upload.remote);
        env.upload(&upload.local, &upload.remote)?;
    }
    env.run(steps, artifacts, dest)
}

pub struct TaskRunner<'a> {
    config: &'a Config,
    series: String,
    resolver: DependencyResolver,
    environments: EnvironmentManager<'a>,
    allow_latest_build: bool,
}

impl<'a> TaskRunner<'a> {
    pub fn new(
        config: &'a Config,
        series: impl Into<String>,
        resolver: DependencyResolver,
        environments: EnvironmentManager<'a>,
    ) -> Self {
        Self {
            config,
            series: series.into(),
            resolver,
            environments,
            allow_latest_build: false,
        }
    }

    /// Accept the newest published build when a dependency's exact commit
    /// was never built.
    pub fn allow_latest_build(mut self, allow: bool) -> Self {
        self.allow_latest_build = allow;
        self
    }

    fn line_dir(&self) -> PathBuf {
        self.config
            .repo_root
            .join(&self.series)
            .join(&self.config.line)
    }

    fn names_of(&self, kind: DependencyKind) -> String {
        self.config
            .dependencies_of(kind)
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Values available to `{placeholder}` references in steps.
    pub fn placeholders(&self, branch: &str, commit: &str) -> HashMap<&'static str, String> {
        HashMap::from([
            ("package", self.config.package.clone()),
            ("branch", branch.to_string()),
            ("series", self.series.clone()),
            ("commit", commit.to_string()),
            ("deps", self.names_of(DependencyKind::Source)),
            ("debs", self.names_of(DependencyKind::DebianPackage)),
            ("subpackages", self.names_of(DependencyKind::Subpackage)),
        ])
    }

    /// Work out what to copy into the container.
    pub fn uploads(&self, task: TaskKind, source: &SourceTree, resolutions: &[Resolution]) -> Result<Vec<Upload>> {
        let mut uploads = vec![Upload {
            local: source.archive.clone(),
            remote: format!("{}.tar", self.config.package),
        }];

        let line_dir = self.line_dir();
        for resolution in resolutions {
            let pin = &resolution.pin;
            match pin.kind {
                DependencyKind::Source => uploads.push(Upload {
                    local: resolution.checkout.clone(),
                    remote: format!("deps/{}", pin.name),
                }),
                DependencyKind::DebianPackage => {
                    let build = publish::find_build(&line_dir, &pin.name, &pin.commit, self.allow_latest_build)?;
                    uploads.push(Upload {
                        local: build,
                        remote: format!("repo/{}", pin.name),
                    });
                }
                DependencyKind::Subpackage => {}
            }
        }

        if task == TaskKind::Pkgtest {
            let build = publish::find_build(
                &line_dir,
                &self.config.package,
                &source.commit,
                self.allow_latest_build,
            )?;
            uploads.push(Upload {
                local: build,
                remote: format!("repo/{}", self.config.package),
            });
        }
        Ok(uploads)
    }

    /// Run `task` for `branch` in a fresh container.
    ///
    /// Errors are labelled with the stage they happened in: resolve,
    /// provision or remote.
    pub fn run(&self, task: TaskKind, branch: &str, source: &SourceTree, pins: &mut PinStore) -> Result<TaskReport> {
        let task_config = task.config(self.config).ok_or_else(|| Error::Config {
            message: format!("no steps configured for task '{}'", task),
            hint: Some(format!("Add a tasks.{} section to the configuration", task)),
        })?;

        info!("{}: resolving dependencies for branch {}", task, branch);
        let resolutions = self
            .resolver
            .resolve_all(&self.config.dependencies, branch, pins)
            .and_then(|resolutions| {
                let uploads = self.uploads(task, source, &resolutions)?;
                Ok((resolutions, uploads))
            });
        let (resolutions, uploads) = resolutions.map_err(|e| e.in_stage(Stage::Resolve))?;

        let values = self.placeholders(branch, &source.commit);
        let steps: Vec<String> = task_config.steps.iter().map(|s| render(s, &values)).collect();
        let artifacts: Vec<String> = task_config
            .artifacts
            .iter()
            .map(|a| render(a, &values))
            .collect();
        let dest = self.config.work_dir.join("out").join(task.name());

        let template = self.config.container.template_for(&self.series);
        // Body errors are remote failures; anything else came from
        // provisioning or teardown.
        let fetched = self
            .environments
            .with_environment(&template, |env| {
                upload_and_run(env, &uploads, &steps, &artifacts, &dest)
                    .map_err(|e| e.in_stage(Stage::Remote))
            })
            .map_err(|e| e.in_stage(Stage::Provision))?;

        info!("{}: finished, {} artifact(s)", task, fetched.len());
        Ok(TaskReport {
            task,
            pins: resolutions.into_iter().map(|r| r.pin).collect(),
            artifacts: fetched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::environment::tests::FakeBackend;
    use crate::environment::RetryPolicy;
    use crate::remote::tests::FakeShell;
    use crate::interrupt;
    use crate::resolver::tests::FakeGit;
    use serial_test::serial;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const CANONICAL: &str = "git://github.com/gem";

    fn config_in(temp: &TempDir) -> Config {
        let yaml = r#"
package: python-oq-hazardlib
version_file: openquake/hazardlib/__init__.py
series: trusty
line: master
repositories:
  canonical: git://github.com/gem
dependencies:
  - { name: oq-nrmllib, kind: source }
  - { name: python-oq-libs, kind: debian-package }
  - { name: python-oq-hazardlib-doc, kind: subpackage }
container:
  template: ubuntu-lxc-{series}-eph
  attempts: 3
  interval_secs: 0
tasks:
  devtest:
    steps:
      - "tar xf {package}.tar"
      - "cd {package} && nosetests --with-xunit"
      - "echo {deps} {debs} {subpackages} {commit}"
    artifacts: ["{package}/nosetests.xml"]
  pkgtest:
    steps: ["sudo apt-get install -y {package} {subpackages}"]
"#;
        config::parse(yaml).unwrap().resolve_paths(temp.path())
    }

    fn source(temp: &TempDir) -> SourceTree {
        let archive = temp.path().join("python-oq-hazardlib.tar");
        fs::write(&archive, "tar").unwrap();
        SourceTree {
            archive,
            commit: "abcdef1".to_string(),
        }
    }

    fn fake_git() -> FakeGit {
        let git = FakeGit::default();
        git.set_head(&format!("{}/oq-nrmllib.git", CANONICAL), "master", "1111111");
        git.set_head(&format!("{}/python-oq-libs.git", CANONICAL), "master", "2222222");
        git
    }

    fn publish_dep(config: &Config, name: &str, commit: &str) -> PathBuf {
        let dir = config
            .repo_root
            .join("trusty/master")
            .join(format!("{}.{}", name, commit));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_render_placeholders() {
        let values = HashMap::from([("package", "pkg".to_string()), ("branch", "b".to_string())]);
        assert_eq!(render("cd {package} && git log {branch}", &values), "cd pkg && git log b");
        assert_eq!(render("echo {unknown}", &values), "echo {unknown}");
        assert_eq!(render("awk '{ print }'", &values), "awk '{ print }'");
    }

    #[test]
    #[serial]
    fn test_devtest_uploads_and_runs_steps() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        publish_dep(&config, "python-oq-libs", "2222222");
        let backend = FakeBackend::ready_after(1);
        let shell = FakeShell::reachable();
        let git = fake_git();

        let resolver = DependencyResolver::with_operations(
            Box::new(git.clone()),
            config.repositories.clone(),
            temp.path().join("deps"),
        );
        let environments = EnvironmentManager::new(&backend, &shell, RetryPolicy::new(3, Duration::ZERO));
        let runner = TaskRunner::new(&config, "trusty", resolver, environments);

        let mut pins = PinStore::in_memory();
        let report = runner
            .run(TaskKind::Devtest, "master", &source(&temp), &mut pins)
            .unwrap();

        assert_eq!(report.pins.len(), 2);
        assert_eq!(pins.len(), 2);
        assert_eq!(
            report.artifacts,
            vec![config
                .work_dir
                .join("out/devtest/python-oq-hazardlib/nosetests.xml")]
        );

        let executed = shell.executed.lock().unwrap().clone();
        assert_eq!(
            executed,
            vec![
                "tar xf python-oq-hazardlib.tar".to_string(),
                "cd python-oq-hazardlib && nosetests --with-xunit".to_string(),
                "echo oq-nrmllib python-oq-libs python-oq-hazardlib-doc abcdef1".to_string(),
            ]
        );
        let remotes: Vec<String> = shell
            .uploaded
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect();
        assert_eq!(
            remotes,
            vec!["python-oq-hazardlib.tar", "deps/oq-nrmllib", "repo/python-oq-libs"]
        );

        let log = backend.log.lock().unwrap();
        assert_eq!(log.cloned, vec!["ubuntu-lxc-trusty-eph-0".to_string()]);
        assert_eq!(log.destroyed, log.cloned);
    }

    #[test]
    #[serial]
    fn test_pkgtest_requires_exact_build() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        publish_dep(&config, "python-oq-libs", "2222222");
        publish_dep(&config, "python-oq-hazardlib", "0000000");
        let backend = FakeBackend::ready_after(1);
        let shell = FakeShell::reachable();

        let resolver = DependencyResolver::with_operations(
            Box::new(fake_git()),
            config.repositories.clone(),
            temp.path().join("deps"),
        );
        let environments = EnvironmentManager::new(&backend, &shell, RetryPolicy::new(3, Duration::ZERO));
        let runner = TaskRunner::new(&config, "trusty", resolver, environments);

        let err = runner
            .run(TaskKind::Pkgtest, "master", &source(&temp), &mut PinStore::in_memory())
            .unwrap_err();
        assert!(matches!(err.root(), Error::BuildNotFound { commit, .. } if commit == "abcdef1"));
        assert_eq!(err.stage(), Some(Stage::Resolve));
        // Nothing was provisioned for a task that could never run.
        assert!(backend.log.lock().unwrap().cloned.is_empty());
    }

    #[test]
    #[serial]
    fn test_pkgtest_latest_build_fallback() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        publish_dep(&config, "python-oq-libs", "2222222");
        let older = publish_dep(&config, "python-oq-hazardlib", "0000000");
        let backend = FakeBackend::ready_after(1);
        let shell = FakeShell::reachable();

        let resolver = DependencyResolver::with_operations(
            Box::new(fake_git()),
            config.repositories.clone(),
            temp.path().join("deps"),
        );
        let environments = EnvironmentManager::new(&backend, &shell, RetryPolicy::new(3, Duration::ZERO));
        let runner = TaskRunner::new(&config, "trusty", resolver, environments).allow_latest_build(true);

        runner
            .run(TaskKind::Pkgtest, "master", &source(&temp), &mut PinStore::in_memory())
            .unwrap();

        let uploaded = shell.uploaded.lock().unwrap();
        assert_eq!(uploaded.last().unwrap(), &(older, "repo/python-oq-hazardlib".to_string()));
        assert_eq!(
            *shell.executed.lock().unwrap(),
            vec!["sudo apt-get install -y python-oq-hazardlib python-oq-hazardlib-doc".to_string()]
        );
    }

    #[test]
    #[serial]
    fn test_failing_step_tears_down() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        publish_dep(&config, "python-oq-libs", "2222222");
        let backend = FakeBackend::ready_after(1);
        let shell = FakeShell::reachable();
        shell.fail_on("cd python-oq-hazardlib && nosetests --with-xunit");

        let resolver = DependencyResolver::with_operations(
            Box::new(fake_git()),
            config.repositories.clone(),
            temp.path().join("deps"),
        );
        let environments = EnvironmentManager::new(&backend, &shell, RetryPolicy::new(3, Duration::ZERO));
        let runner = TaskRunner::new(&config, "trusty", resolver, environments);

        let err = runner
            .run(TaskKind::Devtest, "master", &source(&temp), &mut PinStore::in_memory())
            .unwrap_err();
        assert!(matches!(err.root(), Error::RemoteCommandFailure { step: 2, .. }));
        assert_eq!(err.stage(), Some(Stage::Remote));
        assert_eq!(shell.executed.lock().unwrap().len(), 2);
        assert_eq!(backend.log.lock().unwrap().destroyed.len(), 1);
    }

    #[test]
    #[serial]
    fn test_missing_task_is_config_error() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let backend = FakeBackend::ready_after(1);
        let shell = FakeShell::reachable();
        let resolver = DependencyResolver::with_operations(
            Box::new(fake_git()),
            config.repositories.clone(),
            temp.path().join("deps"),
        );
        let environments = EnvironmentManager::new(&backend, &shell, RetryPolicy::new(3, Duration::ZERO));
        let runner = TaskRunner::new(&config, "trusty", resolver, environments);

        let err = runner
            .run(TaskKind::Builddoc, "master", &source(&temp), &mut PinStore::in_memory())
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    fn runner_with<'a>(
        config: &'a Config,
        backend: &'a FakeBackend,
        shell: &'a FakeShell,
    ) -> TaskRunner<'a> {
        let resolver = DependencyResolver::with_operations(
            Box::new(fake_git()),
            config.repositories.clone(),
            config.work_dir.join("deps"),
        );
        let environments = EnvironmentManager::new(backend, shell, RetryPolicy::new(3, Duration::ZERO));
        TaskRunner::new(config, "trusty", resolver, environments)
    }

    #[test]
    #[serial]
    fn test_interrupt_while_provisioning_is_a_provision_failure() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        publish_dep(&config, "python-oq-libs", "2222222");
        let backend = FakeBackend::never_ready();
        let shell = FakeShell::reachable();
        let runner = runner_with(&config, &backend, &shell);

        interrupt::trigger();
        let result = runner.run(TaskKind::Devtest, "master", &source(&temp), &mut PinStore::in_memory());
        interrupt::reset();

        let err = result.unwrap_err();
        assert!(matches!(err.root(), Error::Interrupted));
        assert_eq!(err.stage(), Some(Stage::Provision));
        assert!(shell.executed.lock().unwrap().is_empty());
    }

    #[test]
    #[serial]
    fn test_unwritable_pin_record_is_a_resolve_failure() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let record = temp.path().join("deps-pins.jsonl");
        let mut pins = PinStore::open(&record).unwrap();
        // A directory where the record should be makes the append fail.
        fs::create_dir_all(&record).unwrap();
        let backend = FakeBackend::ready_after(1);
        let shell = FakeShell::reachable();
        let runner = runner_with(&config, &backend, &shell);

        let err = runner
            .run(TaskKind::Devtest, "master", &source(&temp), &mut pins)
            .unwrap_err();

        assert!(matches!(err.root(), Error::Io(_)));
        assert_eq!(err.stage(), Some(Stage::Resolve));
        assert!(backend.log.lock().unwrap().cloned.is_empty());
    }
}
