//! End-to-end tests for the `stagehand version` command.

mod common;
use common::prelude::*;

#[test]
fn test_version_aligned() {
    let fixture = TestFixture::new().with_project(configs::MINIMAL);
    fixture
        .command()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("version literal: 3.2.0"))
        .stdout(predicate::str::contains("3.2.0-1 (trusty, urgency=low)"))
        .stdout(predicate::str::contains("Package version 3.2.0-1"));
}

#[test]
fn test_version_mismatch_check_fails() {
    let fixture = TestFixture::new()
        .with_project(configs::MINIMAL)
        .with_file("openquake/hazardlib/__init__.py", "__version__ = '3.3.0'\n");
    fixture
        .command()
        .args(["version", "--check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("version stage failed"))
        .stderr(predicate::str::contains("not aligned"));
}

#[test]
fn test_version_mismatch_without_terminal_declines() {
    let fixture = TestFixture::new()
        .with_project(configs::MINIMAL)
        .with_file("openquake/hazardlib/__init__.py", "__version__ = '3.3.0'\n");
    fixture
        .command()
        .arg("version")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("version stage failed"));
}

#[test]
fn test_version_missing_literal() {
    let fixture = TestFixture::new()
        .with_project(configs::MINIMAL)
        .with_file("openquake/hazardlib/__init__.py", "VERSION = 3\n");
    fixture
        .command()
        .arg("version")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Version parse error"));
}

#[test]
fn test_version_config_in_other_directory() {
    let fixture = TestFixture::new()
        .with_file("project/.stagehand.yaml", configs::MINIMAL)
        .with_file("project/openquake/hazardlib/__init__.py", configs::LITERAL)
        .with_file("project/debian/changelog", configs::CHANGELOG);
    fixture
        .command()
        .args(["--config", "project/.stagehand.yaml", "version"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Package version 3.2.0-1"));
}
