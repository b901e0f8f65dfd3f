//! End-to-end tests for the `stagehand pins` command.

mod common;
use common::prelude::*;

const RECORD: &str = concat!(
    r#"{"name":"oq-nrmllib","kind":"source","repository":"git://github.com/gem/oq-nrmllib.git","branch":"master","commit":"1111111"}"#,
    "\n",
    r#"{"name":"python-oq-libs","kind":"debian-package","repository":"git://github.com/gem/python-oq-libs.git","branch":"master","commit":"2222222"}"#,
    "\n",
);

#[test]
fn test_pins_empty_record() {
    let fixture = TestFixture::new().with_config(configs::MINIMAL);
    fixture
        .command()
        .arg("pins")
        .assert()
        .success()
        .stdout(predicate::str::contains("No dependencies pinned"));
}

#[test]
fn test_pins_lists_record() {
    let fixture = TestFixture::new()
        .with_config(configs::MINIMAL)
        .with_file(".stagehand/deps-pins.jsonl", RECORD);
    fixture
        .command()
        .arg("pins")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 pinned dependencies"))
        .stdout(predicate::str::contains("oq-nrmllib"))
        .stdout(predicate::str::contains("debian-package"))
        .stdout(predicate::str::contains("@ master (2222222)"));
}

#[test]
fn test_pins_json() {
    let fixture = TestFixture::new()
        .with_config(configs::MINIMAL)
        .with_file(".stagehand/deps-pins.jsonl", RECORD);
    let output = fixture.command().args(["pins", "--json"]).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["name"], "oq-nrmllib");
    assert_eq!(lines[1]["commit"], "2222222");
}

#[test]
fn test_pins_conflicting_record_fails() {
    let conflicting = format!(
        "{}{}\n",
        RECORD,
        r#"{"name":"oq-nrmllib","kind":"source","repository":"git://github.com/gem/oq-nrmllib.git","branch":"master","commit":"9999999"}"#
    );
    let fixture = TestFixture::new()
        .with_config(configs::MINIMAL)
        .with_file(".stagehand/deps-pins.jsonl", &conflicting);
    fixture
        .command()
        .arg("pins")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("resolve stage failed"))
        .stderr(predicate::str::contains("Resolution conflict for oq-nrmllib"));
}

#[test]
fn test_pins_corrupt_record_fails() {
    let fixture = TestFixture::new()
        .with_config(configs::MINIMAL)
        .with_file(".stagehand/deps-pins.jsonl", "not json\n");
    fixture
        .command()
        .arg("pins")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("line 1"));
}
