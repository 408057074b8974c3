#![cfg(feature = "cli")]

use assert_cmd::Command;
use predicates::prelude::*;
use stack_align::RunConfig;

#[test]
fn init_config_writes_loadable_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.json");

    Command::cargo_bin("stack-align")
        .expect("binary")
        .args(["init-config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote"));

    let cfg = RunConfig::load_json(&path).expect("load");
    assert_eq!(cfg, RunConfig::default());
}

#[test]
fn run_reports_missing_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    Command::cargo_bin("stack-align")
        .expect("binary")
        .args(["run", "--input"])
        .arg(dir.path().join("absent"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
