// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Smoke tests for the farm binaries.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn coordinator_help() {
    Command::cargo_bin("renderfarm-coordinator")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("coordinator"));
}

#[test]
fn worker_refuses_to_start_without_renderer() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("renderfarm-worker")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("UNREAL_EXE")
        .env_remove("UNREAL_PROJECT")
        .assert()
        .failure()
        .stderr(predicate::str::contains("UNREAL_EXE"));
}

#[test]
fn submit_rejects_missing_project_config() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("renderfarm-submit")
        .unwrap()
        .current_dir(dir.path())
        .arg("no-such-project.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no-such-project.json"));
}

#[test]
fn submit_requires_a_config_argument() {
    Command::cargo_bin("renderfarm-submit")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
