//! Behavioural smoke tests for the `blockhost` binary.

use std::fs;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use blockhost::test_support::SAMPLE_SSH_PUBLIC_KEY;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const CONFIG_VARS: [&str; 10] = [
    "BLOCKHOST_CONFIG_PATH",
    "BLOCKHOST_ROOT_DIR",
    "BLOCKHOST_SOURCE_DIR",
    "BLOCKHOST_INSTALL_ROOT",
    "BLOCKHOST_BUCKET_ENV_VAR",
    "BLOCKHOST_INSTANCE_TYPE",
    "BLOCKHOST_IMAGE_OWNER",
    "BLOCKHOST_IMAGE_NAME_PATTERN",
    "BLOCKHOST_SSH_PUBLIC_KEY",
    "BLOCKHOST_HALT_ON_STEP_FAILURE",
];

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let scripts = dir.path().join("server-code");
    fs::create_dir_all(&scripts).expect("create payload dir");
    fs::write(scripts.join("restore.sh"), "echo restore\n").expect("write restore.sh");
    fs::write(scripts.join("run_minecraft.sh"), "docker run minecraft\n")
        .expect("write run_minecraft.sh");
    dir
}

fn blockhost(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("blockhost");
    for var in CONFIG_VARS {
        cmd.env_remove(var);
    }
    cmd.env("HOME", dir.path());
    cmd.env("XDG_CONFIG_HOME", dir.path());
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn cli_without_arguments_prints_help() {
    let dir = workspace();
    blockhost(&dir)
        .assert()
        .failure()
        .stderr(contains("Usage"));
}

#[test]
fn script_renders_the_bootstrap_for_a_bucket() {
    let dir = workspace();
    blockhost(&dir)
        .args(["script", "--bucket", "example-bucket"])
        .assert()
        .success()
        .stdout(
            contains("#!/bin/bash\n")
                .and(contains("export MC_BUCKET=example-bucket"))
                .and(contains("Writing script: server-code/restore.sh"))
                .and(contains("bash /opt/server-code/run_minecraft.sh")),
        );
}

#[test]
fn script_refuses_a_bucket_variable_that_is_not_a_shell_word() {
    let dir = workspace();
    blockhost(&dir)
        .env("BLOCKHOST_BUCKET_ENV_VAR", "X=1; touch pwned; Y")
        .args(["script", "--bucket", "example-bucket"])
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(contains("not a valid shell variable name"));
    assert!(!dir.path().join("pwned").exists());
}

#[test]
fn graph_requires_an_ssh_key() {
    let dir = workspace();
    blockhost(&dir)
        .arg("graph")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("BLOCKHOST_SSH_PUBLIC_KEY"));
}

#[test]
fn graph_lists_waves_in_dependency_order() {
    let dir = workspace();
    blockhost(&dir)
        .env("BLOCKHOST_SSH_PUBLIC_KEY", SAMPLE_SSH_PUBLIC_KEY)
        .arg("graph")
        .assert()
        .success()
        .stdout(contains("wave 0: main-storage").and(contains("mc-api")));
}

#[test]
fn preview_prints_plan_and_outputs() {
    let dir = workspace();
    blockhost(&dir)
        .env("BLOCKHOST_SSH_PUBLIC_KEY", SAMPLE_SSH_PUBLIC_KEY)
        .arg("preview")
        .assert()
        .success()
        .stdout(
            contains("plan.server-instance=create")
                .and(contains("publicIp=192.0.2."))
                .and(contains("userData=sha256:")),
        );
}

#[test]
fn preview_reports_unchanged_resources_against_saved_state() {
    let dir = workspace();
    let state = dir.path().join("state.json");
    let state_arg = state.to_str().expect("utf8 path");

    for expected in ["plan.server-instance=create", "plan.server-instance=unchanged"] {
        blockhost(&dir)
            .env("BLOCKHOST_SSH_PUBLIC_KEY", SAMPLE_SSH_PUBLIC_KEY)
            .args(["preview", "--state", state_arg])
            .assert()
            .success()
            .stdout(contains(expected));
    }
    assert!(state.exists(), "state file should be written");
}
